//! Embedded DataFusion engine.
//!
//! Each connection is a DataFusion `SessionContext`. Parquet files are
//! reached through SQL, for example
//! `CREATE EXTERNAL TABLE t STORED AS PARQUET LOCATION 'data.parquet'`.

use std::sync::Arc;

use datafusion::error::DataFusionError;
use datafusion::prelude::{SessionConfig, SessionContext};
use futures_util::future::BoxFuture;
use futures_util::stream::StreamExt;
use tracing::debug;

use crate::config::BridgeConfig;

use super::{BatchStream, Connection, EngineError, EngineResult, QueryEngine};

/// Engine backed by an in-process DataFusion session.
#[derive(Debug, Clone)]
pub struct DataFusionEngine {
    batch_size: usize,
    target_partitions: Option<usize>,
}

impl Default for DataFusionEngine {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl DataFusionEngine {
    /// Creates an engine with the given target rows per batch.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            target_partitions: None,
        }
    }

    /// Creates an engine from bridge configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            target_partitions: config.target_partitions,
        }
    }

    fn session_config(&self) -> SessionConfig {
        let config = SessionConfig::new().with_batch_size(self.batch_size.max(1));
        match self.target_partitions {
            Some(partitions) => config.with_target_partitions(partitions.max(1)),
            None => config,
        }
    }
}

impl QueryEngine for DataFusionEngine {
    fn connect(&self) -> BoxFuture<'_, EngineResult<Arc<dyn Connection>>> {
        Box::pin(async move {
            let ctx = SessionContext::new_with_config(self.session_config());
            debug!(session_id = %ctx.session_id(), batch_size = self.batch_size, "created session context");
            let connection: Arc<dyn Connection> = Arc::new(DataFusionConnection { ctx });
            Ok(connection)
        })
    }

    fn name(&self) -> &str {
        "datafusion"
    }
}

struct DataFusionConnection {
    ctx: SessionContext,
}

fn execution_error(e: DataFusionError) -> EngineError {
    EngineError::Execution(e.to_string())
}

impl Connection for DataFusionConnection {
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, EngineResult<BatchStream>> {
        Box::pin(async move {
            let df = self.ctx.sql(sql).await.map_err(execution_error)?;
            let stream = df.execute_stream().await.map_err(execution_error)?;
            Ok(stream
                .map(|batch| batch.map_err(|e| EngineError::Stream(e.to_string())))
                .boxed())
        })
    }

    fn run<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, EngineResult<u64>> {
        Box::pin(async move {
            let df = self.ctx.sql(sql).await.map_err(execution_error)?;
            let batches = df.collect().await.map_err(execution_error)?;
            Ok(batches.iter().map(|b| b.num_rows() as u64).sum())
        })
    }
}
