//! Query engine seam.
//!
//! The bridge talks to an analytical engine through two traits:
//! [`QueryEngine`] produces connections and [`Connection`] runs statements.
//! A process shares one connection through [`EngineHandle`], which creates it
//! lazily and at most once.
//!
//! # Implementations
//!
//! - [`DataFusionEngine`]: embedded DataFusion session
//! - [`MemoryEngine`]: scripted results for tests and demos

mod datafusion_engine;
mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub use datafusion_engine::DataFusionEngine;
pub use memory::MemoryEngine;

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The engine could not open a connection.
    #[error("engine connection failed: {0}")]
    Connect(String),

    /// The engine rejected or failed a statement.
    #[error("statement failed: {0}")]
    Execution(String),

    /// The batch stream failed after execution started.
    #[error("batch stream failed: {0}")]
    Stream(String),
}

/// Engine result type.
pub type EngineResult<T> = Result<T, EngineError>;

/// Asynchronous sequence of result batches.
pub type BatchStream = BoxStream<'static, EngineResult<RecordBatch>>;

/// A live engine connection.
pub trait Connection: Send + Sync {
    /// Executes a statement and returns its batches as a stream.
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, EngineResult<BatchStream>>;

    /// Executes a statement to completion, discarding any rows.
    ///
    /// Returns the number of rows the statement produced.
    fn run<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, EngineResult<u64>>;
}

/// Factory for engine connections.
pub trait QueryEngine: Send + Sync {
    /// Opens a new connection.
    fn connect(&self) -> BoxFuture<'_, EngineResult<Arc<dyn Connection>>>;

    /// Engine name for logs.
    fn name(&self) -> &str;
}

/// Process-wide lazily created connection.
///
/// Concurrent first callers share one connect attempt. A failed attempt
/// leaves the handle empty so the next caller retries.
pub struct EngineHandle {
    engine: Arc<dyn QueryEngine>,
    connection: OnceCell<Arc<dyn Connection>>,
    connect_attempts: AtomicU64,
}

impl EngineHandle {
    /// Creates an unconnected handle.
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self {
            engine,
            connection: OnceCell::new(),
            connect_attempts: AtomicU64::new(0),
        }
    }

    /// Returns the shared connection, creating it on first use.
    pub async fn connection(&self) -> EngineResult<Arc<dyn Connection>> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                self.connect_attempts.fetch_add(1, Ordering::Relaxed);
                match self.engine.connect().await {
                    Ok(connection) => {
                        info!(engine = self.engine.name(), "engine connected");
                        Ok(connection)
                    }
                    Err(e) => {
                        warn!(engine = self.engine.name(), error = %e, "engine connect failed");
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(Arc::clone(connection))
    }

    /// Returns true once a connection has been created.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// Number of connect attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Engine name.
    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.engine.name())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_first_use_connects_once() {
        let engine = Arc::new(MemoryEngine::new().with_connect_delay(Duration::from_millis(20)));
        let handle = Arc::new(EngineHandle::new(engine.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.connection().await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(engine.connections_opened(), 1);
        assert_eq!(handle.connect_attempts(), 1);
        assert!(handle.is_connected());
    }

    #[tokio::test]
    async fn test_failed_connect_is_retried() {
        let engine = Arc::new(MemoryEngine::new().fail_connects(1));
        let handle = EngineHandle::new(engine.clone());

        let err = handle.connection().await.err().unwrap();
        assert!(matches!(err, EngineError::Connect(_)));
        assert!(!handle.is_connected());

        assert!(handle.connection().await.is_ok());
        assert_eq!(handle.connect_attempts(), 2);
        assert_eq!(engine.connections_opened(), 1);
    }
}
