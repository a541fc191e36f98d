//! Message dispatcher.
//!
//! Routes each inbound request to the engine, the registry, or both, and
//! produces exactly one response per request. Echoed response kinds,
//! unknown kinds, and unparseable input produce no response.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use batchline_chunk::ChunkEncoder;
use batchline_common::types::QueryId;

use crate::cursor::BatchCursor;
use crate::engine::{Connection, EngineHandle, EngineResult};
use crate::error::{BridgeError, BridgeResult};
use crate::message::{classify, Inbound, Request, Response};
use crate::registry::{QueryRegistry, QuerySession};

/// Serial request handler.
#[derive(Debug)]
pub struct Dispatcher {
    engine: Arc<EngineHandle>,
    registry: Arc<QueryRegistry>,
    encoder: ChunkEncoder,
    query_timeout: Option<Duration>,
    query_logging: bool,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        engine: Arc<EngineHandle>,
        registry: Arc<QueryRegistry>,
        encoder: ChunkEncoder,
        query_timeout: Option<Duration>,
    ) -> Self {
        Self {
            engine,
            registry,
            encoder,
            query_timeout,
            query_logging: false,
        }
    }

    /// Logs statement text at info level.
    pub fn with_query_logging(mut self, enabled: bool) -> Self {
        self.query_logging = enabled;
        self
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<QueryRegistry> {
        &self.registry
    }

    /// Parses and handles one JSON message.
    pub async fn handle_message(&self, text: &str) -> Option<Response> {
        match classify(text) {
            Ok(Inbound::Request(request)) => Some(self.handle(request).await),
            Ok(Inbound::Echo(kind)) => {
                debug!(kind = %kind, "ignoring echoed response");
                None
            }
            Ok(Inbound::Unknown(kind)) => {
                warn!(kind = %kind, "dropping message of unknown kind");
                None
            }
            Err(e) => {
                warn!(error = %e, code = %e.code(), "dropping malformed message");
                None
            }
        }
    }

    /// Handles one request.
    pub async fn handle(&self, request: Request) -> Response {
        debug!(kind = request.kind(), query_id = ?request.query_id(), "handling request");
        match request {
            Request::ParquetScan { sql, query_id } => {
                let error = self.scan(&query_id, &sql).await.err().map(|e| report(&query_id, &e));
                Response::ParquetScanResult { query_id, error }
            }
            Request::Query { sql, query_id } => {
                let error = self.submit(&query_id, &sql).await.err().map(|e| report(&query_id, &e));
                Response::QueryResult { query_id, error }
            }
            Request::BatchRequest { query_id } => {
                match self.registry.pull(&query_id, self.query_timeout).await {
                    Ok(address) => Response::chunk(query_id, address),
                    Err(e) => Response::BatchResponse {
                        error: Some(report(&query_id, &e)),
                        query_id,
                        chunk: None,
                    },
                }
            }
            Request::DuckInstance => match self.connection().await {
                Ok(_) => Response::ready(None),
                Err(e) => Response::ready(Some(e.to_string())),
            },
        }
    }

    /// Handles messages in arrival order until `requests` closes or the
    /// response receiver is dropped.
    pub async fn run(self, mut requests: mpsc::Receiver<String>, responses: mpsc::Sender<Response>) {
        info!("dispatcher started");
        while let Some(text) = requests.recv().await {
            let Some(response) = self.handle_message(&text).await else {
                continue;
            };
            if responses.send(response).await.is_err() {
                debug!("response receiver dropped");
                break;
            }
        }
        let stats = self.registry.stats();
        if stats.active_sessions > 0 {
            warn!(active = stats.active_sessions, "dispatcher stopping with open queries");
        }
        info!(
            total_queries = stats.total_registered,
            total_chunks = stats.total_chunks,
            "dispatcher stopped"
        );
    }

    async fn connection(&self) -> BridgeResult<Arc<dyn Connection>> {
        self.engine
            .connection()
            .await
            .map_err(|e| BridgeError::EngineUnavailable(e.to_string()))
    }

    async fn scan(&self, query_id: &QueryId, sql: &str) -> BridgeResult<()> {
        let connection = self.connection().await?;
        self.log_statement(query_id, sql);
        let rows = self.limited(query_id, connection.run(sql)).await?;
        info!(%query_id, rows, "scan complete");
        Ok(())
    }

    async fn submit(&self, query_id: &QueryId, sql: &str) -> BridgeResult<()> {
        if self.registry.contains(query_id) {
            return Err(BridgeError::DuplicateQuery(query_id.clone()));
        }
        let connection = self.connection().await?;
        self.log_statement(query_id, sql);
        let stream = self.limited(query_id, connection.execute(sql)).await?;
        let cursor = BatchCursor::new(stream, self.encoder.clone());
        self.registry.register(QuerySession::new(query_id.clone(), sql, cursor))?;
        info!(%query_id, "query accepted");
        Ok(())
    }

    async fn limited<T>(
        &self,
        query_id: &QueryId,
        future: impl Future<Output = EngineResult<T>>,
    ) -> BridgeResult<T> {
        match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| BridgeError::Timeout {
                    query_id: query_id.clone(),
                    secs: limit.as_secs(),
                })?
                .map_err(BridgeError::from),
            None => future.await.map_err(BridgeError::from),
        }
    }

    fn log_statement(&self, query_id: &QueryId, sql: &str) {
        if self.query_logging {
            info!(%query_id, sql, "executing statement");
        } else {
            debug!(%query_id, "executing statement");
        }
    }
}

fn report(query_id: &QueryId, error: &BridgeError) -> String {
    match error {
        BridgeError::UnknownQuery(_) => debug!(%query_id, "request for unknown query"),
        _ => warn!(%query_id, code = %error.code(), error = %error, "request failed"),
    }
    error.response_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    use arrow::array::{ArrayRef, Int32Array};
    use arrow::record_batch::RecordBatch;
    use batchline_chunk::{CellValue, EncoderOptions, HeapAllocator};

    use crate::engine::MemoryEngine;

    fn batch(values: Vec<i32>) -> RecordBatch {
        RecordBatch::try_from_iter([("v", Arc::new(Int32Array::from(values)) as ArrayRef)]).unwrap()
    }

    fn dispatcher(engine: MemoryEngine) -> (Arc<MemoryEngine>, Arc<HeapAllocator>, Dispatcher) {
        let engine = Arc::new(engine);
        let host = Arc::new(HeapAllocator::new());
        let dispatcher = Dispatcher::new(
            Arc::new(EngineHandle::new(engine.clone())),
            Arc::new(QueryRegistry::new()),
            ChunkEncoder::new(host.clone(), EncoderOptions::default()),
            Some(Duration::from_secs(5)),
        );
        (engine, host, dispatcher)
    }

    fn query(sql: &str, id: &str) -> Request {
        Request::Query {
            sql: sql.into(),
            query_id: QueryId::new(id),
        }
    }

    fn batch_request(id: &str) -> Request {
        Request::BatchRequest {
            query_id: QueryId::new(id),
        }
    }

    #[tokio::test]
    async fn test_query_then_pull() {
        let (_engine, host, dispatcher) =
            dispatcher(MemoryEngine::new().with_result("select v", vec![batch(vec![4, 5])]));

        let response = dispatcher.handle(query("select v", "Q1")).await;
        assert_eq!(
            response,
            Response::QueryResult {
                query_id: QueryId::new("Q1"),
                error: None
            }
        );

        let response = dispatcher.handle(batch_request("Q1")).await;
        let address = response.chunk_address().unwrap();
        let chunk = host.take(address).unwrap();
        let reader = chunk.reader().unwrap();
        assert_eq!(reader.row_count(), 2);
        assert_eq!(reader.column(0).unwrap().value(1).unwrap(), Some(CellValue::Int(5)));

        let response = dispatcher.handle(batch_request("Q1")).await;
        assert!(response.chunk_address().unwrap().is_terminal());

        let response = dispatcher.handle(batch_request("Q1")).await;
        assert_eq!(response.error(), Some("unknown"));
    }

    #[tokio::test]
    async fn test_duplicate_query_keeps_existing_session() {
        let (engine, _host, dispatcher) =
            dispatcher(MemoryEngine::new().with_result("select v", vec![batch(vec![1])]));

        assert!(!dispatcher.handle(query("select v", "Q1")).await.is_error());
        let response = dispatcher.handle(query("select v", "Q1")).await;
        assert!(response.error().unwrap().contains("already registered"));
        assert_eq!(engine.executed().len(), 1);

        let response = dispatcher.handle(batch_request("Q1")).await;
        assert!(!response.chunk_address().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_execution_error_is_reported() {
        let (_engine, _host, dispatcher) =
            dispatcher(MemoryEngine::new().with_execute_error("select nope", "no such column"));

        let response = dispatcher.handle(query("select nope", "Q2")).await;
        assert!(response.error().unwrap().contains("no such column"));
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_engine_unavailable_is_reported() {
        let (_engine, _host, dispatcher) = dispatcher(MemoryEngine::new().fail_connects(1));

        let response = dispatcher.handle(query("select v", "Q3")).await;
        assert!(response.error().unwrap().starts_with("engine unavailable"));

        let response = dispatcher.handle(Request::DuckInstance).await;
        assert_eq!(response, Response::ready(None));
    }

    #[tokio::test]
    async fn test_scan_runs_to_completion() {
        let (engine, _host, dispatcher) = dispatcher(MemoryEngine::new());
        let response = dispatcher
            .handle(Request::ParquetScan {
                sql: "create external table t stored as parquet location 'x'".into(),
                query_id: QueryId::new("P1"),
            })
            .await;
        assert_eq!(
            response,
            Response::ParquetScanResult {
                query_id: QueryId::new("P1"),
                error: None
            }
        );
        assert_eq!(engine.executed().len(), 1);
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_statement_timeout() {
        let engine = Arc::new(MemoryEngine::new().with_pending("select forever"));
        let dispatcher = Dispatcher::new(
            Arc::new(EngineHandle::new(engine)),
            Arc::new(QueryRegistry::new()),
            ChunkEncoder::new(Arc::new(HeapAllocator::new()), EncoderOptions::default()),
            Some(Duration::from_millis(20)),
        );

        assert!(!dispatcher.handle(query("select forever", "T")).await.is_error());
        let response = dispatcher.handle(batch_request("T")).await;
        assert!(response.error().unwrap().contains("timed out"));
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_handle_message_drops_noise() {
        let (_engine, _host, dispatcher) = dispatcher(MemoryEngine::new());
        assert!(dispatcher.handle_message("garbage").await.is_none());
        assert!(dispatcher.handle_message(r#"{"nd_type":"Mystery"}"#).await.is_none());
        assert!(dispatcher
            .handle_message(r#"{"nd_type":"QueryResult","query_id":"Q1"}"#)
            .await
            .is_none());

        let response = dispatcher
            .handle_message(r#"{"nd_type":"BatchRequest","query_id":"UNKNOWN"}"#)
            .await
            .unwrap();
        assert_eq!(
            response,
            Response::BatchResponse {
                query_id: QueryId::new("UNKNOWN"),
                chunk: None,
                error: Some("unknown".into()),
            }
        );
    }
}
