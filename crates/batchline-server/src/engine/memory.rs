//! In-memory engine with scripted results.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;

use super::{BatchStream, Connection, EngineError, EngineResult, QueryEngine};

#[derive(Clone)]
enum Script {
    Batches(Vec<RecordBatch>),
    StreamError(Vec<RecordBatch>, String),
    ExecuteError(String),
    Pending,
}

/// Engine that answers statements from a fixed script.
///
/// Statements are matched on their trimmed text. Unscripted statements fail
/// under `execute` and succeed with zero rows under `run`.
pub struct MemoryEngine {
    scripts: Arc<DashMap<String, Script>>,
    executed: Arc<Mutex<Vec<String>>>,
    connect_delay: Option<Duration>,
    failing_connects: AtomicU64,
    connections_opened: AtomicU64,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates an engine with no scripted statements.
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(DashMap::new()),
            executed: Arc::new(Mutex::new(Vec::new())),
            connect_delay: None,
            failing_connects: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
        }
    }

    /// Scripts `sql` to yield `batches`.
    pub fn with_result(self, sql: &str, batches: Vec<RecordBatch>) -> Self {
        self.script(sql, Script::Batches(batches))
    }

    /// Scripts `sql` to yield `batches` and then fail the stream.
    pub fn with_stream_error(self, sql: &str, batches: Vec<RecordBatch>, message: &str) -> Self {
        self.script(sql, Script::StreamError(batches, message.to_string()))
    }

    /// Scripts `sql` to fail at execution.
    pub fn with_execute_error(self, sql: &str, message: &str) -> Self {
        self.script(sql, Script::ExecuteError(message.to_string()))
    }

    /// Scripts `sql` to return a stream that never yields.
    pub fn with_pending(self, sql: &str) -> Self {
        self.script(sql, Script::Pending)
    }

    /// Delays every connect attempt.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Makes the next `attempts` connect attempts fail.
    pub fn fail_connects(self, attempts: u64) -> Self {
        self.failing_connects.store(attempts, Ordering::Relaxed);
        self
    }

    /// Number of connections successfully opened.
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    fn script(self, sql: &str, script: Script) -> Self {
        self.scripts.insert(sql.trim().to_string(), script);
        self
    }
}

impl QueryEngine for MemoryEngine {
    fn connect(&self) -> BoxFuture<'_, EngineResult<Arc<dyn Connection>>> {
        Box::pin(async move {
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            let failing = self
                .failing_connects
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(EngineError::Connect("scripted connect failure".to_string()));
            }
            self.connections_opened.fetch_add(1, Ordering::Relaxed);
            let connection: Arc<dyn Connection> = Arc::new(MemoryConnection {
                scripts: Arc::clone(&self.scripts),
                executed: Arc::clone(&self.executed),
            });
            Ok(connection)
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryConnection {
    scripts: Arc<DashMap<String, Script>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MemoryConnection {
    fn lookup(&self, sql: &str) -> Option<Script> {
        let sql = sql.trim();
        self.executed.lock().push(sql.to_string());
        self.scripts.get(sql).map(|entry| entry.value().clone())
    }
}

impl Connection for MemoryConnection {
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, EngineResult<BatchStream>> {
        Box::pin(async move {
            match self.lookup(sql) {
                Some(Script::Batches(batches)) => Ok(stream::iter(batches.into_iter().map(Ok)).boxed()),
                Some(Script::StreamError(batches, message)) => Ok(stream::iter(batches.into_iter().map(Ok))
                    .chain(stream::once(async move { Err(EngineError::Stream(message)) }))
                    .boxed()),
                Some(Script::ExecuteError(message)) => Err(EngineError::Execution(message)),
                Some(Script::Pending) => Ok(stream::pending().boxed()),
                None => Err(EngineError::Execution(format!("no scripted result for '{sql}'"))),
            }
        })
    }

    fn run<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, EngineResult<u64>> {
        Box::pin(async move {
            match self.lookup(sql) {
                Some(Script::Batches(batches)) => Ok(batches.iter().map(|b| b.num_rows() as u64).sum()),
                Some(Script::StreamError(_, message)) => Err(EngineError::Stream(message)),
                Some(Script::ExecuteError(message)) => Err(EngineError::Execution(message)),
                Some(Script::Pending) => std::future::pending().await,
                None => Ok(0),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int32Array};

    fn batch(values: Vec<i32>) -> RecordBatch {
        RecordBatch::try_from_iter([("v", Arc::new(Int32Array::from(values)) as ArrayRef)]).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_stream() {
        let engine = MemoryEngine::new().with_result("select v", vec![batch(vec![1]), batch(vec![2, 3])]);
        let connection = engine.connect().await.unwrap();

        let batches: Vec<_> = connection.execute(" select v ").await.unwrap().collect().await;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].as_ref().unwrap().num_rows(), 2);
        assert_eq!(connection.run("select v").await.unwrap(), 3);
        assert_eq!(engine.executed(), vec!["select v", "select v"]);
    }

    #[tokio::test]
    async fn test_stream_error_after_batches() {
        let engine = MemoryEngine::new().with_stream_error("q", vec![batch(vec![1])], "disk gone");
        let connection = engine.connect().await.unwrap();

        let items: Vec<_> = connection.execute("q").await.unwrap().collect().await;
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err(), &EngineError::Stream("disk gone".into()));
    }

    #[tokio::test]
    async fn test_unscripted_statements() {
        let engine = MemoryEngine::new();
        let connection = engine.connect().await.unwrap();
        assert!(connection.execute("select 1").await.is_err());
        assert_eq!(connection.run("create table t").await.unwrap(), 0);
    }
}
