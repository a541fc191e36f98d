//! Bridge task.
//!
//! [`Bridge::spawn`] starts the dispatcher on its own task and returns a
//! [`BridgeHandle`] holding the request sender, the response receiver, and a
//! one-shot readiness signal that fires once the engine connection exists.
//!
//! Requests can also be fed from a line stream with
//! [`BridgeHandle::forward_lines`], which runs on its own task so the caller
//! only has to drain responses.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use batchline_chunk::{ChunkEncoder, HostAllocator};

use crate::config::BridgeConfig;
use crate::dispatcher::Dispatcher;
use crate::engine::{EngineHandle, QueryEngine};
use crate::error::{BridgeError, BridgeResult};
use crate::message::{Request, Response};
use crate::registry::QueryRegistry;

/// Bridge entry point.
pub struct Bridge;

impl Bridge {
    /// Spawns the dispatcher task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: &BridgeConfig,
        engine: Arc<dyn QueryEngine>,
        allocator: Arc<dyn HostAllocator>,
    ) -> BridgeHandle {
        let engine = Arc::new(EngineHandle::new(engine));
        let registry = Arc::new(QueryRegistry::new());
        let encoder = ChunkEncoder::new(allocator, config.encoder);
        let dispatcher = Dispatcher::new(
            Arc::clone(&engine),
            Arc::clone(&registry),
            encoder,
            config.query_timeout(),
        )
        .with_query_logging(config.query_logging);

        let capacity = config.channel_capacity.max(1);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (response_tx, response_rx) = mpsc::channel(capacity);
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let ready = engine
                .connection()
                .await
                .map(|_| ())
                .map_err(|e| BridgeError::EngineUnavailable(e.to_string()));
            match &ready {
                Ok(()) => info!(engine = engine.engine_name(), "engine ready"),
                Err(e) => warn!(error = %e, "engine not ready, requests will retry"),
            }
            // receiver may already be gone
            let _ = ready_tx.send(ready);
            dispatcher.run(request_rx, response_tx).await;
        });

        BridgeHandle {
            requests: Some(request_tx),
            responses: response_rx,
            ready: Some(ready_rx),
            registry,
            task,
        }
    }
}

/// Client side of a running bridge.
pub struct BridgeHandle {
    requests: Option<mpsc::Sender<String>>,
    responses: mpsc::Receiver<Response>,
    ready: Option<oneshot::Receiver<BridgeResult<()>>>,
    registry: Arc<QueryRegistry>,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    /// Waits for the engine readiness signal.
    ///
    /// # Errors
    ///
    /// Returns the startup connection failure, or [`BridgeError::Internal`]
    /// if the signal was already consumed or the task died first.
    pub async fn ready(&mut self) -> BridgeResult<()> {
        let ready = self
            .ready
            .take()
            .ok_or_else(|| BridgeError::Internal("readiness already observed".to_string()))?;
        ready
            .await
            .map_err(|_| BridgeError::Internal("bridge task ended before readiness".to_string()))?
    }

    /// Sends a request.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Internal`] if input is closed or the task ended.
    pub async fn send(&self, request: &Request) -> BridgeResult<()> {
        self.send_raw(request.to_json()?).await
    }

    /// Sends a raw JSON message.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Internal`] if input is closed or the task ended.
    pub async fn send_raw(&self, text: impl Into<String>) -> BridgeResult<()> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| BridgeError::Internal("bridge input is closed".to_string()))?;
        requests
            .send(text.into())
            .await
            .map_err(|_| BridgeError::Internal("bridge task has stopped".to_string()))
    }

    /// Receives the next response, or `None` once the bridge has stopped.
    pub async fn recv(&mut self) -> Option<Response> {
        self.responses.recv().await
    }

    /// Sends a request and waits for the next response.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Internal`] if the bridge stops first.
    pub async fn call(&mut self, request: &Request) -> BridgeResult<Response> {
        self.send(request).await?;
        self.recv()
            .await
            .ok_or_else(|| BridgeError::Internal("bridge stopped without responding".to_string()))
    }

    /// Hands the request side to a task that sends every non-blank line of
    /// `input` as a raw message.
    ///
    /// The handle's own input is closed; the bridge input closes when the
    /// task reaches end of input, fails to read, or sees the bridge stop.
    /// The task resolves to the number of lines forwarded.
    pub fn forward_lines<R>(&mut self, input: R) -> JoinHandle<std::io::Result<usize>>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let requests = self.requests.take();
        tokio::spawn(async move {
            let Some(requests) = requests else {
                return Ok(0);
            };
            let mut lines = input.lines();
            let mut forwarded = 0;
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                if requests.send(line).await.is_err() {
                    warn!("bridge task stopped, dropping remaining input");
                    break;
                }
                forwarded += 1;
            }
            debug!(forwarded, "input forwarding finished");
            Ok(forwarded)
        })
    }

    /// Stops accepting requests. Queued requests are still answered.
    pub fn close_input(&mut self) {
        self.requests = None;
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<QueryRegistry> {
        &self.registry
    }

    /// Closes input, drains remaining responses, and waits for the task.
    ///
    /// Returns the responses that were still queued.
    pub async fn shutdown(mut self) -> Vec<Response> {
        self.close_input();
        let mut remaining = Vec::new();
        while let Some(response) = self.responses.recv().await {
            remaining.push(response);
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "bridge task ended abnormally");
        }
        remaining
    }
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("input_open", &self.requests.is_some())
            .field("active_queries", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use batchline_chunk::HeapAllocator;
    use batchline_common::types::QueryId;
    use tokio::time::timeout;

    use crate::engine::MemoryEngine;

    #[tokio::test]
    async fn test_ready_fires_once() {
        let engine = Arc::new(MemoryEngine::new());
        let mut bridge = Bridge::spawn(
            &BridgeConfig::default(),
            engine.clone(),
            Arc::new(HeapAllocator::new()),
        );

        bridge.ready().await.unwrap();
        assert!(matches!(bridge.ready().await, Err(BridgeError::Internal(_))));
        assert_eq!(engine.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_ready_reports_connect_failure_then_recovers() {
        let engine = Arc::new(MemoryEngine::new().fail_connects(1));
        let mut bridge = Bridge::spawn(
            &BridgeConfig::default(),
            engine.clone(),
            Arc::new(HeapAllocator::new()),
        );

        assert!(matches!(
            bridge.ready().await,
            Err(BridgeError::EngineUnavailable(_))
        ));
        let response = bridge.call(&Request::DuckInstance).await.unwrap();
        assert_eq!(response, Response::ready(None));
        assert_eq!(engine.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_responses() {
        let mut bridge = Bridge::spawn(
            &BridgeConfig::default(),
            Arc::new(MemoryEngine::new()),
            Arc::new(HeapAllocator::new()),
        );
        bridge.ready().await.unwrap();

        for id in ["a", "b"] {
            bridge
                .send(&Request::BatchRequest {
                    query_id: QueryId::new(id),
                })
                .await
                .unwrap();
        }
        bridge.send_raw("not json").await.unwrap();

        let remaining = bridge.shutdown().await;
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.error() == Some("unknown")));
    }

    #[tokio::test]
    async fn test_forwarded_input_beyond_channel_capacity() {
        let config = BridgeConfig::builder().channel_capacity(1).build();
        let mut bridge = Bridge::spawn(
            &config,
            Arc::new(MemoryEngine::new()),
            Arc::new(HeapAllocator::new()),
        );
        bridge.ready().await.unwrap();

        let mut input = String::new();
        for i in 0..50 {
            let request = Request::BatchRequest {
                query_id: QueryId::new(format!("Q{i}")),
            };
            input.push_str(&request.to_json().unwrap());
            input.push_str("\n\n");
        }
        let forwarder = bridge.forward_lines(std::io::Cursor::new(input.into_bytes()));
        assert!(bridge.send(&Request::DuckInstance).await.is_err());

        // both channels fill before anything is read
        tokio::time::sleep(Duration::from_millis(100)).await;

        for i in 0..50 {
            let response = timeout(Duration::from_secs(5), bridge.recv())
                .await
                .expect("bridge stalled")
                .expect("bridge stopped early");
            assert_eq!(response.query_id(), &QueryId::new(format!("Q{i}")));
            assert_eq!(response.error(), Some("unknown"));
        }

        assert_eq!(forwarder.await.unwrap().unwrap(), 50);
        assert!(bridge.recv().await.is_none());
        assert!(bridge.shutdown().await.is_empty());
    }
}
