//! # batchline-server
//!
//! Query bridge between a message-driven host and an analytical engine.
//!
//! This crate provides:
//!
//! - **Engine Seam**: The [`QueryEngine`] and [`Connection`] traits, an
//!   embedded DataFusion engine, and a process-wide lazily created
//!   connection.
//!
//! - **Cursors and Sessions**: Pull-based chunk delivery per query and the
//!   registry that maps query ids to their cursors.
//!
//! - **Dispatch**: JSON message classification and the serial dispatcher
//!   that answers each request with exactly one response.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use batchline_chunk::HeapAllocator;
//! use batchline_server::{Bridge, BridgeConfig, DataFusionEngine, Request};
//!
//! let config = BridgeConfig::default();
//! let host = Arc::new(HeapAllocator::new());
//! let mut bridge = Bridge::spawn(&config, Arc::new(DataFusionEngine::from_config(&config)), host.clone());
//! bridge.ready().await?;
//!
//! bridge.call(&Request::Query { sql: "select 1".into(), query_id: "Q1".into() }).await?;
//! let response = bridge.call(&Request::BatchRequest { query_id: "Q1".into() }).await?;
//! let chunk = host.take(response.chunk_address().unwrap()).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Bridge task and its client handle.
pub mod bridge;

/// Bridge configuration.
pub mod config;

/// Pull-based chunk delivery for one query.
pub mod cursor;

/// Request routing.
pub mod dispatcher;

/// Query engine seam and implementations.
pub mod engine;

/// Bridge errors.
pub mod error;

/// Wire messages.
pub mod message;

/// Query session registry.
pub mod registry;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeHandle};
pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use cursor::{BatchCursor, CursorError, CursorState};
pub use dispatcher::Dispatcher;
pub use engine::{
    BatchStream, Connection, DataFusionEngine, EngineError, EngineHandle, EngineResult,
    MemoryEngine, QueryEngine,
};
pub use error::{BridgeError, BridgeResult};
pub use message::{classify, Inbound, Request, Response};
pub use registry::{QueryRegistry, QuerySession, RegistryStats};
