//! Bridge messages.
//!
//! Messages are JSON objects whose `nd_type` field names the kind:
//!
//! ```text
//! {"nd_type":"Query","sql":"select 1","query_id":"Q1"}
//! {"nd_type":"QueryResult","query_id":"Q1"}
//! {"nd_type":"BatchRequest","query_id":"Q1"}
//! {"nd_type":"BatchResponse","query_id":"Q1","chunk":140245032599552}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use batchline_common::constants::INSTANCE_QUERY_ID;
use batchline_common::types::{ChunkAddress, QueryId};

use crate::error::{BridgeError, BridgeResult};

/// Field naming a message's kind.
pub const KIND_FIELD: &str = "nd_type";

/// Inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "nd_type")]
pub enum Request {
    /// Run a statement to completion without streaming rows.
    ParquetScan {
        /// Statement text.
        sql: String,
        /// Correlation id.
        query_id: QueryId,
    },
    /// Submit a query whose rows are pulled with `BatchRequest`.
    Query {
        /// Statement text.
        sql: String,
        /// Correlation id.
        query_id: QueryId,
    },
    /// Pull the next chunk of a submitted query.
    BatchRequest {
        /// Correlation id.
        query_id: QueryId,
    },
    /// Ask for the engine readiness acknowledgement.
    DuckInstance,
}

impl Request {
    /// The request's query id, if it carries one.
    pub fn query_id(&self) -> Option<&QueryId> {
        match self {
            Request::ParquetScan { query_id, .. }
            | Request::Query { query_id, .. }
            | Request::BatchRequest { query_id } => Some(query_id),
            Request::DuckInstance => None,
        }
    }

    /// The message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::ParquetScan { .. } => "ParquetScan",
            Request::Query { .. } => "Query",
            Request::BatchRequest { .. } => "BatchRequest",
            Request::DuckInstance => "DuckInstance",
        }
    }

    /// Serializes to a single JSON line.
    pub fn to_json(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outbound response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "nd_type")]
pub enum Response {
    /// Acknowledges a completed `ParquetScan`.
    ParquetScanResult {
        /// Correlation id.
        query_id: QueryId,
        /// Failure description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Acknowledges an accepted `Query`.
    QueryResult {
        /// Correlation id.
        query_id: QueryId,
        /// Failure description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Delivers one chunk address, or `0` when the query is finished.
    BatchResponse {
        /// Correlation id.
        query_id: QueryId,
        /// Chunk address.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk: Option<u64>,
        /// Failure description; `unknown` for an unregistered query.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Engine readiness acknowledgement.
    DuckInstance {
        /// Always the readiness sentinel.
        query_id: QueryId,
        /// Failure description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Response {
    /// A successful batch response.
    pub fn chunk(query_id: QueryId, address: ChunkAddress) -> Self {
        Response::BatchResponse {
            query_id,
            chunk: Some(address.as_u64()),
            error: None,
        }
    }

    /// A readiness acknowledgement.
    pub fn ready(error: Option<String>) -> Self {
        Response::DuckInstance {
            query_id: QueryId::new(INSTANCE_QUERY_ID),
            error,
        }
    }

    /// The correlation id.
    pub fn query_id(&self) -> &QueryId {
        match self {
            Response::ParquetScanResult { query_id, .. }
            | Response::QueryResult { query_id, .. }
            | Response::BatchResponse { query_id, .. }
            | Response::DuckInstance { query_id, .. } => query_id,
        }
    }

    /// The error text, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            Response::ParquetScanResult { error, .. }
            | Response::QueryResult { error, .. }
            | Response::BatchResponse { error, .. }
            | Response::DuckInstance { error, .. } => error.as_deref(),
        }
    }

    /// Returns true if the response carries an error.
    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }

    /// The delivered chunk address for a batch response.
    pub fn chunk_address(&self) -> Option<ChunkAddress> {
        match self {
            Response::BatchResponse {
                chunk: Some(raw), ..
            } => Some(ChunkAddress::new(*raw)),
            _ => None,
        }
    }

    /// The message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::ParquetScanResult { .. } => "ParquetScanResult",
            Response::QueryResult { .. } => "QueryResult",
            Response::BatchResponse { .. } => "BatchResponse",
            Response::DuckInstance { .. } => "DuckInstance",
        }
    }

    /// Serializes to a single JSON line.
    pub fn to_json(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A request to act on.
    Request(Request),
    /// One of the bridge's own response kinds, received back.
    Echo(String),
    /// An unrecognized kind.
    Unknown(String),
}

/// Classifies one JSON message by its `nd_type` field.
///
/// A `DuckInstance` carrying a `query_id` is the bridge's own readiness
/// acknowledgement and is classified as an echo.
///
/// # Errors
///
/// Returns [`BridgeError::MalformedMessage`] for invalid JSON, a missing
/// `nd_type` field, or a known request kind with missing fields.
pub fn classify(text: &str) -> BridgeResult<Inbound> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get(KIND_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            BridgeError::MalformedMessage(format!("missing string field '{KIND_FIELD}'"))
        })?
        .to_string();

    match kind.as_str() {
        "ParquetScan" | "Query" | "BatchRequest" => Ok(Inbound::Request(serde_json::from_value(value)?)),
        "DuckInstance" if value.get("query_id").is_some() => Ok(Inbound::Echo(kind)),
        "DuckInstance" => Ok(Inbound::Request(Request::DuckInstance)),
        "ParquetScanResult" | "QueryResult" | "BatchResponse" => Ok(Inbound::Echo(kind)),
        _ => Ok(Inbound::Unknown(kind)),
    }
}
