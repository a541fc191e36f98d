//! Bridge error types.

use std::fmt;

use batchline_chunk::ChunkError;
use batchline_common::error::ErrorCode;
use batchline_common::types::QueryId;

use crate::cursor::CursorError;
use crate::engine::EngineError;

/// Errors surfaced to the consumer as a response `error` field.
#[derive(Debug)]
pub enum BridgeError {
    /// No engine connection could be obtained.
    EngineUnavailable(String),
    /// The engine failed while executing or streaming.
    Engine(EngineError),
    /// A batch could not be encoded.
    Chunk(ChunkError),
    /// The query id is not registered.
    UnknownQuery(QueryId),
    /// The query id is already registered.
    DuplicateQuery(QueryId),
    /// The query's cursor already signalled exhaustion.
    CursorExhausted(QueryId),
    /// A statement or pull exceeded the configured timeout.
    Timeout {
        /// The query that timed out.
        query_id: QueryId,
        /// The limit in seconds.
        secs: u64,
    },
    /// An inbound message could not be parsed.
    MalformedMessage(String),
    /// Internal error.
    Internal(String),
}

impl BridgeError {
    /// Returns the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::EngineUnavailable(_) => ErrorCode::EngineUnavailable,
            BridgeError::Engine(_) => ErrorCode::ExecutionFailed,
            BridgeError::Chunk(e) => e.code(),
            BridgeError::UnknownQuery(_) => ErrorCode::UnknownQuery,
            BridgeError::DuplicateQuery(_) => ErrorCode::DuplicateQuery,
            BridgeError::CursorExhausted(_) => ErrorCode::CursorExhausted,
            BridgeError::Timeout { .. } => ErrorCode::Timeout,
            BridgeError::MalformedMessage(_) => ErrorCode::MalformedMessage,
            BridgeError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Text placed in a response's `error` field.
    ///
    /// Unknown queries report the bare string `unknown`.
    pub fn response_text(&self) -> String {
        match self {
            BridgeError::UnknownQuery(_) => "unknown".to_string(),
            other => other.to_string(),
        }
    }

    /// Attaches a query id to a cursor failure.
    pub fn from_cursor(query_id: &QueryId, error: CursorError) -> Self {
        match error {
            CursorError::Exhausted => BridgeError::CursorExhausted(query_id.clone()),
            CursorError::Engine(e) => BridgeError::Engine(e),
            CursorError::Chunk(e) => BridgeError::Chunk(e),
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::EngineUnavailable(msg) => write!(f, "engine unavailable: {}", msg),
            BridgeError::Engine(e) => write!(f, "{}", e),
            BridgeError::Chunk(e) => write!(f, "{}", e),
            BridgeError::UnknownQuery(id) => write!(f, "unknown query: {}", id),
            BridgeError::DuplicateQuery(id) => write!(f, "query already registered: {}", id),
            BridgeError::CursorExhausted(id) => write!(f, "query {} is exhausted", id),
            BridgeError::Timeout { query_id, secs } => {
                write!(f, "query {} timed out after {}s", query_id, secs)
            }
            BridgeError::MalformedMessage(msg) => write!(f, "malformed message: {}", msg),
            BridgeError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Engine(e) => Some(e),
            BridgeError::Chunk(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for BridgeError {
    fn from(e: EngineError) -> Self {
        BridgeError::Engine(e)
    }
}

impl From<ChunkError> for BridgeError {
    fn from(e: ChunkError) -> Self {
        BridgeError::Chunk(e)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::MalformedMessage(e.to_string())
    }
}

/// Bridge result type.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_query_response_text() {
        let err = BridgeError::UnknownQuery(QueryId::new("UNKNOWN"));
        assert_eq!(err.response_text(), "unknown");
        assert_eq!(err.to_string(), "unknown query: UNKNOWN");
        assert_eq!(err.code(), ErrorCode::UnknownQuery);
    }

    #[test]
    fn test_codes() {
        let id = QueryId::new("q");
        assert_eq!(
            BridgeError::Timeout { query_id: id.clone(), secs: 5 }.code(),
            ErrorCode::Timeout
        );
        assert_eq!(
            BridgeError::from_cursor(&id, CursorError::Exhausted).code(),
            ErrorCode::CursorExhausted
        );
        assert_eq!(
            BridgeError::from(ChunkError::Malformed("x".into())).code(),
            ErrorCode::MalformedChunk
        );
    }
}
