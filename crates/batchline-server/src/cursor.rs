//! Batch cursor.
//!
//! Turns an engine batch stream into pull-based chunk delivery. The cursor
//! looks one batch ahead so the chunk carrying the last rows is flagged
//! `done`; the pull after it yields the terminal address.

use std::fmt;
use std::pin::Pin;

use futures_util::stream::{Peekable, StreamExt};
use thiserror::Error;
use tracing::{debug, trace};

use batchline_chunk::{ChunkEncoder, ChunkError, RawBatch};
use batchline_common::types::ChunkAddress;

use crate::engine::{BatchStream, EngineError};

/// Cursor failures.
#[derive(Debug, Error)]
pub enum CursorError {
    /// The cursor already signalled exhaustion or failed earlier.
    #[error("cursor is exhausted")]
    Exhausted,

    /// The engine stream failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The batch could not be encoded.
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// Cursor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// More batches may follow.
    Streaming,
    /// The final chunk was delivered; the next pull is terminal.
    Draining,
    /// The terminal signal was delivered.
    Exhausted,
    /// A pull failed.
    Failed,
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorState::Streaming => write!(f, "streaming"),
            CursorState::Draining => write!(f, "draining"),
            CursorState::Exhausted => write!(f, "exhausted"),
            CursorState::Failed => write!(f, "failed"),
        }
    }
}

/// Forward-only cursor over one query's batches.
pub struct BatchCursor {
    stream: Peekable<BatchStream>,
    encoder: ChunkEncoder,
    state: CursorState,
    chunks: u64,
    rows: u64,
}

impl BatchCursor {
    /// Wraps an engine stream.
    pub fn new(stream: BatchStream, encoder: ChunkEncoder) -> Self {
        Self {
            stream: stream.peekable(),
            encoder,
            state: CursorState::Streaming,
            chunks: 0,
            rows: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Chunks written so far.
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Rows delivered so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Pulls the next chunk.
    ///
    /// Returns [`ChunkAddress::TERMINAL`] exactly once when the stream is
    /// finished. Empty intermediate batches are skipped.
    ///
    /// # Errors
    ///
    /// - [`CursorError::Exhausted`] after the terminal signal or a failure
    /// - [`CursorError::Engine`] if the stream fails
    /// - [`CursorError::Chunk`] if encoding fails
    pub async fn pull(&mut self) -> Result<ChunkAddress, CursorError> {
        match self.state {
            CursorState::Exhausted | CursorState::Failed => return Err(CursorError::Exhausted),
            CursorState::Draining => {
                self.state = CursorState::Exhausted;
                return Ok(ChunkAddress::TERMINAL);
            }
            CursorState::Streaming => {}
        }

        let (batch, done) = loop {
            let batch = match self.stream.next().await {
                None => {
                    self.state = CursorState::Exhausted;
                    return Ok(ChunkAddress::TERMINAL);
                }
                Some(Err(e)) => {
                    self.state = CursorState::Failed;
                    return Err(e.into());
                }
                Some(Ok(batch)) => batch,
            };
            let done = Pin::new(&mut self.stream).peek().await.is_none();
            if batch.num_rows() > 0 || done {
                break (batch, done);
            }
            trace!("skipping empty batch");
        };

        let rows = batch.num_rows() as u64;
        match self.encoder.encode(&RawBatch::new(batch, done)) {
            Ok(address) => {
                self.state = match (done, address.is_terminal()) {
                    (false, _) => CursorState::Streaming,
                    (true, false) => CursorState::Draining,
                    (true, true) => CursorState::Exhausted,
                };
                if !address.is_terminal() {
                    self.chunks += 1;
                    self.rows += rows;
                }
                debug!(%address, rows, done, state = %self.state, "pulled chunk");
                Ok(address)
            }
            Err(e) => {
                self.state = CursorState::Failed;
                Err(e.into())
            }
        }
    }
}

impl fmt::Debug for BatchCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCursor")
            .field("state", &self.state)
            .field("chunks", &self.chunks)
            .field("rows", &self.rows)
            .finish()
    }
}
