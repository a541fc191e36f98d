//! Query session registry.
//!
//! Maps query ids to their cursors. A session lives from a successful
//! submission until its cursor reports the terminal signal, fails, or times
//! out. Each session sits behind its own async mutex, so pulls for one
//! query are serialized while other queries proceed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use batchline_common::types::{ChunkAddress, QueryId};

use crate::cursor::{BatchCursor, CursorState};
use crate::error::{BridgeError, BridgeResult};

/// One registered query.
#[derive(Debug)]
pub struct QuerySession {
    id: QueryId,
    sql: String,
    cursor: BatchCursor,
    created_at: Instant,
    chunks_delivered: u64,
}

impl QuerySession {
    /// Creates a session around a cursor.
    pub fn new(id: QueryId, sql: impl Into<String>, cursor: BatchCursor) -> Self {
        Self {
            id,
            sql: sql.into(),
            cursor,
            created_at: Instant::now(),
            chunks_delivered: 0,
        }
    }

    /// The query id.
    pub fn id(&self) -> &QueryId {
        &self.id
    }

    /// The submitted statement.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The cursor's lifecycle state.
    pub fn state(&self) -> CursorState {
        self.cursor.state()
    }

    /// Time since registration.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Non-terminal chunks delivered.
    pub fn chunks_delivered(&self) -> u64 {
        self.chunks_delivered
    }
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Sessions currently registered.
    pub active_sessions: usize,
    /// Sessions ever registered.
    pub total_registered: u64,
    /// Chunks delivered across all sessions.
    pub total_chunks: u64,
}

/// Process-wide query session registry.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    sessions: DashMap<QueryId, Arc<Mutex<QuerySession>>>,
    total_registered: AtomicU64,
    total_chunks: AtomicU64,
}

impl QueryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DuplicateQuery`] if the id is already present;
    /// the existing session is left untouched.
    pub fn register(&self, session: QuerySession) -> BridgeResult<()> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(entry) => Err(BridgeError::DuplicateQuery(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(query_id = %session.id, "registered query");
                entry.insert(Arc::new(Mutex::new(session)));
                self.total_registered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Looks up a session.
    pub fn lookup(&self, id: &QueryId) -> Option<Arc<Mutex<QuerySession>>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns true if `id` is registered.
    pub fn contains(&self, id: &QueryId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Removes a session. Returns false if it was not registered.
    pub fn remove(&self, id: &QueryId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Pulls the next chunk for `id`.
    ///
    /// The session is removed when the pull returns the terminal address,
    /// fails, or exceeds `timeout`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::UnknownQuery`] for an unregistered id
    /// - [`BridgeError::Timeout`] if the pull exceeds `timeout`
    /// - cursor failures mapped through [`BridgeError::from_cursor`]
    pub async fn pull(&self, id: &QueryId, timeout: Option<Duration>) -> BridgeResult<ChunkAddress> {
        let session = self
            .lookup(id)
            .ok_or_else(|| BridgeError::UnknownQuery(id.clone()))?;
        let mut session = session.lock().await;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, session.cursor.pull()).await {
                Ok(outcome) => outcome.map_err(|e| BridgeError::from_cursor(id, e)),
                Err(_) => Err(BridgeError::Timeout {
                    query_id: id.clone(),
                    secs: limit.as_secs(),
                }),
            },
            None => session
                .cursor
                .pull()
                .await
                .map_err(|e| BridgeError::from_cursor(id, e)),
        };

        match outcome {
            Ok(address) if address.is_terminal() => {
                info!(
                    query_id = %id,
                    chunks = session.chunks_delivered,
                    rows = session.cursor.rows(),
                    elapsed_ms = session.age().as_millis() as u64,
                    "query complete"
                );
                drop(session);
                self.remove(id);
                Ok(address)
            }
            Ok(address) => {
                session.chunks_delivered += 1;
                self.total_chunks.fetch_add(1, Ordering::Relaxed);
                Ok(address)
            }
            // a concurrent pull already finished this query
            Err(e @ BridgeError::CursorExhausted(_)) => Err(e),
            Err(e) => {
                warn!(query_id = %id, error = %e, "pull failed, dropping query");
                debug!(query_id = %id, sql = session.sql(), "dropped statement");
                drop(session);
                self.remove(id);
                Err(e)
            }
        }
    }

    /// Registered query ids.
    pub fn ids(&self) -> Vec<QueryId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_sessions: self.sessions.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_chunks: self.total_chunks.load(Ordering::Relaxed),
        }
    }
}
