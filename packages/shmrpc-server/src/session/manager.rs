//! SessionManager - owns every live client session
//!
//! Sessions are created on registration, fed every mutation batch in
//! arrival order, drained by client polls, and torn down either
//! explicitly or by the periodic expiry sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::batch::{EdgeBatch, EdgePair};
use crate::error::{Result, ServerError};
use crate::registry::RegistryReader;
use crate::session::{CommunitySubgraph, Delta};

/// Unique identifier for a registered session
pub type SessionId = u64;

/// Session information for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub algorithm: String,
    pub column: String,
    pub source: i64,
    pub members: usize,
    pub idle: Duration,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, CommunitySubgraph>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl SessionManager {
    /// Create a manager expiring sessions idle for longer than `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, CommunitySubgraph>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register `session` against the reader's epoch and start tracking it.
    ///
    /// Returns the new id and the initial subgraph. A session that fails
    /// to register is dropped.
    pub fn register(
        &self,
        mut session: CommunitySubgraph,
        reader: &RegistryReader<'_>,
    ) -> Result<(SessionId, Vec<EdgePair>)> {
        let subgraph = session.register(reader)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions().insert(id, session);

        tracing::info!(session = id, edges = subgraph.len(), "session registered");
        Ok((id, subgraph))
    }

    /// Drain pending edges of session `id`.
    pub fn poll(&self, id: SessionId) -> Result<Delta> {
        self.sessions()
            .get_mut(&id)
            .map(|s| s.poll())
            .ok_or(ServerError::SessionNotFound(id))
    }

    pub fn unregister(&self, id: SessionId) -> Result<()> {
        match self.sessions().remove(&id) {
            Some(mut session) => {
                session.expire();
                tracing::info!(session = id, "session unregistered");
                Ok(())
            }
            None => Err(ServerError::SessionNotFound(id)),
        }
    }

    /// Feed one batch to every session.
    ///
    /// A session that fails to update is logged and left as it was; the
    /// others still receive the batch. Returns the number of failures.
    pub fn apply_batch(&self, reader: &RegistryReader<'_>, batch: &EdgeBatch) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let mut failed = 0;
        for (id, session) in self.sessions().iter_mut() {
            if let Err(e) = session.update(reader, batch) {
                tracing::warn!(session = id, code = e.code(), "session update failed: {}", e);
                failed += 1;
            }
        }
        failed
    }

    /// Remove sessions idle for longer than the timeout at `now`.
    ///
    /// Returns the ids removed.
    pub fn sweep_expired(&self, now: Instant) -> Vec<SessionId> {
        let mut sessions = self.sessions();
        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(self.timeout, now))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(mut session) = sessions.remove(id) {
                session.expire();
                tracing::info!(session = id, "session expired");
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list_sessions(&self, now: Instant) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions()
            .iter()
            .map(|(id, s)| SessionInfo {
                id: *id,
                algorithm: s.algorithm_name().to_string(),
                column: s.column_name().to_string(),
                source: s.source(),
                members: s.members().len(),
                idle: now.saturating_duration_since(s.last_activity()),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}
