//! Event store trait — the durable side of the audit log
//!
//! All storage backends (in-memory, JSONL files, ...) implement
//! `EventStore` to provide a uniform API for session records and their
//! append-only event partitions. The store is pure persistence: it knows
//! nothing about live sessions or subscribers.

use crate::error::Result;
use crate::types::{AuditEntry, AuditSession, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod jsonl;
pub mod memory;

/// Core trait for durable audit storage
///
/// One partition per session. Implementations must be safe to call
/// concurrently for different sessions.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new running session and return it
    ///
    /// Failure here is fatal for the caller: no session id exists yet.
    async fn create_session(
        &self,
        user_id: &str,
        job_type: &str,
        job_id: Option<&str>,
    ) -> Result<AuditSession>;

    /// Persist one sequenced entry
    ///
    /// Works whether or not the session is still live in this process.
    async fn append_event(&self, entry: &AuditEntry) -> Result<()>;

    /// All persisted entries for a session, ascending by sequence number
    async fn get_events(&self, session_id: &str) -> Result<Vec<AuditEntry>>;

    /// Fetch a session record
    async fn get_session(&self, session_id: &str) -> Result<Option<AuditSession>>;

    /// Sessions owned by `user_id`, newest first by `started_at`
    async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<AuditSession>>;

    /// Record terminal fields
    ///
    /// Idempotent: completing an already-terminal session is a no-op.
    async fn complete_session(&self, session_id: &str, completion: &SessionCompletion)
        -> Result<()>;

    /// Backend name (e.g., "memory", "jsonl")
    fn name(&self) -> &str;

    /// Health check — returns true if the backend is reachable
    ///
    /// Default implementation probes `list_sessions`.
    async fn health(&self) -> Result<bool> {
        self.list_sessions("", 1).await.map(|_| true)
    }
}

/// Terminal fields written when a session finishes
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCompletion {
    pub status: SessionStatus,
    pub completed_at: DateTime<Utc>,
    pub final_output_preview: Option<String>,
    pub total_events: u64,
}

impl SessionCompletion {
    pub fn new(status: SessionStatus, total_events: u64) -> Self {
        Self {
            status,
            completed_at: Utc::now(),
            final_output_preview: None,
            total_events,
        }
    }

    pub fn with_preview(mut self, preview: Option<String>) -> Self {
        self.final_output_preview = preview;
        self
    }

    /// Apply to a session record; returns false if it was already terminal
    pub(crate) fn apply(&self, session: &mut AuditSession) -> bool {
        if session.status.is_terminal() {
            return false;
        }
        session.status = self.status;
        session.completed_at = Some(self.completed_at);
        session.final_output_preview = self.final_output_preview.clone();
        session.total_events = self.total_events;
        true
    }
}

/// Order sessions newest first and keep at most `limit`
pub(crate) fn newest_first(mut sessions: Vec<AuditSession>, limit: usize) -> Vec<AuditSession> {
    sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    sessions.truncate(limit);
    sessions
}
