//! In-memory event store
//!
//! Keeps sessions and event partitions in process memory. Useful for
//! tests and single-process deployments where restart loss is acceptable.

use super::{newest_first, EventStore, SessionCompletion};
use crate::error::{AuditError, Result};
use crate::types::{AuditEntry, AuditSession};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory `EventStore`
#[derive(Default)]
pub struct MemoryEventStore {
    sessions: RwLock<HashMap<String, AuditSession>>,

    /// session_id → entries, kept sorted by sequence number
    events: RwLock<HashMap<String, Vec<AuditEntry>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total persisted entries across all sessions
    pub async fn event_count(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn create_session(
        &self,
        user_id: &str,
        job_type: &str,
        job_id: Option<&str>,
    ) -> Result<AuditSession> {
        let session = AuditSession::new(user_id, job_type, job_id.map(String::from));
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn append_event(&self, entry: &AuditEntry) -> Result<()> {
        let mut events = self.events.write().await;
        let partition = events.entry(entry.session_id.clone()).or_default();

        match partition.binary_search_by_key(&entry.sequence_num, |e| e.sequence_num) {
            Ok(_) => Err(AuditError::Persistence(format!(
                "Duplicate sequence {} for session {}",
                entry.sequence_num, entry.session_id
            ))),
            Err(pos) => {
                partition.insert(pos, entry.clone());
                Ok(())
            }
        }
    }

    async fn get_events(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        let events = self.events.read().await;
        Ok(events.get(session_id).cloned().unwrap_or_default())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<AuditSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<AuditSession>> {
        let sessions = self.sessions.read().await;
        let owned: Vec<AuditSession> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(owned, limit))
    }

    async fn complete_session(
        &self,
        session_id: &str,
        completion: &SessionCompletion,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AuditError::UnknownSession(session_id.to_string()))?;

        if !completion.apply(session) {
            tracing::debug!(session_id = %session_id, "Session already terminal, completion ignored");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
