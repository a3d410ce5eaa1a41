//! Registry of live audit sessions
//!
//! `SessionRegistry` is an explicitly owned table, created at process
//! start and shared by handle (`Arc<SessionRegistry>`) with every
//! component that needs it. Entries are added when a session starts and
//! evicted when it completes. Nothing here is durable; after a restart the
//! event store is the only record, and sessions must be resumed from it.
//!
//! A session whose executor dies without completing stays registered
//! until something external evicts it.

use crate::broadcast::SubscriberSet;
use crate::types::{AuditEntry, AuditSession, EventData};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// In-memory projection of a running session
///
/// Identity fields are immutable; everything that changes per event sits
/// behind the session's own lock.
#[derive(Debug)]
pub struct ActiveSession {
    session_id: String,
    user_id: String,
    job_type: String,
    job_id: Option<String>,
    started_at: DateTime<Utc>,
    state: Mutex<LiveState>,
}

impl ActiveSession {
    /// Fresh live state: counter at zero, empty buffer, no subscribers
    pub fn new(session: &AuditSession) -> Self {
        Self::with_history(session, Vec::new())
    }

    /// Rebuild live state from persisted entries (sorted ascending)
    ///
    /// The counter continues from the highest persisted sequence number.
    pub fn with_history(session: &AuditSession, entries: Vec<AuditEntry>) -> Self {
        let sequence_counter = entries.last().map(|e| e.sequence_num).unwrap_or(0);
        Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            job_type: session.job_type.clone(),
            job_id: session.job_id.clone(),
            started_at: session.started_at,
            state: Mutex::new(LiveState {
                sequence_counter,
                entries,
                subscribers: SubscriberSet::default(),
                closed: false,
                notified: false,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Acquire the per-session lock
    ///
    /// Hold it only for sequencing, buffering, and enqueueing to
    /// subscribers; never across persistence calls.
    pub async fn lock(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().await
    }

    /// Current value of the sequence counter
    pub async fn sequence(&self) -> u64 {
        self.state.lock().await.sequence_counter
    }

    /// Snapshot of the replay buffer
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.entries.clone()
    }
}

/// Mutable per-session state guarded by the session lock
#[derive(Debug)]
pub struct LiveState {
    sequence_counter: u64,
    entries: Vec<AuditEntry>,
    subscribers: SubscriberSet,

    /// No further submissions accepted
    closed: bool,

    /// Terminal notice delivered; subscriber set discarded
    notified: bool,
}

impl LiveState {
    /// Assign the next sequence number and append to the replay buffer
    pub(crate) fn stamp(&mut self, session_id: &str, data: EventData) -> AuditEntry {
        self.sequence_counter += 1;
        let entry = AuditEntry::new(session_id, self.sequence_counter, data);
        self.entries.push(entry.clone());
        entry
    }

    pub fn sequence_counter(&self) -> u64 {
        self.sequence_counter
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn subscribers(&self) -> &SubscriberSet {
        &self.subscribers
    }

    pub(crate) fn subscribers_mut(&mut self) -> &mut SubscriberSet {
        &mut self.subscribers
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_notified(&self) -> bool {
        self.notified
    }

    pub(crate) fn mark_notified(&mut self) {
        self.notified = true;
    }
}

/// Process-wide table of live sessions
///
/// Sharded map with per-key locking, so unrelated sessions never contend.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<ActiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ActiveSession>> {
        self.sessions.get(session_id).map(|r| r.value().clone())
    }

    /// Insert or replace
    pub fn put(&self, session_id: &str, active: Arc<ActiveSession>) {
        self.sessions.insert(session_id.to_string(), active);
    }

    /// Insert unless present; returns whichever entry ends up registered
    pub fn put_if_absent(&self, session_id: &str, active: Arc<ActiveSession>) -> Arc<ActiveSession> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert(active)
            .value()
            .clone()
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<ActiveSession>> {
        self.sessions.remove(session_id).map(|(_, v)| v)
    }

    /// Live session for an external job id (linear scan)
    pub fn find_by_job_id(&self, job_id: &str) -> Option<String> {
        self.sessions
            .iter()
            .find(|r| r.value().job_id() == Some(job_id))
            .map(|r| r.key().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorEvent;

    fn error_data() -> EventData {
        EventData::Error(ErrorEvent {
            error_type: "parse".to_string(),
            message: "bad chunk".to_string(),
            context: "splitter".to_string(),
            chunk_index: None,
            will_retry: false,
        })
    }

    #[test]
    fn test_put_get_remove() {
        let registry = SessionRegistry::new();
        let session = AuditSession::new("u", "j", None);
        let id = session.session_id.clone();

        assert!(registry.is_empty());
        registry.put(&id, Arc::new(ActiveSession::new(&session)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).unwrap().user_id(), "u");
        assert_eq!(registry.session_ids(), vec![id.clone()]);

        assert!(registry.remove(&id).is_some());
        assert!(registry.get(&id).is_none());
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_find_by_job_id() {
        let registry = SessionRegistry::new();
        let with_job = AuditSession::new("u", "j", Some("job-42".to_string()));
        let without_job = AuditSession::new("u", "j", None);
        registry.put(&with_job.session_id, Arc::new(ActiveSession::new(&with_job)));
        registry.put(&without_job.session_id, Arc::new(ActiveSession::new(&without_job)));

        assert_eq!(
            registry.find_by_job_id("job-42"),
            Some(with_job.session_id.clone())
        );
        assert_eq!(registry.find_by_job_id("job-43"), None);
    }

    #[test]
    fn test_put_if_absent_keeps_existing() {
        let registry = SessionRegistry::new();
        let session = AuditSession::new("u", "j", None);
        let first = Arc::new(ActiveSession::new(&session));
        let second = Arc::new(ActiveSession::new(&session));

        let kept = registry.put_if_absent(&session.session_id, first.clone());
        assert!(Arc::ptr_eq(&kept, &first));
        let kept = registry.put_if_absent(&session.session_id, second);
        assert!(Arc::ptr_eq(&kept, &first));
    }

    #[tokio::test]
    async fn test_stamp_is_gap_free() {
        let session = AuditSession::new("u", "j", None);
        let active = ActiveSession::new(&session);

        {
            let mut live = active.lock().await;
            for expected in 1..=3 {
                let entry = live.stamp(session.session_id.as_str(), error_data());
                assert_eq!(entry.sequence_num, expected);
            }
        }

        assert_eq!(active.sequence().await, 3);
        assert_eq!(active.entries().await.len(), 3);
    }

    #[tokio::test]
    async fn test_with_history_continues_counter() {
        let session = AuditSession::new("u", "j", None);
        let history = vec![
            AuditEntry::new(&session.session_id, 1, error_data()),
            AuditEntry::new(&session.session_id, 2, error_data()),
        ];
        let active = ActiveSession::with_history(&session, history);

        let entry = active.lock().await.stamp(&session.session_id, error_data());
        assert_eq!(entry.sequence_num, 3);
        assert_eq!(active.entries().await.len(), 3);
    }
}
