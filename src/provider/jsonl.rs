//! File-backed event store
//!
//! Layout under the base directory:
//!
//! ```text
//! sessions/<session_id>.json    session record, rewritten atomically
//! events/<session_id>.jsonl     append-only event partition
//! ```
//!
//! Session records are written to a temp file and renamed into place so a
//! crash never leaves a half-written record. Event partitions are appended
//! one line per entry; unreadable lines are skipped on load.

use super::{newest_first, EventStore, SessionCompletion};
use crate::error::{AuditError, Result};
use crate::types::{AuditEntry, AuditSession};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// JSONL file `EventStore`
pub struct JsonlEventStore {
    sessions_dir: PathBuf,
    events_dir: PathBuf,

    /// Per-session write locks, present only while a write is in flight
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl JsonlEventStore {
    /// Open a store rooted at `base_dir`, creating directories as needed
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let sessions_dir = base_dir.join("sessions");
        let events_dir = base_dir.join("events");

        for dir in [&sessions_dir, &events_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                AuditError::Persistence(format!(
                    "Failed to create store directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        tracing::info!(dir = %base_dir.display(), "Opened JSONL event store");
        Ok(Self {
            sessions_dir,
            events_dir,
            write_locks: DashMap::new(),
        })
    }

    fn session_path(&self, session_id: &str) -> Option<PathBuf> {
        is_safe_id(session_id).then(|| self.sessions_dir.join(format!("{}.json", session_id)))
    }

    fn events_path(&self, session_id: &str) -> Option<PathBuf> {
        is_safe_id(session_id).then(|| self.events_dir.join(format!("{}.jsonl", session_id)))
    }

    /// Shared write lock for a session, created on first use
    fn write_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Drop our handle and evict the lock once no writer holds it
    ///
    /// The count check runs under the map's shard lock, which `write_lock`
    /// also takes, so a lock is never evicted while another writer can
    /// still reach it.
    fn release_write_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.write_locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| {
                AuditError::Persistence(format!(
                    "Failed to open event partition {}: {}",
                    path.display(),
                    e
                ))
            })?;
        file.write_all(line.as_bytes()).await.map_err(|e| {
            AuditError::Persistence(format!("Failed to write audit entry: {}", e))
        })?;
        file.flush().await.map_err(|e| {
            AuditError::Persistence(format!("Failed to flush audit entry: {}", e))
        })?;
        Ok(())
    }

    async fn complete_locked(
        &self,
        session_id: &str,
        completion: &SessionCompletion,
    ) -> Result<()> {
        let mut session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| AuditError::UnknownSession(session_id.to_string()))?;

        if !completion.apply(&mut session) {
            tracing::debug!(session_id = %session_id, "Session already terminal, completion ignored");
            return Ok(());
        }
        self.write_session(&session).await
    }

    async fn write_session(&self, session: &AuditSession) -> Result<()> {
        let path = self
            .session_path(&session.session_id)
            .ok_or_else(|| invalid_id(&session.session_id))?;
        let json = serde_json::to_vec_pretty(session)?;

        // Atomic write: temp file, then rename
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await.map_err(|e| {
            AuditError::Persistence(format!(
                "Failed to write session file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        fs::rename(&tmp_path, &path).await.map_err(|e| {
            AuditError::Persistence(format!(
                "Failed to rename session file {} → {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;
        Ok(())
    }

    async fn read_session(&self, path: &Path) -> Result<Option<AuditSession>> {
        let bytes = match fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuditError::Persistence(format!(
                    "Failed to read session file {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let session = serde_json::from_slice(&bytes).map_err(|e| {
            AuditError::Persistence(format!(
                "Failed to parse session file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(session))
    }
}

#[async_trait]
impl EventStore for JsonlEventStore {
    async fn create_session(
        &self,
        user_id: &str,
        job_type: &str,
        job_id: Option<&str>,
    ) -> Result<AuditSession> {
        let session = AuditSession::new(user_id, job_type, job_id.map(String::from));
        self.write_session(&session).await?;
        Ok(session)
    }

    async fn append_event(&self, entry: &AuditEntry) -> Result<()> {
        let path = self
            .events_path(&entry.session_id)
            .ok_or_else(|| invalid_id(&entry.session_id))?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let lock = self.write_lock(&entry.session_id);
        let result = {
            let _guard = lock.lock().await;
            self.append_line(&path, &line).await
        };
        self.release_write_lock(&entry.session_id, lock);
        result
    }

    async fn get_events(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        let Some(path) = self.events_path(session_id) else {
            return Ok(Vec::new());
        };
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AuditError::Persistence(format!(
                    "Failed to open event partition {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let mut lines = BufReader::new(file).lines();
        let mut entries: Vec<AuditEntry> = Vec::new();
        while let Some(line) = lines.next_line().await.map_err(|e| {
            AuditError::Persistence(format!("Failed to read {}: {}", path.display(), e))
        })? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "Skipping unreadable audit entry"
                    );
                }
            }
        }

        entries.sort_by_key(|e| e.sequence_num);
        entries.dedup_by_key(|e| e.sequence_num);
        Ok(entries)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<AuditSession>> {
        match self.session_path(session_id) {
            Some(path) => self.read_session(&path).await,
            None => Ok(None),
        }
    }

    async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<AuditSession>> {
        let mut dir = fs::read_dir(&self.sessions_dir).await.map_err(|e| {
            AuditError::Persistence(format!(
                "Failed to read sessions dir {}: {}",
                self.sessions_dir.display(),
                e
            ))
        })?;

        let mut owned = Vec::new();
        while let Some(dir_entry) = dir.next_entry().await.map_err(|e| {
            AuditError::Persistence(format!("Failed to read dir entry: {}", e))
        })? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_session(&path).await {
                Ok(Some(session)) if session.user_id == user_id => owned.push(session),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping session file");
                }
            }
        }

        Ok(newest_first(owned, limit))
    }

    async fn complete_session(
        &self,
        session_id: &str,
        completion: &SessionCompletion,
    ) -> Result<()> {
        let lock = self.write_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.complete_locked(session_id, completion).await
        };
        self.release_write_lock(session_id, lock);
        result
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

/// Session ids become file names; reject anything that could escape the store
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn invalid_id(id: &str) -> AuditError {
    AuditError::Persistence(format!("Invalid session id: {:?}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventData, JobStarted, SessionStatus};

    fn started(session_id: &str, seq: u64) -> AuditEntry {
        AuditEntry::new(
            session_id,
            seq,
            EventData::JobStarted(JobStarted {
                job_type: "reconstruction".to_string(),
                target_words: None,
                input_words: Some(1200),
            }),
        )
    }

    #[test]
    fn test_safe_ids() {
        assert!(is_safe_id("0b6a3c8e-1f2d-4c5b-9a7e-123456789abc"));
        assert!(is_safe_id("session_1"));
        assert!(!is_safe_id(""));
        assert!(!is_safe_id("../etc/passwd"));
        assert!(!is_safe_id("a/b"));
    }

    #[tokio::test]
    async fn test_session_roundtrip_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonlEventStore::open(tmp.path()).await.unwrap();

        let session = store
            .create_session("user-1", "reconstruction", Some("job-7"))
            .await
            .unwrap();
        let path = tmp
            .path()
            .join("sessions")
            .join(format!("{}.json", session.session_id));
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let fetched = store.get_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(fetched, session);
    }

    #[tokio::test]
    async fn test_append_and_read_partition() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonlEventStore::open(tmp.path()).await.unwrap();

        for seq in 1..=3 {
            store.append_event(&started("s-1", seq)).await.unwrap();
        }
        store.append_event(&started("s-2", 1)).await.unwrap();

        let events = store.get_events("s-1").await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].sequence_num, 3);
        assert_eq!(store.get_events("s-2").await.unwrap().len(), 1);
        assert!(store.get_events("s-3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_lines_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonlEventStore::open(tmp.path()).await.unwrap();
        store.append_event(&started("s", 1)).await.unwrap();

        let path = tmp.path().join("events").join("s.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n\n");
        std::fs::write(&path, content).unwrap();
        store.append_event(&started("s", 2)).await.unwrap();

        let events = store.get_events("s").await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.sequence_num).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_invalid_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonlEventStore::open(tmp.path()).await.unwrap();

        assert!(store.get_session("../x").await.unwrap().is_none());
        assert!(store.get_events("../x").await.unwrap().is_empty());
        let err = store.append_event(&started("../x", 1)).await.unwrap_err();
        assert!(matches!(err, AuditError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_complete_session_persists_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonlEventStore::open(tmp.path()).await.unwrap();
        let session = store.create_session("u", "j", None).await.unwrap();

        let completion = SessionCompletion::new(SessionStatus::Failed, 2)
            .with_preview(Some("partial".to_string()));
        store.complete_session(&session.session_id, &completion).await.unwrap();
        store
            .complete_session(
                &session.session_id,
                &SessionCompletion::new(SessionStatus::Completed, 10),
            )
            .await
            .unwrap();

        let fetched = store.get_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Failed);
        assert_eq!(fetched.total_events, 2);
        assert_eq!(fetched.final_output_preview.as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn test_list_sessions_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonlEventStore::open(tmp.path()).await.unwrap();

        let first = store.create_session("alice", "a", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create_session("alice", "b", None).await.unwrap();
        store.create_session("bob", "c", None).await.unwrap();

        let listed = store.list_sessions("alice", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session_id, second.session_id);
        assert_eq!(listed[1].session_id, first.session_id);
    }

    #[tokio::test]
    async fn test_write_locks_released_after_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonlEventStore::open(tmp.path()).await.unwrap();
        let session = store.create_session("u", "j", None).await.unwrap();
        let id = session.session_id.clone();

        store.append_event(&started(&id, 1)).await.unwrap();
        assert!(store.write_locks.is_empty());

        store
            .complete_session(&id, &SessionCompletion::new(SessionStatus::Completed, 2))
            .await
            .unwrap();
        // a straggling append after completion must not leave a lock behind
        store.append_event(&started(&id, 2)).await.unwrap();
        assert!(store.write_locks.is_empty());
        assert_eq!(store.get_events(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_share_one_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlEventStore::open(tmp.path()).await.unwrap());

        // a writer holding the lock keeps it registered for everyone else
        let held = store.write_lock("s");
        let guard = held.lock().await;
        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.append_event(&started("s", 1)).await })
        };
        tokio::task::yield_now().await;
        assert!(Arc::ptr_eq(&held, &store.write_lock("s")));
        drop(guard);
        pending.await.unwrap().unwrap();
        store.release_write_lock("s", held);

        let mut handles = Vec::new();
        for seq in 2..=41 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append_event(&started("s", seq)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let events = store.get_events("s").await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.sequence_num).collect();
        assert_eq!(seqs, (1..=41).collect::<Vec<u64>>());
        assert!(store.write_locks.is_empty());
    }
}
