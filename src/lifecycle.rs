//! Session lifecycle: start, sequenced submission, completion
//!
//! `AuditService` is the single entry point job executors and readers use.
//! For each session it is the one place sequence numbers are assigned:
//! under the session lock it increments the counter, buffers the entry,
//! and enqueues it to subscribers; only then, with the lock released, is
//! the entry written to the event store. A store failure is logged and
//! never interrupts the live stream.

use crate::broadcast::{Broadcaster, Subscriber, SubscriberId};
use crate::error::{AuditError, Result};
use crate::provider::{EventStore, SessionCompletion};
use crate::registry::{ActiveSession, SessionRegistry};
use crate::types::{
    truncate_chars, AuditEntry, AuditSession, ChunkProcessed, DbInsert, DbQuery, DbUpdate,
    ErrorEvent, EventData, JobCompleted, JobStarted, LlmCall, SessionReport, SessionStatus,
    SkeletonExtracted, StitchPass, MAX_OUTPUT_PREVIEW_CHARS, MAX_PREVIEW_CHARS, MAX_SQL_CHARS,
};
use std::sync::Arc;

/// Parameters for opening a session
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub user_id: String,
    pub job_type: String,
    pub job_id: Option<String>,
    pub target_words: Option<u64>,
    pub input_words: Option<u64>,
}

impl SessionRequest {
    pub fn new(user_id: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            job_type: job_type.into(),
            ..Default::default()
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_target_words(mut self, words: u64) -> Self {
        self.target_words = Some(words);
        self
    }

    pub fn with_input_words(mut self, words: u64) -> Self {
        self.input_words = Some(words);
        self
    }
}

/// How a job ended
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub success: bool,
    pub final_output_preview: Option<String>,
    pub actual_words: Option<u64>,
    pub target_words: Option<u64>,
}

impl JobOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.final_output_preview = Some(preview.into());
        self
    }

    pub fn with_words(mut self, actual: u64, target: u64) -> Self {
        self.actual_words = Some(actual);
        self.target_words = Some(target);
        self
    }
}

/// Audit log service: sequencing, persistence, and live fan-out
pub struct AuditService {
    store: Arc<dyn EventStore>,
    registry: Arc<SessionRegistry>,
    broadcaster: Broadcaster,
}

impl AuditService {
    /// Build a service over a store and a shared registry
    pub fn new(store: Arc<dyn EventStore>, registry: Arc<SessionRegistry>) -> Self {
        let broadcaster = Broadcaster::new(registry.clone());
        Self {
            store,
            registry,
            broadcaster,
        }
    }

    /// Build a service with its own empty registry
    pub fn with_store(store: impl EventStore + 'static) -> Self {
        Self::new(Arc::new(store), Arc::new(SessionRegistry::new()))
    }

    pub fn store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Open a session and log its `job_started` entry
    ///
    /// Fails only if the store cannot create the session record.
    pub async fn start_session(&self, request: SessionRequest) -> Result<String> {
        let session = self
            .store
            .create_session(
                &request.user_id,
                &request.job_type,
                request.job_id.as_deref(),
            )
            .await?;
        let session_id = session.session_id.clone();

        self.registry
            .put(&session_id, Arc::new(ActiveSession::new(&session)));

        tracing::info!(
            session_id = %session_id,
            user_id = %request.user_id,
            job_type = %request.job_type,
            job_id = ?request.job_id,
            "Audit session started"
        );

        self.submit_event(
            &session_id,
            EventData::JobStarted(JobStarted {
                job_type: request.job_type,
                target_words: request.target_words,
                input_words: request.input_words,
            }),
        )
        .await?;

        Ok(session_id)
    }

    /// Sequence, buffer, broadcast, then persist one event
    ///
    /// Calls for the same session are serialized; calls for different
    /// sessions proceed independently. Persistence errors are logged, not
    /// returned.
    pub async fn submit_event(&self, session_id: &str, data: EventData) -> Result<AuditEntry> {
        let active = self
            .registry
            .get(session_id)
            .ok_or_else(|| AuditError::UnknownSession(session_id.to_string()))?;

        let entry = {
            let mut live = active.lock().await;
            if live.is_closed() {
                return Err(AuditError::UnknownSession(session_id.to_string()));
            }
            let entry = live.stamp(session_id, data);
            self.broadcaster.publish_locked(&mut live, &entry);
            entry
        };

        tracing::debug!(
            session_id = %session_id,
            sequence = entry.sequence_num,
            event_type = %entry.event_type(),
            "Audit entry submitted"
        );

        self.persist(&entry).await;
        Ok(entry)
    }

    /// Finish a session: log `job_completed`, record terminal fields,
    /// notify subscribers, and evict from the registry
    ///
    /// A second call is a logged no-op. Completing a session the store has
    /// never seen fails with `UnknownSession`.
    pub async fn complete_session(&self, session_id: &str, outcome: JobOutcome) -> Result<()> {
        let Some(active) = self.registry.get(session_id) else {
            return self.complete_inactive(session_id).await;
        };

        let status = if outcome.success {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };

        let entry = {
            let mut live = active.lock().await;
            if live.is_closed() {
                tracing::debug!(session_id = %session_id, "Session already completing, no-op");
                return Ok(());
            }
            let entry = live.stamp(
                session_id,
                EventData::JobCompleted(JobCompleted {
                    job_type: active.job_type().to_string(),
                    target_words: outcome.target_words,
                    actual_words: outcome.actual_words,
                    success: outcome.success,
                }),
            );
            self.broadcaster.publish_locked(&mut live, &entry);
            live.close();
            entry
        };
        let total_entries = entry.sequence_num;

        self.persist(&entry).await;

        let preview = outcome
            .final_output_preview
            .as_deref()
            .map(|p| truncate_chars(p, MAX_OUTPUT_PREVIEW_CHARS));
        let completion = SessionCompletion::new(status, total_entries).with_preview(preview);
        if let Err(e) = self.store.complete_session(session_id, &completion).await {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "Failed to persist session completion"
            );
        }

        self.broadcaster
            .notify_terminal(session_id, status, total_entries)
            .await;
        self.registry.remove(session_id);

        tracing::info!(
            session_id = %session_id,
            status = %status,
            total_entries,
            "Audit session completed"
        );
        Ok(())
    }

    async fn complete_inactive(&self, session_id: &str) -> Result<()> {
        match self.store.get_session(session_id).await {
            Ok(Some(_)) => {
                tracing::debug!(session_id = %session_id, "Session not active, completion is a no-op");
                Ok(())
            }
            Ok(None) => Err(AuditError::UnknownSession(session_id.to_string())),
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Session not active and store lookup failed, completion is a no-op"
                );
                Ok(())
            }
        }
    }

    /// Re-register a durably running session after a restart
    ///
    /// The counter and replay buffer are rebuilt from the store so
    /// numbering continues after the last persisted entry. Resuming a
    /// session that is already live is a no-op.
    pub async fn resume_session(&self, session_id: &str) -> Result<()> {
        if self.registry.get(session_id).is_some() {
            return Ok(());
        }

        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AuditError::UnknownSession(session_id.to_string()))?;
        if session.status.is_terminal() {
            return Err(AuditError::UnknownSession(format!(
                "{} is already {}",
                session_id, session.status
            )));
        }

        let history = self.store.get_events(session_id).await?;
        let active = Arc::new(ActiveSession::with_history(&session, history));
        let registered = self.registry.put_if_absent(session_id, active);

        tracing::info!(
            session_id = %session_id,
            sequence = registered.sequence().await,
            "Audit session resumed"
        );
        Ok(())
    }

    async fn persist(&self, entry: &AuditEntry) {
        if let Err(e) = self.store.append_event(entry).await {
            tracing::error!(
                session_id = %entry.session_id,
                sequence = entry.sequence_num,
                error = %e,
                "Failed to persist audit entry; delivered live only"
            );
        }
    }

    // ─── Subscriptions ──────────────────────────────────────────────

    /// Attach a live subscriber (buffered replay, then live tail)
    pub async fn subscribe(&self, session_id: &str, subscriber: Subscriber) -> Result<()> {
        self.broadcaster.subscribe(session_id, subscriber).await
    }

    pub async fn unsubscribe(&self, session_id: &str, subscriber_id: SubscriberId) {
        self.broadcaster.unsubscribe(session_id, subscriber_id).await
    }

    // ─── Queries ────────────────────────────────────────────────────

    pub async fn get_session(&self, session_id: &str) -> Result<Option<AuditSession>> {
        self.store.get_session(session_id).await
    }

    /// Sessions for a user, newest first, skipping `offset`
    pub async fn list_sessions(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditSession>> {
        let sessions = self
            .store
            .list_sessions(user_id, limit.saturating_add(offset))
            .await?;
        Ok(sessions.into_iter().skip(offset).take(limit).collect())
    }

    /// Durable history of a session, independent of live state
    pub async fn get_history(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        self.store.get_events(session_id).await
    }

    /// Session record, all entries, and per-type tallies
    pub async fn get_report(&self, session_id: &str) -> Result<Option<SessionReport>> {
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(None);
        };
        let entries = self.store.get_events(session_id).await?;
        Ok(Some(SessionReport::new(session, entries)))
    }

    /// The live session for an external job, if one is running
    pub fn active_session_for_job(&self, job_id: &str) -> Option<String> {
        self.registry.find_by_job_id(job_id)
    }

    // ─── Convenience loggers ────────────────────────────────────────

    /// Submit any event with payload size limits applied
    pub async fn log_event(&self, session_id: &str, data: EventData) -> Result<AuditEntry> {
        self.submit_event(session_id, enforce_limits(data)).await
    }

    pub async fn log_query(&self, session_id: &str, query: DbQuery) -> Result<AuditEntry> {
        self.log_event(session_id, EventData::DbQuery(query)).await
    }

    pub async fn log_insert(&self, session_id: &str, insert: DbInsert) -> Result<AuditEntry> {
        self.submit_event(session_id, EventData::DbInsert(insert)).await
    }

    pub async fn log_update(&self, session_id: &str, update: DbUpdate) -> Result<AuditEntry> {
        self.submit_event(session_id, EventData::DbUpdate(update)).await
    }

    pub async fn log_llm_call(&self, session_id: &str, call: LlmCall) -> Result<AuditEntry> {
        self.log_event(session_id, EventData::LlmCall(call)).await
    }

    pub async fn log_chunk_processed(
        &self,
        session_id: &str,
        chunk: ChunkProcessed,
    ) -> Result<AuditEntry> {
        self.submit_event(session_id, EventData::ChunkProcessed(chunk))
            .await
    }

    pub async fn log_skeleton_extracted(
        &self,
        session_id: &str,
        skeleton: SkeletonExtracted,
    ) -> Result<AuditEntry> {
        self.submit_event(session_id, EventData::SkeletonExtracted(skeleton))
            .await
    }

    pub async fn log_stitch_pass(&self, session_id: &str, pass: StitchPass) -> Result<AuditEntry> {
        self.submit_event(session_id, EventData::StitchPass(pass)).await
    }

    pub async fn log_error(&self, session_id: &str, error: ErrorEvent) -> Result<AuditEntry> {
        self.submit_event(session_id, EventData::Error(error)).await
    }
}

/// Truncate SQL text and LLM previews to their stored limits
fn enforce_limits(data: EventData) -> EventData {
    match data {
        EventData::DbQuery(mut query) => {
            query.sql = truncate_chars(&query.sql, MAX_SQL_CHARS);
            EventData::DbQuery(query)
        }
        EventData::LlmCall(mut call) => {
            call.prompt_preview = truncate_chars(&call.prompt_preview, MAX_PREVIEW_CHARS);
            call.response_preview = truncate_chars(&call.response_preview, MAX_PREVIEW_CHARS);
            EventData::LlmCall(call)
        }
        other => other,
    }
}
