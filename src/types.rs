//! Core audit types: sessions, sequenced entries, and the event taxonomy
//!
//! All types use camelCase JSON serialization for wire compatibility.
//! Event payloads are a closed tagged union: an entry serializes as
//! `{sessionId, sequenceNum, timestamp, eventType, eventData}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum characters kept from a logged SQL statement
pub const MAX_SQL_CHARS: usize = 500;

/// Maximum characters kept from LLM prompt/response previews
pub const MAX_PREVIEW_CHARS: usize = 200;

/// Maximum characters kept from a session's final output preview
pub const MAX_OUTPUT_PREVIEW_CHARS: usize = 500;

/// Lifecycle status of an audit session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Terminal statuses accept no further events
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one job's audit session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSession {
    /// Session identifier (UUID v4)
    pub session_id: String,

    /// Owning user
    pub user_id: String,

    /// Free-form job tag (e.g., "reconstruction")
    pub job_type: String,

    /// Back-reference to the external job, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: SessionStatus,

    /// Truncated summary of the job's final output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output_preview: Option<String>,

    /// Number of entries the session produced (set on completion)
    #[serde(default)]
    pub total_events: u64,
}

impl AuditSession {
    /// Create a running session with a fresh id and `started_at = now`
    pub fn new(
        user_id: impl Into<String>,
        job_type: impl Into<String>,
        job_id: Option<String>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            job_type: job_type.into(),
            job_id,
            started_at: Utc::now(),
            completed_at: None,
            status: SessionStatus::Running,
            final_output_preview: None,
            total_events: 0,
        }
    }
}

/// One immutable, sequence-numbered fact about a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub session_id: String,

    /// 1-based, gap-free, sole ordering authority within the session
    pub sequence_num: u64,

    /// Wall clock at append; informational only
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub data: EventData,
}

impl AuditEntry {
    /// Stamp a payload with its sequence number and the current time
    pub fn new(session_id: impl Into<String>, sequence_num: u64, data: EventData) -> Self {
        Self {
            session_id: session_id.into(),
            sequence_num,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.data.event_type()
    }
}

/// Tag of an [`EventData`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobStarted,
    DbQuery,
    DbInsert,
    DbUpdate,
    LlmCall,
    ChunkProcessed,
    SkeletonExtracted,
    StitchPass,
    Error,
    JobCompleted,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobStarted => "job_started",
            Self::DbQuery => "db_query",
            Self::DbInsert => "db_insert",
            Self::DbUpdate => "db_update",
            Self::LlmCall => "llm_call",
            Self::ChunkProcessed => "chunk_processed",
            Self::SkeletonExtracted => "skeleton_extracted",
            Self::StitchPass => "stitch_pass",
            Self::Error => "error",
            Self::JobCompleted => "job_completed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed event payload, one variant per event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "eventData", rename_all = "snake_case")]
pub enum EventData {
    JobStarted(JobStarted),
    DbQuery(DbQuery),
    DbInsert(DbInsert),
    DbUpdate(DbUpdate),
    LlmCall(LlmCall),
    ChunkProcessed(ChunkProcessed),
    SkeletonExtracted(SkeletonExtracted),
    StitchPass(StitchPass),
    Error(ErrorEvent),
    JobCompleted(JobCompleted),
}

impl EventData {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::JobStarted(_) => EventType::JobStarted,
            Self::DbQuery(_) => EventType::DbQuery,
            Self::DbInsert(_) => EventType::DbInsert,
            Self::DbUpdate(_) => EventType::DbUpdate,
            Self::LlmCall(_) => EventType::LlmCall,
            Self::ChunkProcessed(_) => EventType::ChunkProcessed,
            Self::SkeletonExtracted(_) => EventType::SkeletonExtracted,
            Self::StitchPass(_) => EventType::StitchPass,
            Self::Error(_) => EventType::Error,
            Self::JobCompleted(_) => EventType::JobCompleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStarted {
    pub job_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_words: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_words: Option<u64>,
}

/// SQL statement class of a logged query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DbOperation {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbQuery {
    /// Statement text, truncated to [`MAX_SQL_CHARS`]
    pub sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub table: String,
    pub operation: DbOperation,
    pub rows_returned: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInsert {
    pub table: String,
    pub row_id: String,
    pub key_fields: serde_json::Value,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbUpdate {
    pub table: String,
    pub row_id: String,
    pub fields_updated: Vec<String>,
    pub new_values: serde_json::Value,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmCall {
    pub model: String,
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Truncated to [`MAX_PREVIEW_CHARS`]
    pub prompt_preview: String,
    /// Truncated to [`MAX_PREVIEW_CHARS`]
    pub response_preview: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProcessed {
    pub chunk_index: u32,
    pub input_words: u64,
    pub output_words: u64,
    pub target_words: u64,
    pub within_tolerance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims_addressed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkeletonExtracted {
    pub claims_count: u32,
    pub terms_count: u32,
    pub structural_requirements: Vec<String>,
    pub total_target_words: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StitchPass {
    pub coherence_score: f64,
    pub claims_covered: u32,
    pub claims_missing: u32,
    pub topic_violations: u32,
    pub repairs_needed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub error_type: String,
    pub message: String,
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    pub will_retry: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCompleted {
    pub job_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_words: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_words: Option<u64>,
    pub success: bool,
}

/// Per-type tallies computed over a session's entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total_events: u64,
    pub db_queries: u64,
    pub db_inserts: u64,
    pub db_updates: u64,
    pub llm_calls: u64,
    pub chunks_processed: u64,
    pub errors: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_llm_duration_ms: u64,
}

impl SessionSummary {
    pub fn from_entries(entries: &[AuditEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            summary.total_events += 1;
            match &entry.data {
                EventData::DbQuery(_) => summary.db_queries += 1,
                EventData::DbInsert(_) => summary.db_inserts += 1,
                EventData::DbUpdate(_) => summary.db_updates += 1,
                EventData::LlmCall(call) => {
                    summary.llm_calls += 1;
                    summary.total_input_tokens += call.input_tokens;
                    summary.total_output_tokens += call.output_tokens;
                    summary.total_llm_duration_ms += call.duration_ms;
                }
                EventData::ChunkProcessed(_) => summary.chunks_processed += 1,
                EventData::Error(_) => summary.errors += 1,
                EventData::JobStarted(_)
                | EventData::SkeletonExtracted(_)
                | EventData::StitchPass(_)
                | EventData::JobCompleted(_) => {}
            }
        }
        summary
    }
}

/// Full report for one session: record, history, and tallies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session: AuditSession,
    pub entries: Vec<AuditEntry>,
    pub summary: SessionSummary,
}

impl SessionReport {
    pub fn new(session: AuditSession, entries: Vec<AuditEntry>) -> Self {
        let summary = SessionSummary::from_entries(&entries);
        Self {
            session,
            entries,
            summary,
        }
    }
}

/// Keep at most `max` characters of `s`, never splitting a code point
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
