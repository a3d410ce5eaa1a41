//! Live channel wire messages
//!
//! JSON text frames tagged by `type`, with camelCase fields.

use crate::types::AuditEntry;
use serde::{Deserialize, Serialize};

/// Client → server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replay buffered entries, then stream live ones
    Subscribe {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Stop the current subscription
    Unsubscribe,
    /// One-shot durable history
    GetHistory {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Ping,
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Entry {
        #[serde(rename = "sessionId")]
        session_id: String,
        entry: AuditEntry,
    },
    /// Replay finished; live entries follow
    Subscribed {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Unsubscribed {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    History {
        #[serde(rename = "sessionId")]
        session_id: String,
        entries: Vec<AuditEntry>,
    },
    Completed {
        #[serde(rename = "sessionId")]
        session_id: String,
        success: bool,
        #[serde(rename = "totalEntries")]
        total_entries: u64,
    },
    Pong,
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn entry(entry: AuditEntry) -> Self {
        Self::Entry {
            session_id: entry.session_id.clone(),
            entry,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
