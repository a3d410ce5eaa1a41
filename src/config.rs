//! Service configuration
//!
//! Every section is `#[serde(default)]`, so a config file only needs the
//! fields it overrides. Files are JSON with camelCase keys.

use crate::broadcast::DEFAULT_SUBSCRIBER_CAPACITY;
use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuditConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub broadcast: BroadcastConfig,
    pub logging: LoggingConfig,
}

impl AuditConfig {
    /// Parse a JSON config document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AuditError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AuditError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        tracing::info!(path = %path.display(), "Loading config");
        Self::from_json(&json)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AuditError::Config("server.port must be non-zero".to_string()));
        }
        if self.broadcast.subscriber_capacity == 0 {
            return Err(AuditError::Config(
                "broadcast.subscriberCapacity must be at least 1".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Jsonl && self.store.dir.as_os_str().is_empty() {
            return Err(AuditError::Config(
                "store.dir is required for the jsonl backend".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// HTTP / WebSocket listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18800,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Event store backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process only, lost on restart
    Memory,
    /// JSON session records + JSONL event partitions on disk
    #[default]
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Base directory for the jsonl backend
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Jsonl,
            dir: PathBuf::from("./audit-data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BroadcastConfig {
    /// Per-subscriber channel capacity; a subscriber that falls this far
    /// behind is dropped
    pub subscriber_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable text
    pub json: bool,
}
