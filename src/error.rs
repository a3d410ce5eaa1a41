//! Error types for a3s-audit

use thiserror::Error;

/// Errors that can occur in the audit log service
#[derive(Debug, Error)]
pub enum AuditError {
    /// Durable write or read failed
    ///
    /// Only fatal for session creation; event and completion writes are
    /// logged and swallowed so live delivery continues.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Session is not active (never started, already completed, or evicted)
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Subscriber channel is saturated or closed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuditError {
    /// Stable machine-readable code used in HTTP and WebSocket error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::UnknownSession(_) => "UNKNOWN_SESSION",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuditError::UnknownSession("s-1".to_string());
        assert_eq!(err.to_string(), "Unknown session: s-1");
        assert_eq!(err.code(), "UNKNOWN_SESSION");
    }

    #[test]
    fn test_serde_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: AuditError = parse.unwrap_err().into();
        assert!(matches!(err, AuditError::Serialization(_)));
        assert_eq!(err.code(), "SERIALIZATION_ERROR");
    }
}
