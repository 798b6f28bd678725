use thiserror::Error;

use crate::segment::Uid;

/// Main error type for rtindex operations
#[derive(Error, Debug)]
pub enum RtIndexError {
    #[error("Timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Transient IO failure after {attempts} attempts: {source}")]
    TransientIo {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to interpret record for uid {uid:?}: {reason}")]
    RecordInterpret { uid: Option<Uid>, reason: String },

    #[error("Index corruption suspected: {0}")]
    CorruptionSuspected(String),

    #[error("Invalid index signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Consumer is not running")]
    NotRunning,

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rtindex operations
pub type Result<T> = std::result::Result<T, RtIndexError>;

impl RtIndexError {
    /// Shorthand for a record interpretation failure
    pub fn interpret(uid: Option<Uid>, reason: impl Into<String>) -> Self {
        RtIndexError::RecordInterpret {
            uid,
            reason: reason.into(),
        }
    }

    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RtIndexError::Timeout { .. } | RtIndexError::TransientIo { .. }
        )
    }

    /// Errors that must never be swallowed by a background worker
    pub fn is_fatal(&self) -> bool {
        matches!(self, RtIndexError::CorruptionSuspected(_))
    }
}
