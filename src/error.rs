//! Error types for heartwatch.
//!
//! None of these are fatal to a running pipeline. Each variant is recovered
//! where it occurs: a malformed message is dropped, an undefined metric is
//! reported as absent, and I/O failures leave the previous snapshot in place.

use thiserror::Error;

/// Errors raised by the ingestion, storage and metrics layers.
#[derive(Debug, Error)]
pub enum HeartError {
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Insufficient samples: need at least {required}, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    #[error("Log I/O error: {0}")]
    LogIo(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Display sink error: {0}")]
    Sink(String),
}

impl HeartError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        HeartError::MalformedRecord(reason.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HeartError>;
