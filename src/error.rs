//! Unified error currency for the engine.
//!
//! Every public entry point returns `Result<_, EngineError>`. The CLI maps
//! `exit_code()` straight onto the process exit status instead of
//! downcasting individual module errors.

use thiserror::Error;

use crate::codec::CodecError;
use crate::format::FormatError;
use crate::transport::CryptoError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("range error: {0}")]
    Range(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<FormatError> for EngineError {
    fn from(e: FormatError) -> Self {
        match e {
            FormatError::Io(io_err) => EngineError::Io(io_err),
            other => EngineError::Format(other.to_string()),
        }
    }
}

impl From<CryptoError> for EngineError {
    fn from(e: CryptoError) -> Self {
        EngineError::Crypto(e.to_string())
    }
}

impl EngineError {
    /// Maps onto the exit-code table in the container's CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Usage(_) | EngineError::Cancelled => 1,
            EngineError::Format(_) | EngineError::Integrity { .. } | EngineError::Range(_) => 2,
            EngineError::Codec(_) | EngineError::Json(_) => 2,
            EngineError::Auth(_) | EngineError::Crypto(_) => 3,
            EngineError::Io(_) => 4,
        }
    }
}
