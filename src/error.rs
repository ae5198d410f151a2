//! Unified error types for callmux.
//!
//! This module provides a clean error type that wraps call-tracking errors
//! and presents the categories a calling application acts on.

use thiserror::Error;

/// All callmux client errors.
///
/// Setup and timeout failures leave nothing behind: the context is released
/// before the error is returned, so the call can be retried with a fresh one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The call never reached the wire (allocation, xid collision, detached)
    #[error("call setup failed: {0}")]
    CallSetup(String),

    /// No reply arrived before the deadline
    #[error("call timed out: {0}")]
    CallTimeout(String),

    /// The call was aborted or answered with something other than a reply
    #[error("call failed: {0}")]
    CallFailed(String),

    /// Arguments could not be encoded or results decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(String),
}

/// Result type for callmux client operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable.
    ///
    /// Setup failures and timeouts may succeed with a fresh context.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CallSetup(_) | Error::CallTimeout(_))
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::CallTimeout(_))
    }

    /// Check if the call never reached the wire.
    pub fn is_setup(&self) -> bool {
        matches!(self, Error::CallSetup(_))
    }
}

// Convert from call-tracking errors
impl From<callmux_core::Error> for Error {
    fn from(e: callmux_core::Error) -> Self {
        use callmux_core::Error as CoreError;
        match e {
            CoreError::AllocationFailure(_) | CoreError::IndexInsertFailure { .. } => {
                Error::CallSetup(e.to_string())
            }
            CoreError::WaitTimeout { .. } => Error::CallTimeout(e.to_string()),
            CoreError::WaitError { .. } | CoreError::Aborted { .. } => {
                Error::CallFailed(e.to_string())
            }
            CoreError::Codec(msg) => Error::Codec(msg),
            CoreError::InvalidConfig(msg) => Error::Config(msg),
        }
    }
}
