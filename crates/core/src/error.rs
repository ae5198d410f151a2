//! Error types for call tracking
//!
//! Every failure in the call core is returned to the immediate caller.
//! None of these terminate the process; locking precondition violations are
//! assertion failures instead of variants here.

use crate::types::Xid;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for call-tracking operations
pub type Result<T> = std::result::Result<T, Error>;

/// Call-tracking errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The allocator could not produce a context or message buffer
    ///
    /// Call setup aborts before anything reaches the wire.
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// The xid is already held by another live context
    #[error("index insert failed: xid {xid} already in use")]
    IndexInsertFailure {
        /// Colliding xid
        xid: Xid,
    },

    /// No matching reply arrived before the wait deadline
    #[error("timed out after {timeout:?} waiting for reply to xid {xid}")]
    WaitTimeout {
        /// Call that timed out
        xid: Xid,
        /// Relative timeout the wait was started with
        timeout: Duration,
    },

    /// The wait ended on something other than a matching reply
    #[error("wait for xid {xid} failed: {reason}")]
    WaitError {
        /// Call that was waiting
        xid: Xid,
        /// What was delivered instead
        reason: String,
    },

    /// A terminal event was delivered instead of a reply
    #[error("call xid {xid} aborted: {reason}")]
    Aborted {
        /// Aborted call
        xid: Xid,
        /// Reason supplied by whoever aborted the call
        reason: String,
    },

    /// Argument or result codec failure
    #[error("codec error: {0}")]
    Codec(String),

    /// Configuration rejected
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the call never reached the wire
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Error::AllocationFailure(_) | Error::IndexInsertFailure { .. }
        )
    }

    /// Whether the wait ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::WaitTimeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}
