//! Connection configuration
//!
//! ```json
//! {
//!   "default_timeout_ms": 25000,
//!   "xid_seed": "random",
//!   "msg_buffer_capacity": 8192,
//!   "max_live_calls": 1024,
//!   "max_queued_messages": null
//! }
//! ```
//!
//! Every field is optional when deserializing; missing fields take their
//! defaults.

use crate::error::{Error, Result};
use crate::types::Xid;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-call timeout (25 seconds, the classic RPC client default)
pub const DEFAULT_TIMEOUT_MS: u64 = 25_000;

/// Default reserved body capacity of a fresh message buffer
pub const DEFAULT_MSG_BUFFER_CAPACITY: usize = 8 * 1024;

/// Where the xid counter starts
///
/// The first allocated xid is `seed + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum XidSeed {
    /// Random starting point, so a reconnecting client does not reuse the
    /// xids of its previous connection
    #[default]
    Random,
    /// Fixed starting point
    Fixed(u32),
}

impl XidSeed {
    /// Resolve to a concrete counter value
    pub fn resolve(self) -> Xid {
        match self {
            XidSeed::Random => Xid(rand::random::<u32>()),
            XidSeed::Fixed(seed) => Xid(seed),
        }
    }
}

/// Per-connection call-tracking options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Timeout used when a call does not supply its own
    pub default_timeout_ms: u64,
    /// Xid counter seed
    pub xid_seed: XidSeed,
    /// Reserved body capacity of fresh message buffers
    pub msg_buffer_capacity: usize,
    /// Maximum simultaneously live call contexts (`None` = unbounded)
    pub max_live_calls: Option<usize>,
    /// Maximum queued outbound messages (`None` = unbounded)
    pub max_queued_messages: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            xid_seed: XidSeed::Random,
            msg_buffer_capacity: DEFAULT_MSG_BUFFER_CAPACITY,
            max_live_calls: None,
            max_queued_messages: None,
        }
    }
}

impl ConnectionConfig {
    /// Deterministic options for tests: xids start at 1, short timeout
    pub fn deterministic() -> Self {
        ConnectionConfig {
            default_timeout_ms: 1_000,
            xid_seed: XidSeed::Fixed(0),
            msg_buffer_capacity: 256,
            ..Default::default()
        }
    }

    /// Bounded options: caps live calls and queued messages
    pub fn bounded(max_live_calls: usize, max_queued_messages: usize) -> Self {
        ConnectionConfig {
            max_live_calls: Some(max_live_calls),
            max_queued_messages: Some(max_queued_messages),
            ..Default::default()
        }
    }

    /// Parse from JSON and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ConnectionConfig = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every call fail
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "default_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_live_calls == Some(0) {
            return Err(Error::InvalidConfig(
                "max_live_calls must be greater than zero".into(),
            ));
        }
        if self.max_queued_messages == Some(0) {
            return Err(Error::InvalidConfig(
                "max_queued_messages must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Default timeout as a Duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
