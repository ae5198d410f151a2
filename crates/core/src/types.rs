//! Core types for call tracking
//!
//! This module defines the fundamental types used throughout the system:
//! - [`Xid`]: Transaction identifier correlating a call with its reply
//! - [`ProcId`]: Remote procedure number
//! - [`ConnectionId`]: Unique identifier for a duplex connection
//! - [`RpcMsg`]: Message buffer staged for send or filled by a reply
//! - [`CallFlags`]: Rendezvous state bits of one outstanding call

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transaction identifier
///
/// Unique per connection at any instant. The counter producing xids wraps
/// around at `u32::MAX`; collisions after wraparound are caught when the
/// context is indexed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Xid(pub u32);

impl Xid {
    /// The xid following this one, wrapping at `u32::MAX`
    ///
    /// # Examples
    ///
    /// ```
    /// use callmux_core::types::Xid;
    ///
    /// assert_eq!(Xid(7).next(), Xid(8));
    /// assert_eq!(Xid(u32::MAX).next(), Xid(0));
    /// ```
    pub fn next(self) -> Xid {
        Xid(self.0.wrapping_add(1))
    }

    /// Raw value
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Xid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for Xid {
    fn from(raw: u32) -> Self {
        Xid(raw)
    }
}

/// Remote procedure number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ProcId(pub u32);

impl std::fmt::Display for ProcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proc#{}", self.0)
    }
}

/// Unique identifier for a connection
///
/// Used to label log records and to tell connections apart in tests.
/// Contexts never move between connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new random ConnectionId using UUID v4
    ///
    /// # Examples
    ///
    /// ```
    /// use callmux_core::types::ConnectionId;
    ///
    /// let a = ConnectionId::new();
    /// let b = ConnectionId::new();
    /// assert_ne!(a, b);
    /// ```
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a message on a duplex connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MsgDirection {
    /// Outbound call (or an inbound call when the peer calls back)
    #[default]
    Call,
    /// Reply to a previously sent call
    Reply,
}

/// Message buffer
///
/// A context owns one of these as its pending message. It is filled with the
/// serialized call, handed to the outbound queue, and replaced by a fresh
/// buffer. The receiver path hands a reply buffer to the waiting context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcMsg {
    /// Transaction id carried by the message
    pub xid: Xid,
    /// Call or reply
    pub direction: MsgDirection,
    /// Procedure (calls only)
    pub procedure: Option<ProcId>,
    /// Encoded arguments or results
    pub body: Vec<u8>,
}

impl RpcMsg {
    /// Empty buffer with preallocated body capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            body: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    /// Build a call message
    pub fn call(xid: Xid, procedure: ProcId, body: Vec<u8>) -> Self {
        Self {
            xid,
            direction: MsgDirection::Call,
            procedure: Some(procedure),
            body,
        }
    }

    /// Build a reply message
    pub fn reply(xid: Xid, body: Vec<u8>) -> Self {
        Self {
            xid,
            direction: MsgDirection::Reply,
            procedure: None,
            body,
        }
    }

    /// Whether this is a reply carrying `xid`
    pub fn is_reply_to(&self, xid: Xid) -> bool {
        self.direction == MsgDirection::Reply && self.xid == xid
    }

    /// Clear contents, keeping the body allocation
    pub fn reset(&mut self) {
        self.xid = Xid::default();
        self.direction = MsgDirection::Call;
        self.procedure = None;
        self.body.clear();
    }
}

/// Rendezvous state bits of one call
///
/// - `LOCKED`: the caller holds the context's private wait lock
/// - `WAIT_SYNC`: a thread is blocked in (or about to block in) a wait
/// - `SYNC_DONE`: a reply or terminal event has been delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallFlags(u32);

impl CallFlags {
    /// Caller holds the private wait lock
    pub const LOCKED: CallFlags = CallFlags(0x0001);
    /// A thread is waiting for the reply
    pub const WAIT_SYNC: CallFlags = CallFlags(0x0002);
    /// Reply or terminal event delivered
    pub const SYNC_DONE: CallFlags = CallFlags(0x0004);

    /// No bits set
    pub const fn empty() -> Self {
        CallFlags(0)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(self, other: CallFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set bits
    pub fn insert(&mut self, other: CallFlags) {
        self.0 |= other.0;
    }

    /// Clear bits
    pub fn remove(&mut self, other: CallFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for CallFlags {
    type Output = CallFlags;

    fn bitor(self, rhs: CallFlags) -> CallFlags {
        CallFlags(self.0 | rhs.0)
    }
}
