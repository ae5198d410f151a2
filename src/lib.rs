//! # Callmux
//!
//! Per-call transaction management for duplex RPC client connections.
//!
//! Every outstanding call on a connection gets a unique transaction id
//! (xid) and a private rendezvous: the calling thread blocks on it until
//! the receiver thread routes the matching reply back, or the call's
//! deadline passes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use callmux::prelude::*;
//!
//! let client = Client::connect(ConnectionConfig::default(), transport)?;
//!
//! // Transport side: send what the client queues...
//! for msg in client.connection().drain_outbound() { /* write to socket */ }
//! // ...and route every inbound message back
//! client.connection().deliver(reply);
//!
//! // Caller side
//! let sum: u64 = client.call_json(ProcId(1), &(2u64, 3u64), None)?;
//! ```
//!
//! ## Layers
//!
//! - [`Client`] - one blocking call per invocation
//! - [`Connection`] - xid counter, transaction index, outbound queue
//! - [`CallContext`] - allocate / renumber / stage / wait / release

#![warn(missing_docs)]

mod client;
mod error;

pub mod prelude;

// Re-export main entry points
pub use client::Client;
pub use error::{Error, Result};

// Re-export the call-tracking layer
pub use callmux_concurrency::{
    CallContext, CallGuard, Connection, ConnectionBuilder, ConnectionStats, Delivery, Staged,
    Transport,
};

// Re-export core types
pub use callmux_core::{
    Allocator, BoundedAllocator, CallArgs, CallFlags, CallResults, Clock, ConnectionConfig,
    ConnectionId, HeapAllocator, JsonArgs, JsonResults, MonotonicClock, MsgDirection, ProcId,
    RawResults, RpcMsg, Xid, XidSeed,
};
