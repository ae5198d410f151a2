//! Call tracking layer for callmux
//!
//! This crate implements the per-call transaction manager of a duplex RPC
//! client connection:
//! - TransactionIndex: xid → live call, unique keys
//! - Connection: xid counter, index and outbound queue under one mutex
//! - CallContext: one outstanding call with a private rendezvous lock
//! - Manager operations: allocate, renumber, stage, wait, release
//! - Receiver path: deliver, poke, abort

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod context;
pub mod index;
pub mod manager;

pub use connection::{Connection, ConnectionBuilder, ConnectionStats, Delivery, Transport};
pub use context::{CallContext, CallGuard};
pub use index::{DuplicateKey, TransactionIndex};
pub use manager::Staged;
