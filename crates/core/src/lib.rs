//! Core types for callmux
//!
//! This crate defines the leaf vocabulary shared by every layer:
//! - Types: Xid, ProcId, ConnectionId, RpcMsg, CallFlags
//! - Error taxonomy and Result alias
//! - Codec contracts (CallArgs, CallResults)
//! - Allocator and Clock contracts
//! - Connection configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alloc;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod types;

pub use alloc::{Allocator, BoundedAllocator, HeapAllocator};
pub use clock::{Clock, MonotonicClock};
pub use codec::{CallArgs, CallResults, JsonArgs, JsonResults, RawResults};
pub use config::{ConnectionConfig, XidSeed};
pub use error::{Error, Result};
pub use types::{CallFlags, ConnectionId, MsgDirection, ProcId, RpcMsg, Xid};
