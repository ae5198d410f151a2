//! Convenient imports for callmux.
//!
//! This module re-exports the most commonly used types so you can get started
//! with a single import:
//!
//! ```ignore
//! use callmux::prelude::*;
//!
//! let client = Client::connect(ConnectionConfig::default(), transport)?;
//! ```

// Main entry point
pub use crate::client::Client;

// Error handling
pub use crate::error::{Error, Result};

// Connection and transport surface
pub use callmux_concurrency::{Connection, Delivery, Transport};

// Core types
pub use callmux_core::{
    CallArgs, CallResults, ConnectionConfig, JsonArgs, JsonResults, ProcId, RawResults, RpcMsg,
    Xid,
};
