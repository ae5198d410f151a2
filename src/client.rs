//! Synchronous client entry point for callmux.
//!
//! This module provides the `Client` struct, which runs one complete call
//! per invocation: allocate a context, encode, stage, wait for the reply,
//! decode, and release.

use crate::error::{Error, Result};
use callmux_concurrency::{CallContext, Connection, Staged, Transport};
use callmux_core::{CallArgs, CallResults, ConnectionConfig, JsonArgs, JsonResults, ProcId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Synchronous RPC client over one duplex connection.
///
/// Any number of threads may share a `Client`; each call blocks only its
/// own thread.
///
/// # Example
///
/// ```ignore
/// use callmux::prelude::*;
///
/// let client = Client::connect(ConnectionConfig::default(), transport)?;
///
/// // Receiver thread: conn.deliver(reply) for every inbound message
/// let answer: u64 = client.call_json(ProcId(7), &(1, 2), None)?;
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Wrap an existing connection.
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// Build a connection from `config`, attached to `transport`.
    pub fn connect(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let conn = Connection::builder()
            .config(config)
            .transport(transport)
            .build()?;
        Ok(Self::new(conn))
    }

    /// The underlying connection (for the transport's receiver path).
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Run one call to completion.
    ///
    /// `timeout` defaults to the connection's configured default. The
    /// context is released before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - `CallSetup` if the call could not be queued, including when no
    ///   transport is attached
    /// - `CallTimeout` if no reply arrived in time
    /// - `CallFailed` if the call was aborted
    /// - `Codec` if encoding or decoding failed
    pub fn call(
        &self,
        procedure: ProcId,
        args: Arc<dyn CallArgs>,
        results: Arc<dyn CallResults>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let timeout = timeout.unwrap_or_else(|| self.conn.config().default_timeout());
        let ctx = self.conn.allocate(procedure, args, results, timeout)?;

        let outcome = Self::run(&ctx);
        if let Err(e) = &outcome {
            debug!(conn = %self.conn.id(), xid = %ctx.xid(), error = %e, "call failed");
        }
        ctx.release();
        outcome
    }

    /// Run one call with JSON-encoded arguments and results.
    pub fn call_json<A, R>(&self, procedure: ProcId, args: &A, timeout: Option<Duration>) -> Result<R>
    where
        A: Serialize + Send + Sync + Clone + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let results = Arc::new(JsonResults::<R>::new());
        self.call(
            procedure,
            Arc::new(JsonArgs(args.clone())),
            results.clone(),
            timeout,
        )?;
        results
            .take()
            .ok_or_else(|| Error::Codec("reply decoded no value".to_string()))
    }

    fn run(ctx: &CallContext) -> Result<()> {
        let mut guard = ctx.lock();
        guard.encode_call()?;
        if guard.xfer_callmsg()? == Staged::Retained {
            return Err(Error::CallSetup(format!(
                "xid {}: no transport attached",
                guard.xid()
            )));
        }
        guard.wait_reply()?;
        guard.decode_results()?;
        Ok(())
    }
}
