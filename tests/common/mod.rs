//! Shared test fixtures: a loopback transport and an echo receiver thread.

#![allow(dead_code)]

pub use callmux::prelude::*;
pub use callmux::{CallContext, CallFlags, Staged};

use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Install a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

enum Signal {
    Outbound,
    Stop,
}

/// Transport that wakes the receiver thread whenever a message is queued.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Mutex<mpsc::Sender<Signal>>,
}

impl Transport for ChannelTransport {
    fn notify_outbound(&self) {
        let _ = self.tx.lock().send(Signal::Outbound);
    }
}

/// Transport that never sends anything; tests drain the queue by hand.
#[derive(Debug, Default)]
pub struct ManualTransport;

impl Transport for ManualTransport {}

/// Transport that answers every queued call from inside `notify_outbound`,
/// on the staging thread, by echoing its body.
#[derive(Debug, Default)]
pub struct InlineLoopback {
    conn: Mutex<Weak<Connection>>,
}

impl Transport for InlineLoopback {
    fn notify_outbound(&self) {
        let Some(conn) = self.conn.lock().upgrade() else {
            return;
        };
        for msg in conn.drain_outbound() {
            if let Some(reply) = echo(&msg) {
                conn.deliver(reply);
            }
            conn.recycle(msg);
        }
    }
}

/// Connection with xids starting at 1, attached to an [`InlineLoopback`].
pub fn loopback_connection() -> Arc<Connection> {
    init_tracing();
    let conn = Connection::new(ConnectionConfig::deterministic()).unwrap();
    let transport = Arc::new(InlineLoopback::default());
    *transport.conn.lock() = Arc::downgrade(&conn);
    conn.attach_transport(transport);
    conn
}

/// Connection with xids starting at 1, attached to a [`ManualTransport`].
pub fn manual_connection() -> Arc<Connection> {
    init_tracing();
    Connection::builder()
        .config(ConnectionConfig::deterministic())
        .transport(Arc::new(ManualTransport))
        .build()
        .unwrap()
}

/// Connection with xids starting at 1 and no transport attached.
pub fn detached_connection() -> Arc<Connection> {
    init_tracing();
    Connection::new(ConnectionConfig::deterministic()).unwrap()
}

/// Allocate a call with raw-byte arguments.
pub fn raw_call(conn: &Arc<Connection>, body: &[u8], timeout: Duration) -> CallContext {
    conn.allocate(
        ProcId(1),
        Arc::new(body.to_vec()),
        Arc::new(RawResults::new()),
        timeout,
    )
    .unwrap()
}

/// Reply handler run by the [`EchoServer`] for every sent call.
pub type Handler = Box<dyn Fn(&RpcMsg) -> Option<RpcMsg> + Send>;

/// Reply with the call's own body.
pub fn echo(msg: &RpcMsg) -> Option<RpcMsg> {
    Some(RpcMsg::reply(msg.xid, msg.body.clone()))
}

/// Receiver thread: drains the outbound queue and delivers replies.
pub struct EchoServer {
    tx: mpsc::Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl EchoServer {
    /// Build a connection attached to a channel transport and start serving it.
    pub fn start(config: ConnectionConfig, handler: Handler) -> (Arc<Connection>, EchoServer) {
        init_tracing();
        let (tx, rx) = mpsc::channel();
        let transport = Arc::new(ChannelTransport {
            tx: Mutex::new(tx.clone()),
        });
        let conn = Connection::builder()
            .config(config)
            .transport(transport)
            .build()
            .unwrap();

        let server_conn = Arc::clone(&conn);
        let handle = thread::spawn(move || {
            while let Ok(Signal::Outbound) = rx.recv() {
                for msg in server_conn.drain_outbound() {
                    if let Some(reply) = handler(&msg) {
                        server_conn.deliver(reply);
                    }
                    server_conn.recycle(msg);
                }
            }
        });

        (
            conn,
            EchoServer {
                tx,
                handle: Some(handle),
            },
        )
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
