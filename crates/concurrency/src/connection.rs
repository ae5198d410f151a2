//! Connection shared state and the receiver path
//!
//! A [`Connection`] owns the per-connection consistency domain: the xid
//! counter, the transaction index and the outbound queue, all behind one
//! mutex. Critical sections under that mutex never allocate, block or
//! perform I/O.
//!
//! The transport (socket I/O, framing) is external. It interacts with the
//! connection through three surfaces:
//! - attach/detach a [`Transport`] handle (open/attached state)
//! - drain the outbound queue ([`Connection::pop_outbound`],
//!   [`Connection::drain_outbound`]) and return sent buffers with
//!   [`Connection::recycle`]
//! - route every inbound message through [`Connection::deliver`]
//!
//! Inbound buffers should come from [`Connection::allocator`] so that
//! buffer accounting stays balanced when a call releases its reply.

use crate::context::CallShared;
use crate::index::TransactionIndex;
use callmux_core::{
    Allocator, BoundedAllocator, CallFlags, Clock, ConnectionConfig, ConnectionId,
    HeapAllocator, MonotonicClock, Result, RpcMsg, Xid,
};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Transport handle attached to a connection
///
/// Its presence marks the connection as open. The hook is invoked after a
/// message is queued, outside every lock: neither the connection mutex nor
/// the staging call's private lock is held. An implementation may drain the
/// queue and call [`Connection::deliver`] from inside the hook.
pub trait Transport: Send + Sync + Debug {
    /// A message was appended to the outbound queue
    fn notify_outbound(&self) {}
}

/// Result of routing one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Attached to the call holding the xid, waiter signaled
    Delivered {
        /// Routed xid
        xid: Xid,
    },
    /// No live call holds the xid (late reply or unknown peer xid)
    NoMatchingCall {
        /// Unrouted xid
        xid: Xid,
    },
    /// No transport attached; message discarded
    Detached,
}

/// State guarded by the connection mutex
#[derive(Debug)]
pub(crate) struct ConnectionState {
    /// Last xid handed out
    pub(crate) next_xid: Xid,
    pub(crate) index: TransactionIndex<CallShared>,
    pub(crate) outbound: VecDeque<RpcMsg>,
    pub(crate) queue_len: usize,
}

impl ConnectionState {
    /// Advance the counter and return the new xid
    pub(crate) fn advance_xid(&mut self) -> Xid {
        self.next_xid = self.next_xid.next();
        self.next_xid
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub(crate) calls_allocated: AtomicU64,
    pub(crate) calls_released: AtomicU64,
    pub(crate) insert_failures: AtomicU64,
    pub(crate) messages_queued: AtomicU64,
    pub(crate) sends_retained: AtomicU64,
    pub(crate) replies_delivered: AtomicU64,
    pub(crate) inbound_dropped: AtomicU64,
    pub(crate) inbound_unmatched: AtomicU64,
    pub(crate) stale_replies: AtomicU64,
}

impl StatCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of a connection's call statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Contexts successfully allocated
    pub calls_allocated: u64,
    /// Contexts released (explicitly or by drop)
    pub calls_released: u64,
    /// Xid collisions on allocate or renumber
    pub insert_failures: u64,
    /// Messages appended to the outbound queue
    pub messages_queued: u64,
    /// Stage attempts that kept the message because no transport was attached
    pub sends_retained: u64,
    /// Inbound messages routed to a live call
    pub replies_delivered: u64,
    /// Inbound messages discarded because no transport was attached
    pub inbound_dropped: u64,
    /// Inbound messages with no live call
    pub inbound_unmatched: u64,
    /// Replies seen by a waiter that no longer matched its xid
    pub stale_replies: u64,
}

/// One duplex connection's call-tracking state
pub struct Connection {
    id: ConnectionId,
    config: ConnectionConfig,
    pub(crate) state: Mutex<ConnectionState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    pub(crate) allocator: Arc<dyn Allocator>,
    clock: Arc<dyn Clock>,
    pub(crate) stats: StatCounters,
}

impl Connection {
    /// Connection with the given config, heap allocator and monotonic clock
    pub fn new(config: ConnectionConfig) -> Result<Arc<Self>> {
        Self::builder().config(config).build()
    }

    /// Create a builder
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Configuration in effect
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Allocator for contexts and message buffers
    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    /// Monotonic clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ========================================================================
    // Transport attachment
    // ========================================================================

    /// Attach a transport, marking the connection open
    ///
    /// Returns the previously attached transport, if any.
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) -> Option<Arc<dyn Transport>> {
        debug!(conn = %self.id, "transport attached");
        self.transport.write().replace(transport)
    }

    /// Detach the transport
    ///
    /// Live calls stay indexed; use [`Connection::abort_calls`] to fail them.
    pub fn detach_transport(&self) -> Option<Arc<dyn Transport>> {
        debug!(conn = %self.id, "transport detached");
        self.transport.write().take()
    }

    /// Whether a transport is attached
    pub fn is_attached(&self) -> bool {
        self.transport.read().is_some()
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    // ========================================================================
    // Xid counter and index
    // ========================================================================

    /// Restart the xid counter; the next allocated xid is `seed + 1`
    ///
    /// Live calls keep their xids. A later collision with one of them fails
    /// that allocation with `IndexInsertFailure`.
    pub fn reseed_xid(&self, seed: u32) {
        self.state.lock().next_xid = Xid(seed);
        debug!(conn = %self.id, seed, "xid counter reseeded");
    }

    /// Number of live (indexed) calls
    pub fn live_calls(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Whether `xid` is held by a live call
    pub fn is_live(&self, xid: Xid) -> bool {
        self.state.lock().index.contains(xid)
    }

    /// Indexed xids in ascending order
    pub fn live_xids(&self) -> Vec<Xid> {
        self.state.lock().index.xids().collect()
    }

    pub(crate) fn routes_to(&self, xid: Xid, shared: &Arc<CallShared>) -> bool {
        self.state
            .lock()
            .index
            .find(xid)
            .map_or(false, |found| Arc::ptr_eq(&found, shared))
    }

    // ========================================================================
    // Outbound queue
    // ========================================================================

    /// Number of queued outbound messages
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue_len
    }

    /// Take the oldest queued message
    pub fn pop_outbound(&self) -> Option<RpcMsg> {
        let mut state = self.state.lock();
        let msg = state.outbound.pop_front()?;
        state.queue_len -= 1;
        Some(msg)
    }

    /// Take every queued message in FIFO order
    pub fn drain_outbound(&self) -> Vec<RpcMsg> {
        let mut state = self.state.lock();
        state.queue_len = 0;
        state.outbound.drain(..).collect()
    }

    /// Return a sent (or otherwise finished) buffer to the allocator
    pub fn recycle(&self, msg: RpcMsg) {
        self.allocator.free_msg(msg);
    }

    // ========================================================================
    // Receiver path
    // ========================================================================

    /// Route one inbound message to the call holding its xid
    ///
    /// Lookup happens under the connection mutex; the mutex is released
    /// before the call's private lock is taken. The message replaces the
    /// call's pending buffer, `SYNC_DONE` is set and the waiter signaled,
    /// all under the private lock.
    ///
    /// Must not be called from a thread holding the target call's
    /// [`CallGuard`](crate::CallGuard); the private lock is not reentrant.
    pub fn deliver(&self, msg: RpcMsg) -> Delivery {
        if !self.is_attached() {
            StatCounters::bump(&self.stats.inbound_dropped);
            warn!(conn = %self.id, xid = %msg.xid, "inbound message while detached, dropped");
            self.allocator.free_msg(msg);
            return Delivery::Detached;
        }

        let xid = msg.xid;
        let target = self.state.lock().index.find(xid);
        let Some(shared) = target else {
            StatCounters::bump(&self.stats.inbound_unmatched);
            debug!(conn = %self.id, xid = %xid, "no live call for inbound message");
            self.allocator.free_msg(msg);
            return Delivery::NoMatchingCall { xid };
        };

        let displaced = {
            let mut slot = shared.slot.lock();
            let displaced = std::mem::replace(&mut slot.msg, msg);
            slot.flags.insert(CallFlags::SYNC_DONE);
            shared.cv.notify_all();
            displaced
        };
        self.allocator.free_msg(displaced);

        StatCounters::bump(&self.stats.replies_delivered);
        Delivery::Delivered { xid }
    }

    /// Wake the waiter of `xid` without delivering anything
    ///
    /// The waiter re-checks its state and keeps waiting toward its deadline.
    /// Returns whether a live call holds `xid`.
    pub fn poke(&self, xid: Xid) -> bool {
        let target = self.state.lock().index.find(xid);
        match target {
            Some(shared) => {
                let _slot = shared.slot.lock();
                shared.cv.notify_all();
                true
            }
            None => false,
        }
    }

    /// Deliver a terminal event to every live call
    ///
    /// Each waiter returns `Aborted` with `reason`. Calls stay indexed until
    /// their owners release them. Returns the number of calls aborted.
    pub fn abort_calls(&self, reason: &str) -> usize {
        let live = self.state.lock().index.live();
        for shared in &live {
            let mut slot = shared.slot.lock();
            slot.terminal = Some(reason.to_string());
            slot.flags.insert(CallFlags::SYNC_DONE);
            shared.cv.notify_all();
        }
        if !live.is_empty() {
            warn!(conn = %self.id, calls = live.len(), reason, "aborted live calls");
        }
        live.len()
    }

    /// Snapshot of call statistics
    pub fn stats(&self) -> ConnectionStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ConnectionStats {
            calls_allocated: load(&self.stats.calls_allocated),
            calls_released: load(&self.stats.calls_released),
            insert_failures: load(&self.stats.insert_failures),
            messages_queued: load(&self.stats.messages_queued),
            sends_retained: load(&self.stats.sends_retained),
            replies_delivered: load(&self.stats.replies_delivered),
            inbound_dropped: load(&self.stats.inbound_dropped),
            inbound_unmatched: load(&self.stats.inbound_unmatched),
            stale_replies: load(&self.stats.stale_replies),
        }
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Builder for [`Connection`]
///
/// # Example
///
/// ```ignore
/// let conn = Connection::builder()
///     .config(ConnectionConfig::deterministic())
///     .transport(Arc::new(MyTransport::new()))
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    allocator: Option<Arc<dyn Allocator>>,
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ConnectionBuilder {
    /// Builder with default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom allocator
    ///
    /// `max_live_calls` and message limits still apply on top of it.
    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Use a custom monotonic clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Start attached to `transport`
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate the config and build the connection
    pub fn build(self) -> Result<Arc<Connection>> {
        self.config.validate()?;

        let base: Arc<dyn Allocator> = self
            .allocator
            .unwrap_or_else(|| Arc::new(HeapAllocator::new(self.config.msg_buffer_capacity)));
        let allocator: Arc<dyn Allocator> = match self.config.max_live_calls {
            Some(max) => Arc::new(BoundedAllocator::new(base, Some(max), None)),
            None => base,
        };

        let id = ConnectionId::new();
        let seed = self.config.xid_seed.resolve();
        debug!(conn = %id, seed = %seed, "connection created");

        Ok(Arc::new(Connection {
            id,
            state: Mutex::new(ConnectionState {
                next_xid: seed,
                index: TransactionIndex::new(),
                outbound: VecDeque::new(),
                queue_len: 0,
            }),
            transport: RwLock::new(self.transport),
            allocator,
            clock: self.clock.unwrap_or_else(|| Arc::new(MonotonicClock)),
            stats: StatCounters::default(),
            config: self.config,
        }))
    }
}
