//! Call context
//!
//! One [`CallContext`] per outstanding call. The owner (the calling thread)
//! holds the context; the connection's index holds only a weak reference to
//! the context's rendezvous state so the receiver path can route a reply.
//!
//! ## Rendezvous state
//!
//! Everything the receiver may touch lives in `CallShared` behind the
//! context's private mutex: the flags, the pending/reply message and any
//! terminal event. The condition variable paired with that mutex is used
//! only for this one call, so a blocked caller never holds the connection
//! lock.
//!
//! ## Lock order
//!
//! context lock → connection lock is allowed (renumber, stage).
//! The receiver path takes the connection lock for lookup, drops it, then
//! takes the context lock. No path takes them in the reverse nesting.

use crate::connection::{Connection, Transport};
use callmux_core::{CallArgs, CallFlags, CallResults, ProcId, RpcMsg, Xid};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State guarded by the context's private lock
#[derive(Debug, Default)]
pub(crate) struct CallSlot {
    pub(crate) flags: CallFlags,
    /// Pending call message, replaced by the reply on delivery
    pub(crate) msg: RpcMsg,
    /// Set by `abort_calls`; takes precedence over any message
    pub(crate) terminal: Option<String>,
}

/// Rendezvous state shared with the receiver path
#[derive(Debug)]
pub(crate) struct CallShared {
    /// Current xid; written only under both the context and connection locks
    xid: AtomicU32,
    pub(crate) slot: Mutex<CallSlot>,
    pub(crate) cv: Condvar,
}

impl CallShared {
    pub(crate) fn new(msg: RpcMsg) -> Self {
        Self {
            xid: AtomicU32::new(0),
            slot: Mutex::new(CallSlot {
                msg,
                ..Default::default()
            }),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn xid(&self) -> Xid {
        Xid(self.xid.load(Ordering::Acquire))
    }

    pub(crate) fn set_xid(&self, xid: Xid) {
        self.xid.store(xid.0, Ordering::Release);
    }
}

/// One outstanding call
///
/// Created by [`Connection::allocate`], destroyed by [`CallContext::release`]
/// (or by drop, which performs the same index removal). Release consumes
/// the context, so a context cannot be released twice.
pub struct CallContext {
    pub(crate) shared: Arc<CallShared>,
    pub(crate) conn: Arc<Connection>,
    pub(crate) procedure: ProcId,
    pub(crate) args: Arc<dyn CallArgs>,
    pub(crate) results: Arc<dyn CallResults>,
    pub(crate) timeout: Duration,
    pub(crate) deadline: Instant,
    pub(crate) released: bool,
}

impl CallContext {
    /// Current transaction id
    pub fn xid(&self) -> Xid {
        self.shared.xid()
    }

    /// Procedure being called
    pub fn procedure(&self) -> ProcId {
        self.procedure
    }

    /// Relative timeout supplied at allocation
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Absolute deadline computed once at allocation
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the allocation deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(self.conn.clock().now())
    }

    /// Owning connection
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Whether the connection's index currently routes this call's xid here
    pub fn is_indexed(&self) -> bool {
        self.conn.routes_to(self.xid(), &self.shared)
    }

    /// Take the context's private lock
    ///
    /// Renumbering, staging and waiting all require the returned guard.
    /// Blocks while the receiver path is attaching a reply.
    pub fn lock(&self) -> CallGuard<'_> {
        let mut slot = self.shared.slot.lock();
        slot.flags.insert(CallFlags::LOCKED);
        CallGuard {
            ctx: self,
            slot,
            pending_notify: None,
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("xid", &self.xid())
            .field("conn", &self.conn.id())
            .field("procedure", &self.procedure)
            .field("timeout", &self.timeout)
            .field("released", &self.released)
            .finish()
    }
}

/// Holder of a context's private lock
///
/// While the guard exists the `LOCKED` flag is set. Dropping it clears the
/// flag and releases the lock.
///
/// A transport notification owed by [`CallGuard::xfer_callmsg`] is sent
/// once the private lock is released: when [`CallGuard::wait_reply`] starts
/// or when the guard drops, whichever comes first.
pub struct CallGuard<'a> {
    pub(crate) ctx: &'a CallContext,
    pub(crate) slot: MutexGuard<'a, CallSlot>,
    pub(crate) pending_notify: Option<Arc<dyn Transport>>,
}

impl CallGuard<'_> {
    /// Current flags
    pub fn flags(&self) -> CallFlags {
        self.slot.flags
    }

    /// Current transaction id
    pub fn xid(&self) -> Xid {
        self.ctx.xid()
    }

    /// The pending message (or the delivered reply after a wait)
    pub fn message(&self) -> &RpcMsg {
        &self.slot.msg
    }

    /// The delivered reply, if it matches the current xid
    pub fn reply(&self) -> Option<&RpcMsg> {
        let xid = self.ctx.xid();
        Some(&self.slot.msg).filter(|msg| msg.is_reply_to(xid))
    }

    /// Send an owed outbound notification with the private lock released
    pub(crate) fn flush_notify(&mut self) {
        let Some(transport) = self.pending_notify.take() else {
            return;
        };
        self.slot.flags.remove(CallFlags::LOCKED);
        MutexGuard::unlocked(&mut self.slot, || transport.notify_outbound());
        self.slot.flags.insert(CallFlags::LOCKED);
    }

    pub(crate) fn assert_locked(&self, op: &str) {
        assert!(
            self.slot.flags.contains(CallFlags::LOCKED),
            "{} requires the call's private lock",
            op
        );
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.slot.flags.remove(CallFlags::LOCKED);
        if let Some(transport) = self.pending_notify.take() {
            MutexGuard::unlocked(&mut self.slot, || transport.notify_outbound());
        }
    }
}

impl std::fmt::Debug for CallGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGuard")
            .field("xid", &self.xid())
            .field("flags", &self.slot.flags)
            .field("pending_notify", &self.pending_notify.is_some())
            .finish()
    }
}
