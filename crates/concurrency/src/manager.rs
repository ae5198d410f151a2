//! Call context manager
//!
//! The operations of one call's lifetime:
//! 1. [`Connection::allocate`]: reserve an xid and index the context
//! 2. [`CallGuard::encode_call`]: fill the pending message
//! 3. [`CallGuard::xfer_callmsg`]: hand the message to the outbound queue
//! 4. [`CallGuard::wait_reply`]: block until the reply or the deadline
//! 5. [`CallContext::release`]: remove from the index and free buffers
//!
//! [`CallGuard::next_xid`] re-keys a live context (retry after a collision
//! or a protocol-level renumbering).
//!
//! ## Call Sequence
//!
//! ```text
//! caller thread                         receiver thread
//! ─────────────                         ───────────────
//! allocate()        [conn lock]
//! lock()            [ctx lock]
//! encode_call()
//! xfer_callmsg()    [ctx → conn lock]
//! wait_reply()      notify_outbound() [no lock held]
//!                   [ctx lock released while blocked]
//!                                       deliver(reply)  [conn lock, dropped]
//!                                                       [ctx lock] SYNC_DONE + notify
//! wait_reply() returns Ok
//! decode_results()
//! drop(guard)
//! release()         [conn lock]
//! ```
//!
//! Assignment of an xid and its insertion into the index happen in one
//! connection-mutex critical section, so no two live contexts on a
//! connection ever share an xid.

use crate::connection::{Connection, StatCounters};
use crate::context::{CallContext, CallGuard, CallShared};
use crate::index::DuplicateKey;
use callmux_core::{
    CallArgs, CallFlags, CallResults, Error, MsgDirection, ProcId, Result, Xid,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Outcome of staging a call message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staged {
    /// Appended to the outbound queue; a fresh pending buffer replaced it
    Queued {
        /// Queue length right after the append
        queue_len: usize,
    },
    /// No transport attached; the message stays in place for reuse
    Retained,
}

impl Connection {
    /// Allocate a context for one call
    ///
    /// The xid counter advances and the new xid is indexed under the
    /// connection mutex. The deadline is `now + timeout`, computed once.
    /// A fresh message buffer becomes the context's pending message.
    ///
    /// # Errors
    ///
    /// - `AllocationFailure` if the allocator refuses the context or buffer
    /// - `IndexInsertFailure` if the new xid is still held by a live call
    ///
    /// Either way nothing reached the wire.
    pub fn allocate(
        self: &Arc<Self>,
        procedure: ProcId,
        args: Arc<dyn CallArgs>,
        results: Arc<dyn CallResults>,
        timeout: Duration,
    ) -> Result<CallContext> {
        self.allocator.alloc_context()?;
        let msg = match self.allocator.alloc_msg() {
            Ok(msg) => msg,
            Err(e) => {
                self.allocator.free_context();
                return Err(e);
            }
        };

        let shared = Arc::new(CallShared::new(msg));
        let deadline = self.clock().deadline_after(timeout);

        let inserted = {
            let mut state = self.state.lock();
            let xid = state.advance_xid();
            shared.set_xid(xid);
            state.index.insert(xid, Arc::downgrade(&shared)).map(|()| xid)
        };

        match inserted {
            Ok(xid) => {
                StatCounters::bump(&self.stats.calls_allocated);
                trace!(conn = %self.id(), xid = %xid, procedure = %procedure, "call allocated");
                Ok(CallContext {
                    shared,
                    conn: Arc::clone(self),
                    procedure,
                    args,
                    results,
                    timeout,
                    deadline,
                    released: false,
                })
            }
            Err(DuplicateKey(xid)) => {
                StatCounters::bump(&self.stats.insert_failures);
                warn!(conn = %self.id(), xid = %xid, "call ctx insert failed");
                let msg = std::mem::take(&mut shared.slot.lock().msg);
                self.allocator.free_msg(msg);
                self.allocator.free_context();
                Err(Error::IndexInsertFailure { xid })
            }
        }
    }

    /// Allocate with the configured default timeout
    pub fn allocate_default(
        self: &Arc<Self>,
        procedure: ProcId,
        args: Arc<dyn CallArgs>,
        results: Arc<dyn CallResults>,
    ) -> Result<CallContext> {
        let timeout = self.config().default_timeout();
        self.allocate(procedure, args, results, timeout)
    }
}

impl CallGuard<'_> {
    /// Re-key the context under a fresh xid
    ///
    /// The old xid leaves the index and the next counter value is inserted,
    /// all in one connection-mutex critical section. The pending message
    /// must be re-encoded afterwards.
    ///
    /// # Errors
    ///
    /// `IndexInsertFailure` leaves the context un-indexed: no reply can be
    /// routed to it any more. Treat the call as failed and release it.
    pub fn next_xid(&mut self) -> Result<Xid> {
        self.assert_locked("next_xid");
        let ctx = self.ctx;
        let conn = &ctx.conn;
        let old = ctx.xid();

        let inserted = {
            let mut state = conn.state.lock();
            state.index.remove_owned(old, &ctx.shared);
            let xid = state.advance_xid();
            ctx.shared.set_xid(xid);
            state.index.insert(xid, Arc::downgrade(&ctx.shared)).map(|()| xid)
        };

        match inserted {
            Ok(xid) => {
                debug!(conn = %conn.id(), old = %old, xid = %xid, "call renumbered");
                Ok(xid)
            }
            Err(DuplicateKey(xid)) => {
                StatCounters::bump(&conn.stats.insert_failures);
                warn!(conn = %conn.id(), old = %old, xid = %xid, "call ctx insert failed, call orphaned");
                Err(Error::IndexInsertFailure { xid })
            }
        }
    }

    /// Fill the pending message with this call
    ///
    /// Sets the current xid, `CALL` direction and procedure, and encodes the
    /// arguments into the body. Any previous contents are discarded.
    pub fn encode_call(&mut self) -> Result<()> {
        let xid = self.ctx.xid();
        let procedure = self.ctx.procedure;
        let args = Arc::clone(&self.ctx.args);

        let msg = &mut self.slot.msg;
        msg.reset();
        msg.xid = xid;
        msg.direction = MsgDirection::Call;
        msg.procedure = Some(procedure);
        args.encode(&mut msg.body)
    }

    /// Hand the pending message to the connection's outbound queue
    ///
    /// With a transport attached, the message is appended under the
    /// connection mutex and a fresh buffer (allocated before the mutex is
    /// taken) becomes the pending message. Without one the message is left
    /// in place; this is counted and logged but not an error.
    ///
    /// The transport's `notify_outbound` hook runs after the private lock is
    /// released, when the wait starts or the guard drops.
    ///
    /// # Errors
    ///
    /// `AllocationFailure` if no fresh buffer could be produced or the
    /// outbound queue is at its configured bound. The message stays pending.
    pub fn xfer_callmsg(&mut self) -> Result<Staged> {
        let ctx = self.ctx;
        let conn = &ctx.conn;
        let xid = ctx.xid();

        let Some(transport) = conn.transport() else {
            StatCounters::bump(&conn.stats.sends_retained);
            warn!(conn = %conn.id(), xid = %xid, "no transport attached, call message retained");
            return Ok(Staged::Retained);
        };

        let fresh = conn.allocator.alloc_msg()?;
        let limit = conn.config().max_queued_messages;

        let queued = {
            let mut state = conn.state.lock();
            if limit.map_or(false, |max| state.queue_len >= max) {
                Err(fresh)
            } else {
                let msg = std::mem::replace(&mut self.slot.msg, fresh);
                state.outbound.push_back(msg);
                state.queue_len += 1;
                Ok(state.queue_len)
            }
        };

        let queue_len = match queued {
            Ok(queue_len) => queue_len,
            Err(unused) => {
                conn.allocator.free_msg(unused);
                return Err(Error::AllocationFailure(format!(
                    "outbound queue full ({} messages)",
                    limit.unwrap_or_default()
                )));
            }
        };

        StatCounters::bump(&conn.stats.messages_queued);
        trace!(conn = %conn.id(), xid = %xid, queue_len, "call message queued");
        self.pending_notify = Some(transport);
        Ok(Staged::Queued { queue_len })
    }

    /// Block until the matching reply arrives or the wait deadline passes
    ///
    /// One absolute deadline (`now + timeout`) is captured when the wait
    /// starts. Spurious wakeups and stale replies resume the wait toward
    /// that same deadline, never extending it.
    ///
    /// A reply delivered before the wait starts is found immediately.
    ///
    /// # Errors
    ///
    /// - `WaitTimeout` if no matching reply arrived in time
    /// - `WaitError` if a `CALL` message was routed to this client call
    /// - `Aborted` if a terminal event was delivered
    ///
    /// The context stays indexed in every case; the caller releases it.
    pub fn wait_reply(&mut self) -> Result<()> {
        self.assert_locked("wait_reply");
        self.flush_notify();
        let ctx = self.ctx;
        let timeout = ctx.timeout;
        let deadline = ctx.conn.clock().deadline_after(timeout);

        self.slot.flags.insert(CallFlags::WAIT_SYNC);
        let outcome = loop {
            while !self.slot.flags.contains(CallFlags::SYNC_DONE) {
                let expired = ctx.shared.cv.wait_until(&mut self.slot, deadline).timed_out();
                if expired && !self.slot.flags.contains(CallFlags::SYNC_DONE) {
                    break;
                }
            }

            let xid = ctx.xid();
            if !self.slot.flags.contains(CallFlags::SYNC_DONE) {
                break Err(Error::WaitTimeout { xid, timeout });
            }
            if let Some(reason) = &self.slot.terminal {
                break Err(Error::Aborted {
                    xid,
                    reason: reason.clone(),
                });
            }

            let msg = &self.slot.msg;
            match msg.direction {
                MsgDirection::Reply if msg.xid == xid => break Ok(()),
                MsgDirection::Reply => {
                    StatCounters::bump(&ctx.conn.stats.stale_replies);
                    debug!(conn = %ctx.conn.id(), xid = %xid, stale = %msg.xid, "stale reply, still waiting");
                    self.slot.flags.remove(CallFlags::SYNC_DONE);
                }
                MsgDirection::Call => {
                    break Err(Error::WaitError {
                        xid,
                        reason: format!("inbound call (xid {}) routed to client call", msg.xid),
                    });
                }
            }
        };
        self.slot.flags.remove(CallFlags::WAIT_SYNC);
        outcome
    }

    /// Decode the delivered reply with the call's results codec
    ///
    /// # Errors
    ///
    /// `WaitError` if no matching reply has been delivered; codec errors
    /// from the results codec.
    pub fn decode_results(&self) -> Result<()> {
        let Some(reply) = self.reply() else {
            return Err(Error::WaitError {
                xid: self.ctx.xid(),
                reason: "no matching reply delivered".to_string(),
            });
        };
        self.ctx.results.decode(&reply.body)
    }
}

impl CallContext {
    /// Remove the context from the index and free its buffers
    ///
    /// Consumes the context. A reply arriving afterwards finds no live call.
    pub fn release(mut self) {
        self.retire();
    }

    fn retire(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let xid = self.xid();
        let removed = self.conn.state.lock().index.remove_owned(xid, &self.shared);

        let msg = std::mem::take(&mut self.shared.slot.lock().msg);
        self.conn.allocator.free_msg(msg);
        self.conn.allocator.free_context();

        StatCounters::bump(&self.conn.stats.calls_released);
        trace!(conn = %self.conn.id(), xid = %xid, removed, "call released");
    }
}

impl Drop for CallContext {
    fn drop(&mut self) {
        self.retire();
    }
}
