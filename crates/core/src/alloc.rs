//! Allocation contract for contexts and message buffers
//!
//! Allocation failure is reported, never fatal. The call core turns it into
//! [`Error::AllocationFailure`] before anything reaches the wire.
//!
//! - [`HeapAllocator`]: unbounded, preallocates message bodies
//! - [`BoundedAllocator`]: admission limits layered over another allocator

use crate::error::{Error, Result};
use crate::types::RpcMsg;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Allocator for call contexts and message buffers
///
/// `alloc_context`/`free_context` account for context storage; the context
/// value itself lives wherever its owner puts it.
pub trait Allocator: Send + Sync + Debug {
    /// Reserve storage for one call context
    fn alloc_context(&self) -> Result<()>;

    /// Return storage reserved by `alloc_context`
    fn free_context(&self);

    /// Produce a fresh, empty message buffer
    fn alloc_msg(&self) -> Result<RpcMsg>;

    /// Return a message buffer
    fn free_msg(&self, msg: RpcMsg);
}

/// Default allocator backed by the global heap
#[derive(Debug, Clone)]
pub struct HeapAllocator {
    msg_capacity: usize,
}

impl HeapAllocator {
    /// Allocator whose message bodies start with `msg_capacity` bytes reserved
    pub fn new(msg_capacity: usize) -> Self {
        Self { msg_capacity }
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MSG_BUFFER_CAPACITY)
    }
}

impl Allocator for HeapAllocator {
    fn alloc_context(&self) -> Result<()> {
        Ok(())
    }

    fn free_context(&self) {}

    fn alloc_msg(&self) -> Result<RpcMsg> {
        Ok(RpcMsg::with_capacity(self.msg_capacity))
    }

    fn free_msg(&self, msg: RpcMsg) {
        drop(msg);
    }
}

/// Caps the number of live contexts and message buffers
///
/// Message buffers count as live from `alloc_msg` until `free_msg`.
/// Buffers handed to the outbound queue stay live until the transport
/// returns them, so a transport that never frees will exhaust the bound.
#[derive(Debug)]
pub struct BoundedAllocator {
    inner: Arc<dyn Allocator>,
    max_contexts: Option<usize>,
    max_msgs: Option<usize>,
    live_contexts: AtomicUsize,
    live_msgs: AtomicUsize,
}

impl BoundedAllocator {
    /// Wrap `inner`; `None` leaves that resource unbounded
    pub fn new(
        inner: Arc<dyn Allocator>,
        max_contexts: Option<usize>,
        max_msgs: Option<usize>,
    ) -> Self {
        Self {
            inner,
            max_contexts,
            max_msgs,
            live_contexts: AtomicUsize::new(0),
            live_msgs: AtomicUsize::new(0),
        }
    }

    /// Currently reserved contexts
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::Acquire)
    }

    /// Currently outstanding message buffers
    pub fn live_msgs(&self) -> usize {
        self.live_msgs.load(Ordering::Acquire)
    }

    fn reserve(counter: &AtomicUsize, limit: Option<usize>, what: &str) -> Result<()> {
        let Some(limit) = limit else {
            counter.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        };
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            })
            .map(|_| ())
            .map_err(|live| {
                Error::AllocationFailure(format!("{} limit reached ({} of {})", what, live, limit))
            })
    }

    fn unreserve(counter: &AtomicUsize) {
        let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
            live.checked_sub(1)
        });
    }
}

impl Allocator for BoundedAllocator {
    fn alloc_context(&self) -> Result<()> {
        Self::reserve(&self.live_contexts, self.max_contexts, "context")?;
        if let Err(e) = self.inner.alloc_context() {
            Self::unreserve(&self.live_contexts);
            return Err(e);
        }
        Ok(())
    }

    fn free_context(&self) {
        self.inner.free_context();
        Self::unreserve(&self.live_contexts);
    }

    fn alloc_msg(&self) -> Result<RpcMsg> {
        Self::reserve(&self.live_msgs, self.max_msgs, "message buffer")?;
        self.inner.alloc_msg().map_err(|e| {
            Self::unreserve(&self.live_msgs);
            e
        })
    }

    fn free_msg(&self, msg: RpcMsg) {
        self.inner.free_msg(msg);
        Self::unreserve(&self.live_msgs);
    }
}
