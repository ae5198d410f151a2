//! Transaction index
//!
//! Ordered map from xid to the live call that holds it, scoped to one
//! connection. Entries are weak: the index never keeps a call alive, it only
//! routes replies to calls whose owners still hold them.
//!
//! All access goes through the connection mutex, so the index itself is not
//! synchronized.

use callmux_core::Xid;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Insert found the xid already indexed
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("duplicate key: xid {0} already indexed")]
pub struct DuplicateKey(pub Xid);

/// Uniquely-keyed xid → call index
#[derive(Debug)]
pub struct TransactionIndex<T> {
    entries: BTreeMap<Xid, Weak<T>>,
}

impl<T> Default for TransactionIndex<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> TransactionIndex<T> {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `entry` under `xid`
    ///
    /// Fails without modifying the index if `xid` is already present. Under
    /// correct counter discipline this only happens after wraparound.
    pub fn insert(&mut self, xid: Xid, entry: Weak<T>) -> Result<(), DuplicateKey> {
        use std::collections::btree_map::Entry;
        match self.entries.entry(xid) {
            Entry::Occupied(_) => Err(DuplicateKey(xid)),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Remove and return the entry for `xid`; absent is not an error
    pub fn remove(&mut self, xid: Xid) -> Option<Weak<T>> {
        self.entries.remove(&xid)
    }

    /// Remove the entry for `xid` only if it refers to `owner`
    ///
    /// A call whose renumbering failed still carries the colliding xid; this
    /// keeps its release from evicting the call that really owns that xid.
    pub fn remove_owned(&mut self, xid: Xid, owner: &Arc<T>) -> bool {
        let owned = self
            .entries
            .get(&xid)
            .map_or(false, |entry| std::ptr::eq(entry.as_ptr(), Arc::as_ptr(owner)));
        if owned {
            self.entries.remove(&xid);
        }
        owned
    }

    /// Look up the live call holding `xid`
    ///
    /// Returns `None` if absent or if the call is being dropped.
    pub fn find(&self, xid: Xid) -> Option<Arc<T>> {
        self.entries.get(&xid).and_then(Weak::upgrade)
    }

    /// Whether `xid` is indexed
    pub fn contains(&self, xid: Xid) -> bool {
        self.entries.contains_key(&xid)
    }

    /// Number of indexed calls
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no call is indexed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indexed xids in ascending order
    pub fn xids(&self) -> impl Iterator<Item = Xid> + '_ {
        self.entries.keys().copied()
    }

    /// Every call still alive
    pub fn live(&self) -> Vec<Arc<T>> {
        self.entries.values().filter_map(Weak::upgrade).collect()
    }
}
