//! The address-space store façade.
//!
//! `Store` is the crate's one public entry point: every operation pins an
//! epoch guard for the span of the call (`crossbeam_epoch::pin`), which is
//! the Rust equivalent of the distilled spec's "enter a read section" —
//! there is no separate `enter`/`exit` pair to forget to call.
//!
//! `Borrow<'a>` replaces the distilled spec's explicit `release(node)` call
//! with RAII, in the manner of `objgraph::rc::RootedRc`'s guard types: a
//! `Borrow` drops its reference automatically, and also exposes an explicit
//! [`Borrow::release`] for callers that want symmetry with the source API
//! or want to force the drop at a specific point.

use std::marker::PhantomData;
use std::ops::Deref;

use crate::config::StoreConfig;
use crate::entry::{self, Entry};
use crate::error::StoreError;
use crate::index::HashIndex;
use crate::node::Node;
use crate::nodeid::NodeId;
use crate::refcount::Transition;

/// Knuth's multiplicative hashing constant, used to perturb a synthesized
/// id on each retry so repeated collisions don't all probe the same
/// sequence (see `SPEC_FULL.md` §4.4).
const PERTURB: u32 = 2_654_435_761;

/// A concurrent, in-memory address-space store.
///
/// Every operation takes `&self`; share a `Store` across threads behind an
/// `Arc` rather than cloning it.
pub struct Store {
    index: HashIndex,
    config: StoreConfig,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// A store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        log::debug!(
            "creating store: initial_buckets={} load_factor={}",
            config.initial_buckets_pow2(),
            config.load_factor
        );
        Store {
            index: HashIndex::new(config.initial_buckets_pow2(), config.load_factor),
            config,
        }
    }

    /// Inserts `node`. If `node` already carries an id, that id must not
    /// already be in the store (`StoreError::NodeIdExists`). If it doesn't,
    /// the store synthesizes one in the reserved namespace, retrying on
    /// collision up to `config.max_id_synthesis_retries` times before
    /// reporting `StoreError::InternalError` (see `SPEC_FULL.md` §4.4/§10).
    ///
    /// `get_managed` mirrors the source's combined insert-and-borrow
    /// convenience: when true, the returned `Borrow` is the caller's first
    /// reference, already accounted for in the entry's refcount.
    pub fn insert(&self, node: Node, get_managed: bool) -> Result<Option<Borrow<'_>>, StoreError> {
        let guard = crossbeam_epoch::pin();
        let initial_borrows = if get_managed { 1 } else { 0 };

        if node.node_id().is_some() {
            return match self.index.insert_unique(node, initial_borrows, &guard) {
                Ok(entry) => {
                    log::trace!("insert: stored");
                    Ok(get_managed.then(|| Borrow::new(entry.as_raw())))
                }
                Err(_) => {
                    log::warn!("insert: id already exists");
                    Err(StoreError::NodeIdExists)
                }
            };
        }

        self.insert_with_synthesized_id(node, get_managed, &guard)
    }

    fn insert_with_synthesized_id(
        &self,
        mut node: Node,
        get_managed: bool,
        guard: &crossbeam_epoch::Guard,
    ) -> Result<Option<Borrow<'_>>, StoreError> {
        let initial_borrows = if get_managed { 1 } else { 0 };
        let base = (self.index.len_hint() as u32).wrapping_mul(PERTURB) | 1;
        let mut candidate = base;
        for _ in 0..self.config.max_id_synthesis_retries {
            node.set_node_id(NodeId::synthesized(candidate));
            match self.index.insert_unique(node, initial_borrows, guard) {
                Ok(entry) => {
                    log::trace!("insert: synthesized id {candidate}");
                    return Ok(get_managed.then(|| Borrow::new(entry.as_raw())));
                }
                Err(returned) => {
                    node = returned;
                    candidate = candidate.wrapping_add(base.wrapping_mul(PERTURB));
                }
            }
        }
        log::error!("insert: exhausted id-synthesis retry budget");
        Err(StoreError::InternalError)
    }

    /// Atomically swaps the stored node for `node`'s id with `node`. Fails
    /// with `StoreError::NodeIdUnknown` if `node` has no id, or no alive
    /// entry for that id exists. A borrow outstanding on the replaced entry
    /// keeps working against the old content until it's released
    /// (invariant: replace never invalidates an outstanding borrow).
    pub fn replace(&self, node: Node, get_managed: bool) -> Result<Option<Borrow<'_>>, StoreError> {
        let guard = crossbeam_epoch::pin();
        let initial_borrows = if get_managed { 1 } else { 0 };
        match self.index.replace(node, initial_borrows, &guard) {
            Ok(entry) => {
                log::trace!("replace: stored");
                Ok(get_managed.then(|| Borrow::new(entry.as_raw())))
            }
            Err(_) => {
                log::warn!("replace: id unknown");
                Err(StoreError::NodeIdUnknown)
            }
        }
    }

    /// Removes the entry for `id`. Fails with `StoreError::NodeIdUnknown`
    /// if there was none — including a entry concurrently removed by
    /// another thread first (see `SPEC_FULL.md` §5 on cross-thread
    /// ordering).
    pub fn remove(&self, id: &NodeId) -> Result<(), StoreError> {
        let guard = crossbeam_epoch::pin();
        if self.index.delete(id, &guard) {
            log::trace!("remove: deleted");
            Ok(())
        } else {
            log::warn!("remove: id unknown");
            Err(StoreError::NodeIdUnknown)
        }
    }

    /// Borrows the entry for `id`, if it's alive. The returned `Borrow`
    /// keeps the entry alive until dropped, independent of any concurrent
    /// `remove`/`replace`.
    pub fn get(&self, id: &NodeId) -> Option<Borrow<'_>> {
        let guard = crossbeam_epoch::pin();
        let entry = self.index.lookup(id, &guard)?;
        let entry_ref = unsafe { entry.deref() };
        entry_ref.refcount.acquire_borrow();
        Some(Borrow::new(entry.as_raw()))
    }

    /// A point-in-time snapshot of every currently-alive entry. Entries
    /// inserted or removed while iterating may or may not appear, per
    /// invariant 6; every entry that does appear is already borrowed, so it
    /// stays valid for the whole iteration regardless of concurrent
    /// mutation.
    pub fn iterate(&self) -> Iter<'_> {
        let guard = crossbeam_epoch::pin();
        let entries = self.index.snapshot(&guard);
        log::trace!("iterate: snapshot of {} entries", entries.len());
        Iter {
            entries: entries.into_iter(),
            _store: PhantomData,
        }
    }
}

/// Iterator returned by [`Store::iterate`].
pub struct Iter<'a> {
    entries: std::vec::IntoIter<*const Entry>,
    _store: PhantomData<&'a Store>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Borrow<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(Borrow::new)
    }
}

impl Drop for Iter<'_> {
    /// `HashIndex::snapshot` acquires one borrow per entry up front, before
    /// any `Borrow` exists to release it on drop. If the caller stops
    /// consuming the iterator early (`break`, `.take(n)`, a `?`/panic mid
    /// loop), every not-yet-yielded entry's borrow would otherwise never be
    /// released. Drain the rest through `Borrow` so each one is.
    fn drop(&mut self) {
        for entry in self.entries.by_ref() {
            drop(Borrow::new(entry));
        }
    }
}

/// An RAII handle on one borrowed entry, returned by [`Store::get`],
/// [`Store::iterate`], and the `get_managed` variants of
/// [`Store::insert`]/[`Store::replace`].
///
/// Derefs to the stored [`Node`]. Dropping releases the borrow; an entry
/// removed or replaced while still borrowed is only actually freed once
/// its last `Borrow` drops (invariant 5).
pub struct Borrow<'a> {
    entry: *const Entry,
    _store: PhantomData<&'a Store>,
}

impl<'a> Borrow<'a> {
    pub(crate) fn new(entry: *const Entry) -> Self {
        Borrow {
            entry,
            _store: PhantomData,
        }
    }

    /// Releases the borrow explicitly. Equivalent to dropping it; provided
    /// for callers that prefer to spell out the source's `release(node)`
    /// call at the point where they're done with it.
    pub fn release(self) {}
}

impl Deref for Borrow<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        // SAFETY: holding a `Borrow` means the refcount has an outstanding
        // borrow recorded against this entry, which keeps it allocated
        // even after it's unlinked from the index.
        unsafe { (*self.entry).node() }
    }
}

impl Drop for Borrow<'_> {
    fn drop(&mut self) {
        // SAFETY: see `Deref::deref`; this matches the `acquire_borrow`
        // that produced `self.entry`.
        if unsafe { (*self.entry).refcount.release_borrow() } == Transition::Finalize {
            unsafe { entry::reclaim(self.entry) };
        }
    }
}

// SAFETY: `Entry`'s refcount is lock-free atomic and `Node` is `Send`;
// moving a `Borrow` to another thread just moves which thread eventually
// calls `release_borrow`.
unsafe impl Send for Borrow<'_> {}
// SAFETY: `Deref::deref` only ever hands out a shared `&Node`; concurrent
// readers across threads are exactly what the store is built for.
unsafe impl Sync for Borrow<'_> {}
