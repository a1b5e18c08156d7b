//! The resizable, lock-free hash index.
//!
//! Grounded on `vasi_sync::atomic_tls_map`'s bucket-array-over-atomics shape,
//! and on the classic Harris/Michael lock-free list (the tag bit on a
//! `crossbeam_epoch::Atomic`'s pointer marks a node as logically deleted
//! before it is physically unlinked, with any thread that walks past it
//! "helping" finish the unlink) built on top of `crossbeam_epoch` itself —
//! `crossbeam-epoch` is this crate's reclamation engine (see `SPEC_FULL.md`
//! §4.3 and §10): its grace-period guarantee already gives us everything a
//! hand-rolled epoch counter would, so there is no separate reclamation
//! module.
//!
//! Chain membership is represented by [`Link`], a small node distinct from
//! [`Entry`] (see `crate::entry`'s module doc for why): a bucket-array resize
//! rehashes `Link`s into a fresh array, copying each `Link`'s `Entry`
//! pointer verbatim, so no `Entry` is ever moved, reallocated, or even
//! touched by a resize.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

use crate::entry::{self, Entry};
use crate::node::Node;
use crate::nodeid::NodeId;

/// One bucket-chain link. Distinct from `Entry` so resizes never touch
/// entries (see the module doc).
struct Link {
    entry: Atomic<Entry>,
    next: Atomic<Link>,
}

struct Table {
    buckets: Box<[Atomic<Link>]>,
    mask: usize,
}

impl Table {
    fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let buckets = (0..capacity).map(|_| Atomic::null()).collect();
        Table {
            buckets,
            mask: capacity - 1,
        }
    }

    fn bucket_for(&self, id: &NodeId) -> &Atomic<Link> {
        &self.buckets[(id.bucket_hash() as usize) & self.mask]
    }

    fn capacity(&self) -> usize {
        self.buckets.len()
    }
}

/// The address-space store's hash index: maps `NodeId` to `Entry`.
pub(crate) struct HashIndex {
    table: Atomic<Table>,
    len: AtomicUsize,
    resizing: AtomicBool,
    load_factor: f32,
}

impl HashIndex {
    pub(crate) fn new(initial_buckets: usize, load_factor: f32) -> Self {
        HashIndex {
            table: Atomic::new(Table::with_capacity(initial_buckets)),
            len: AtomicUsize::new(0),
            resizing: AtomicBool::new(false),
            load_factor,
        }
    }

    pub(crate) fn len_hint(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Finds the alive entry for `id`, if any.
    pub(crate) fn lookup<'g>(&self, id: &NodeId, guard: &'g Guard) -> Option<Shared<'g, Entry>> {
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let bucket = table.bucket_for(id);
        let (_, curr) = find(bucket, id, guard);
        if curr.is_null() {
            None
        } else {
            let curr_ref = unsafe { curr.deref() };
            Some(curr_ref.entry.load(Ordering::Acquire, guard))
        }
    }

    /// Inserts a brand-new node under its own id. Fails (giving the node
    /// back) if an alive entry with that id already exists.
    pub(crate) fn insert_unique<'g>(
        &self,
        node: Node,
        initial_borrows: u16,
        guard: &'g Guard,
    ) -> Result<Shared<'g, Entry>, Node> {
        let entry = Entry::new(node, initial_borrows);
        let id = entry.id.clone();
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let bucket = table.bucket_for(&id);

        let entry_shared = Owned::new(entry).into_shared(guard);
        let mut new_link = Owned::new(Link {
            entry: Atomic::null(),
            next: Atomic::null(),
        });
        new_link.entry.store(entry_shared, Ordering::Relaxed);

        loop {
            let (_, curr) = find(bucket, &id, guard);
            if !curr.is_null() {
                return Err(reclaim_unpublished(new_link, guard));
            }
            let old_head = bucket.load(Ordering::Acquire, guard);
            new_link.next.store(old_head, Ordering::Relaxed);
            match bucket.compare_exchange(
                old_head,
                new_link,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    self.len.fetch_add(1, Ordering::Relaxed);
                    self.maybe_resize(guard);
                    return Ok(entry_shared);
                }
                Err(err) => new_link = err.new,
            }
        }
    }

    /// Atomically swaps the alive entry for `node`'s id for a new entry
    /// built from `node`. Fails (giving the node back) if no alive entry for
    /// that id exists.
    pub(crate) fn replace<'g>(
        &self,
        node: Node,
        initial_borrows: u16,
        guard: &'g Guard,
    ) -> Result<Shared<'g, Entry>, Node> {
        let Some(id) = node.node_id().cloned() else {
            return Err(node);
        };
        let entry = Entry::new(node, initial_borrows);
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let bucket = table.bucket_for(&id);

        let entry_shared = Owned::new(entry).into_shared(guard);
        let mut new_link = Owned::new(Link {
            entry: Atomic::null(),
            next: Atomic::null(),
        });
        new_link.entry.store(entry_shared, Ordering::Relaxed);

        // Claim the right to retire the old entry through the same
        // compare-exchange `delete` claims it through: tagging the old
        // link's own `next` pointer. Without this, a concurrent `delete`
        // and `replace` on the same id can each win a *different* CAS (this
        // one used to win a pred-swap instead) and both retire the same
        // `Link`/`Entry`, double-freeing it.
        let (old_link, old_link_ref) = loop {
            let (pred, curr) = find(bucket, &id, guard);
            if curr.is_null() {
                return Err(reclaim_unpublished(new_link, guard));
            }
            let curr_ref = unsafe { curr.deref() };
            let succ = curr_ref.next.load(Ordering::Acquire, guard);
            if succ.tag() != 0 {
                continue;
            }
            if curr_ref
                .next
                .compare_exchange(
                    succ,
                    succ.with_tag(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                )
                .is_err()
            {
                continue;
            }
            let _ = pred.compare_exchange(curr, succ, Ordering::AcqRel, Ordering::Acquire, guard);
            break (curr, curr_ref);
        };

        // We now exclusively own `old_link`'s retirement; splice the new
        // entry in with an ordinary head insertion (bucket-chain order
        // carries no meaning, so there's no need to land it in the same
        // chain position the old link occupied).
        loop {
            let old_head = bucket.load(Ordering::Acquire, guard);
            new_link.next.store(old_head, Ordering::Relaxed);
            match bucket.compare_exchange(
                old_head,
                new_link,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => break,
                Err(err) => new_link = err.new,
            }
        }
        retire_link_and_entry(old_link, old_link_ref, guard);
        Ok(entry_shared)
    }

    /// Removes and retires the alive entry for `id`. Returns `false` if
    /// there was none (including the case where a concurrent delete won the
    /// race first).
    pub(crate) fn delete(&self, id: &NodeId, guard: &Guard) -> bool {
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let bucket = table.bucket_for(id);
        loop {
            let (pred, curr) = find(bucket, id, guard);
            if curr.is_null() {
                return false;
            }
            let curr_ref = unsafe { curr.deref() };
            let succ = curr_ref.next.load(Ordering::Acquire, guard);
            if succ.tag() != 0 {
                continue;
            }
            if curr_ref
                .next
                .compare_exchange(
                    succ,
                    succ.with_tag(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                )
                .is_err()
            {
                continue;
            }
            let _ = pred.compare_exchange(curr, succ, Ordering::AcqRel, Ordering::Acquire, guard);
            self.len.fetch_sub(1, Ordering::Relaxed);
            retire_link_and_entry(curr, curr_ref, guard);
            return true;
        }
    }

    /// A point-in-time snapshot of every currently-alive entry, with one
    /// borrow already acquired per entry on the caller's behalf (mirrors
    /// `crate::store::Store::iterate`'s "elevate then hand out" contract).
    pub(crate) fn snapshot(&self, guard: &Guard) -> Vec<*const Entry> {
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let mut out = Vec::new();
        for bucket in table.buckets.iter() {
            let mut curr = bucket.load(Ordering::Acquire, guard);
            while !curr.is_null() {
                let curr_ref = unsafe { curr.deref() };
                let next = curr_ref.next.load(Ordering::Acquire, guard);
                if next.tag() == 0 {
                    let entry_shared = curr_ref.entry.load(Ordering::Acquire, guard);
                    let entry_ref = unsafe { entry_shared.deref() };
                    entry_ref.refcount.acquire_borrow();
                    out.push(entry_shared.as_raw());
                }
                curr = next.with_tag(0);
            }
        }
        out
    }

    /// Best-effort coarse-grained resize: only one resizer runs at a time
    /// (an `AtomicBool` test-and-set), and it never blocks lookups,
    /// inserts, or deletes against the table it's migrating away from — see
    /// `SPEC_FULL.md` §10 for the consequences this has for cross-thread
    /// ordering during a resize.
    fn maybe_resize(&self, guard: &Guard) {
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let len = self.len.load(Ordering::Relaxed) as f32;
        if len / table.capacity() as f32 <= self.load_factor {
            return;
        }
        if self
            .resizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let old_table_shared = self.table.load(Ordering::Acquire, guard);
        let old_table = unsafe { old_table_shared.deref() };
        let new_capacity = old_table.capacity() * 2;
        let new_table = Table::with_capacity(new_capacity);

        for bucket in old_table.buckets.iter() {
            let mut curr = bucket.load(Ordering::Acquire, guard);
            while !curr.is_null() {
                let curr_ref = unsafe { curr.deref() };
                let next = curr_ref.next.load(Ordering::Acquire, guard);
                if next.tag() == 0 {
                    let entry_shared = curr_ref.entry.load(Ordering::Acquire, guard);
                    let entry_ref = unsafe { entry_shared.deref() };
                    let new_bucket = new_table.bucket_for(&entry_ref.id);
                    let mut fresh = Owned::new(Link {
                        entry: Atomic::null(),
                        next: Atomic::null(),
                    });
                    fresh.entry.store(entry_shared, Ordering::Relaxed);
                    let new_head = new_bucket.load(Ordering::Relaxed, guard);
                    fresh.next.store(new_head, Ordering::Relaxed);
                    new_bucket.store(fresh, Ordering::Relaxed);
                    unsafe { guard.defer_destroy(curr) };
                }
                curr = next.with_tag(0);
            }
        }

        let new_table_shared = Owned::new(new_table).into_shared(guard);
        let old_table_shared = self.table.swap(new_table_shared, Ordering::AcqRel, guard);
        unsafe { guard.defer_destroy(old_table_shared) };
        self.resizing.store(false, Ordering::Release);
    }
}

impl Drop for HashIndex {
    /// Exclusive by construction (`&mut self`): no reclamation engine
    /// needed here, since there can be no concurrent index traversal to
    /// race against. Entries with outstanding borrows are left alive; the
    /// last `Borrow` to drop reclaims them (see `crate::store::Borrow`).
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let table_shared = self.table.load(Ordering::Relaxed, guard);
        let table = unsafe { table_shared.deref() };
        for bucket in table.buckets.iter() {
            let mut curr = bucket.load(Ordering::Relaxed, guard).with_tag(0);
            while !curr.is_null() {
                let curr_ref = unsafe { curr.deref() };
                let next = curr_ref.next.load(Ordering::Relaxed, guard).with_tag(0);
                let entry_shared = curr_ref.entry.load(Ordering::Relaxed, guard);
                if unsafe { Entry::finalize(entry_shared.as_raw()) } == crate::refcount::Transition::Finalize {
                    unsafe { entry::reclaim(entry_shared.as_raw()) };
                }
                drop(unsafe { curr.into_owned() });
                curr = next;
            }
        }
        drop(unsafe { table_shared.into_owned() });
    }
}

/// Schedules an unlinked link's link-node for reclamation, and its entry's
/// deferred finalization, once the current grace period ends.
fn retire_link_and_entry(link: Shared<'_, Link>, link_ref: &Link, guard: &Guard) {
    let entry_shared = link_ref.entry.load(Ordering::Acquire, guard);
    let entry_ptr = entry_shared.as_raw();
    unsafe {
        guard.defer_destroy(link);
        guard.defer_unchecked(move || {
            if Entry::finalize(entry_ptr) == crate::refcount::Transition::Finalize {
                entry::reclaim(entry_ptr);
            }
        });
    }
}

/// Unwraps an entry that was allocated but never published into any
/// bucket, giving the caller's node back.
fn reclaim_unpublished(new_link: Owned<Link>, guard: &Guard) -> Node {
    let entry_shared = new_link.entry.load(Ordering::Relaxed, guard);
    let entry_owned = unsafe { entry_shared.into_owned() };
    drop(new_link);
    (*entry_owned.into_box()).into_node()
}

/// Walks `bucket`'s chain for `id`, helping unlink any logically-deleted
/// (tag-marked) link it passes. Returns the link slot that currently points
/// at the match (either the bucket head or some other link's `next`), and
/// the match itself (null if absent).
fn find<'g>(bucket: &'g Atomic<Link>, id: &NodeId, guard: &'g Guard) -> (&'g Atomic<Link>, Shared<'g, Link>) {
    'retry: loop {
        let mut pred = bucket;
        let mut curr = pred.load(Ordering::Acquire, guard);
        loop {
            if curr.is_null() {
                return (pred, curr);
            }
            let curr_ref = unsafe { curr.deref() };
            let succ = curr_ref.next.load(Ordering::Acquire, guard);
            if succ.tag() != 0 {
                let unmarked = succ.with_tag(0);
                match pred.compare_exchange(
                    curr,
                    unmarked,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                ) {
                    Ok(_) => {
                        unsafe { guard.defer_destroy(curr) };
                        curr = unmarked;
                        continue;
                    }
                    Err(_) => continue 'retry,
                }
            }
            let entry_ref = unsafe { curr_ref.entry.load(Ordering::Acquire, guard).deref() };
            if entry_ref.id == *id {
                return (pred, curr);
            }
            pred = &curr_ref.next;
            curr = succ;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeHeader, ObjectAttributes};

    fn object(id: NodeId) -> Node {
        Node::Object(
            NodeHeader::new("Obj").with_id(id),
            ObjectAttributes { event_notifier: 0 },
        )
    }

    #[test]
    fn insert_then_lookup_finds_it() {
        let index = HashIndex::new(32, 0.75);
        let guard = crossbeam_epoch::pin();
        let id = NodeId::numeric(1, 1);
        index.insert_unique(object(id.clone()), 0, &guard).unwrap();
        let found = index.lookup(&id, &guard);
        assert!(found.is_some());
        assert_eq!(index.len_hint(), 1);
    }

    #[test]
    fn duplicate_insert_is_rejected_and_node_is_returned() {
        let index = HashIndex::new(32, 0.75);
        let guard = crossbeam_epoch::pin();
        let id = NodeId::numeric(1, 2);
        index.insert_unique(object(id.clone()), 0, &guard).unwrap();
        let err = index.insert_unique(object(id.clone()), 0, &guard).unwrap_err();
        assert_eq!(err.node_id(), Some(&id));
    }

    #[test]
    fn delete_then_lookup_finds_nothing() {
        let index = HashIndex::new(32, 0.75);
        let guard = crossbeam_epoch::pin();
        let id = NodeId::numeric(1, 3);
        index.insert_unique(object(id.clone()), 0, &guard).unwrap();
        assert!(index.delete(&id, &guard));
        assert!(index.lookup(&id, &guard).is_none());
        assert!(!index.delete(&id, &guard));
    }

    #[test]
    fn replace_swaps_content_and_retires_the_old_entry() {
        let index = HashIndex::new(32, 0.75);
        let guard = crossbeam_epoch::pin();
        let id = NodeId::numeric(1, 4);
        index.insert_unique(object(id.clone()), 0, &guard).unwrap();
        let replaced = index.replace(object(id.clone()), 0, &guard);
        assert!(replaced.is_ok());
        assert_eq!(index.len_hint(), 1);
    }

    #[test]
    fn concurrent_replace_and_delete_retire_the_old_link_exactly_once() {
        // Regression test for the double-retire bug: `replace` used to claim
        // ownership of the displaced link through a different CAS than
        // `delete` does, so a racing pair could both retire the same link.
        use std::sync::{Arc, Barrier};
        use std::thread;

        for round in 0..200u32 {
            let index = Arc::new(HashIndex::new(32, 0.75));
            let id = NodeId::numeric(1, 1000 + round);
            {
                let guard = crossbeam_epoch::pin();
                index.insert_unique(object(id.clone()), 0, &guard).unwrap();
            }

            let barrier = Arc::new(Barrier::new(2));
            let deleter = {
                let index = Arc::clone(&index);
                let id = id.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let guard = crossbeam_epoch::pin();
                    index.delete(&id, &guard)
                })
            };
            let replacer = {
                let index = Arc::clone(&index);
                let id = id.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let guard = crossbeam_epoch::pin();
                    index.replace(object(id), 0, &guard).is_ok()
                })
            };

            deleter.join().unwrap();
            replacer.join().unwrap();
            // No crash and no inconsistent state: the id is either gone or
            // present exactly once, never double-freed underneath a lookup.
            let guard = crossbeam_epoch::pin();
            let _ = index.lookup(&id, &guard);
        }
    }

    #[test]
    fn resize_preserves_every_entry() {
        let index = HashIndex::new(32, 0.75);
        let guard = crossbeam_epoch::pin();
        for i in 0..64u32 {
            index
                .insert_unique(object(NodeId::numeric(1, i)), 0, &guard)
                .unwrap();
        }
        for i in 0..64u32 {
            assert!(index.lookup(&NodeId::numeric(1, i), &guard).is_some());
        }
    }
}
