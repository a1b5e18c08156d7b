//! The storage record.
//!
//! Grounded on `objgraph::rc::RootedRc`: both types are a refcounted
//! envelope around one value, destroyed through an explicit operation
//! (`safely_drop` there, `finalize`/`release` here) rather than
//! `Drop::drop`, because ordinary `Drop` can't observe "was this the last
//! reference" the way these atomic refcounts need to. Unlike `RootedRc`,
//! which protects its count with a caller-held lock, `Entry`'s count is a
//! lock-free [`RefCount`] (see `crate::refcount`), since the whole point of
//! the store is that readers never take a lock.

use crate::nodeid::NodeId;
use crate::node::Node;
use crate::refcount::{RefCount, Transition};

/// One node plus its reclamation bookkeeping.
///
/// Chain membership (the spec's `membership` field) lives in `crate::index`'s
/// `Link` type rather than here, so that a bucket-array resize can rehash
/// chain membership freely without ever touching — and so without ever
/// racing a concurrent reader of — the `Entry` itself. `Entry`'s address is
/// therefore stable for its whole lifetime regardless of resizes; callers
/// only ever see it through a `crossbeam_epoch::Shared` pointer or a
/// `Borrow`.
pub(crate) struct Entry {
    pub(crate) id: NodeId,
    pub(crate) refcount: RefCount,
    node: Node,
}

impl Entry {
    /// Builds a fresh, alive entry. `initial_borrows` is 1 when the caller
    /// requested `getManaged`, 0 otherwise.
    pub(crate) fn new(node: Node, initial_borrows: u16) -> Entry {
        let id = node
            .node_id()
            .cloned()
            .expect("Entry::new requires a node with an id already assigned");
        Entry {
            id,
            refcount: RefCount::new_alive(initial_borrows),
            node,
        }
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    /// Unwraps an entry that was allocated but never published into the
    /// index (an `insert`/`replace` collision discovered after the entry
    /// was built). Gives the caller's node back so it isn't silently
    /// dropped on a failed call (see `SPEC_FULL.md` §7).
    pub(crate) fn into_node(self) -> Node {
        self.node
    }

    /// Deferred finalization callback, run by the reclamation engine no
    /// earlier than the grace period after `retire` (see `crate::index`).
    /// Clears the alive bit; if that brings the refcount to zero, the
    /// caller must reclaim the entry (which runs `Node`'s ordinary drop
    /// glue — the variant deleter, see `crate::node`).
    ///
    /// # Safety
    ///
    /// `entry` must point at a live, still-allocated `Entry`.
    pub(crate) unsafe fn finalize(entry: *const Entry) -> Transition {
        unsafe { (*entry).refcount.clear_alive() }
    }
}

/// Actually frees an entry's envelope, running `Node`'s drop glue.
///
/// # Safety
///
/// `entry` must be the unique remaining reference to an `Entry` that was
/// allocated via `crossbeam_epoch::Owned::new` and is no longer reachable
/// from the index or from any other borrow — i.e. this must be called
/// exactly once, from whichever of `finalize`/`Borrow::drop` observes the
/// refcount transition to `(alive=false, borrows=0)`.
pub(crate) unsafe fn reclaim(entry: *const Entry) {
    let shared = crossbeam_epoch::Shared::from(entry);
    drop(unsafe { shared.into_owned() });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeHeader, ObjectAttributes};

    fn object(id: NodeId) -> Node {
        Node::Object(NodeHeader::new("Obj").with_id(id), ObjectAttributes {
            event_notifier: 0,
        })
    }

    #[test]
    fn new_entry_copies_id_from_node() {
        let id = NodeId::numeric(0, 1);
        let entry = Entry::new(object(id.clone()), 0);
        assert_eq!(entry.id, id);
        assert_eq!(entry.node().node_id(), Some(&id));
    }

    #[test]
    #[should_panic(expected = "requires a node with an id")]
    fn new_entry_without_id_panics() {
        let header = NodeHeader::new("Obj");
        let node = Node::Object(header, ObjectAttributes { event_notifier: 0 });
        Entry::new(node, 0);
    }
}
