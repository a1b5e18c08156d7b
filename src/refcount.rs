//! The packed alive-bit/borrow-count word.
//!
//! Modeled on `vasi_sync::scmutex`'s `AtomicFutexWord`, which packs a
//! lock-state bit together with a sleeper count into one machine word so a
//! single atomic read-modify-write can update both — exactly the property
//! the distilled spec asks for ("single-word CAS unites 'clear alive' and
//! 'read current borrow count'"). Where the source's `scmutex` packs into a
//! `u32` (lock bit + 31-bit sleeper count), this packs into a `u16` (alive
//! bit + 15-bit borrow count), per the distilled spec's field layout.

use std::sync::atomic::{AtomicU16, Ordering};

const ALIVE: u16 = 1 << 15;
const COUNT_MASK: u16 = ALIVE - 1;
const MAX_BORROWS: u16 = COUNT_MASK;

/// Decoded view of a [`RefCount`]'s packed word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Word {
    alive: bool,
    borrows: u16,
}

impl Word {
    fn from_raw(raw: u16) -> Self {
        Self {
            alive: raw & ALIVE != 0,
            borrows: raw & COUNT_MASK,
        }
    }

    fn to_raw(self) -> u16 {
        (if self.alive { ALIVE } else { 0 }) | self.borrows
    }

    fn is_dead(self) -> bool {
        !self.alive && self.borrows == 0
    }
}

/// `refcount` from the distilled spec: high bit is the alive flag, low 15
/// bits are the number of outstanding `get`/`iterate` borrows not yet
/// released.
///
/// An entry is destroyed exactly when the alive bit is clear *and* the
/// borrow count is zero (invariant 3). Because both conditions live in one
/// word, `finalize` and `release_borrow` race safely against each other: at
/// most one of them observes the transition into the all-zero state via a
/// successful `compare_exchange`, and that caller is the one responsible for
/// running the deleter.
pub(crate) struct RefCount(AtomicU16);

/// What the caller owes after a refcount transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// The entry is still reachable by some other observer; do nothing.
    StillLive,
    /// This was the last reference: the caller must run the deleter and
    /// free the envelope.
    Finalize,
}

impl RefCount {
    /// A freshly inserted, alive entry with `initial_borrows` already
    /// accounted for (0 or 1 in practice: `insert`/`replace`'s `getManaged`
    /// flag).
    pub(crate) fn new_alive(initial_borrows: u16) -> Self {
        assert!(initial_borrows <= MAX_BORROWS);
        Self(AtomicU16::new(
            Word {
                alive: true,
                borrows: initial_borrows,
            }
            .to_raw(),
        ))
    }

    /// Acquire one borrow (`get`/`iterate`). The alive bit is left
    /// untouched; a borrow may outlive the entry's unlinking from the
    /// index, per invariant 5.
    ///
    /// Panics on overflow past `2^15 - 1` outstanding borrows — per the
    /// distilled spec this is a detectable caller bug, not a recoverable
    /// error, mirroring `AtomicFutexWord::inc_sleepers_and_fetch`'s
    /// `checked_add(1).unwrap()` panic-on-overflow policy.
    pub(crate) fn acquire_borrow(&self) {
        let mut current = Word::from_raw(self.0.load(Ordering::Relaxed));
        loop {
            let next = Word {
                alive: current.alive,
                borrows: current
                    .borrows
                    .checked_add(1)
                    .expect("refcount overflow: too many outstanding borrows"),
            };
            match self.0.compare_exchange_weak(
                current.to_raw(),
                next.to_raw(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(raw) => current = Word::from_raw(raw),
            }
        }
    }

    /// Release one borrow (matches a prior `acquire_borrow`). Returns
    /// whether this release brought the entry to `(alive=false,
    /// borrows=0)`, in which case the caller must finalize it.
    ///
    /// Panics on underflow, mirroring the source's "corrupted refcount"
    /// fatal condition (unbalanced `release`).
    pub(crate) fn release_borrow(&self) -> Transition {
        let mut current = Word::from_raw(self.0.load(Ordering::Relaxed));
        loop {
            let next = Word {
                alive: current.alive,
                borrows: current
                    .borrows
                    .checked_sub(1)
                    .expect("refcount underflow: unbalanced release"),
            };
            match self.0.compare_exchange_weak(
                current.to_raw(),
                next.to_raw(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) if next.is_dead() => return Transition::Finalize,
                Ok(_) => return Transition::StillLive,
                Err(raw) => current = Word::from_raw(raw),
            }
        }
    }

    /// Clear the alive bit (called once, from `retire`'s deferred
    /// finalization callback). Returns whether the entry is now dead.
    ///
    /// Panics if the alive bit was already clear: `finalize` runs at most
    /// once per entry by construction (the reclamation engine runs each
    /// retired entry's callback exactly once).
    pub(crate) fn clear_alive(&self) -> Transition {
        let mut current = Word::from_raw(self.0.load(Ordering::Relaxed));
        loop {
            assert!(current.alive, "finalize called on an already-dead entry");
            let next = Word {
                alive: false,
                borrows: current.borrows,
            };
            match self.0.compare_exchange_weak(
                current.to_raw(),
                next.to_raw(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) if next.is_dead() => return Transition::Finalize,
                Ok(_) => return Transition::StillLive,
                Err(raw) => current = Word::from_raw(raw),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn borrow_count(&self) -> u16 {
        Word::from_raw(self.0.load(Ordering::Relaxed)).borrows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_alive_with_requested_borrows() {
        let rc = RefCount::new_alive(1);
        assert_eq!(rc.borrow_count(), 1);
    }

    #[test]
    fn acquire_then_release_returns_to_zero() {
        let rc = RefCount::new_alive(0);
        rc.acquire_borrow();
        assert_eq!(rc.borrow_count(), 1);
        assert_eq!(rc.release_borrow(), Transition::StillLive);
        assert_eq!(rc.borrow_count(), 0);
    }

    #[test]
    fn clear_alive_with_no_borrows_finalizes_immediately() {
        let rc = RefCount::new_alive(0);
        assert_eq!(rc.clear_alive(), Transition::Finalize);
    }

    #[test]
    fn clear_alive_with_outstanding_borrow_defers_to_release() {
        let rc = RefCount::new_alive(1);
        assert_eq!(rc.clear_alive(), Transition::StillLive);
        assert_eq!(rc.release_borrow(), Transition::Finalize);
    }

    #[test]
    fn release_after_clear_alive_finalizes_exactly_once() {
        let rc = RefCount::new_alive(2);
        rc.clear_alive();
        assert_eq!(rc.release_borrow(), Transition::StillLive);
        assert_eq!(rc.release_borrow(), Transition::Finalize);
    }

    #[test]
    #[should_panic(expected = "unbalanced release")]
    fn unbalanced_release_panics() {
        let rc = RefCount::new_alive(0);
        rc.release_borrow();
    }

    #[test]
    #[should_panic(expected = "already-dead")]
    fn double_finalize_panics() {
        let rc = RefCount::new_alive(0);
        rc.clear_alive();
        rc.clear_alive();
    }

    #[test]
    #[should_panic(expected = "too many outstanding borrows")]
    fn borrow_overflow_panics() {
        let rc = RefCount::new_alive(MAX_BORROWS);
        rc.acquire_borrow();
    }
}
