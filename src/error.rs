//! Store error taxonomy.
//!
//! `Absent` from the distilled spec's status list isn't here: a missing
//! `get` is an ordinary `None`, not a failure (see `SPEC_FULL.md` §7).

use thiserror::Error;

/// Failure outcomes for the store's mutating operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Entry allocation failed.
    #[error("out of memory")]
    OutOfMemory,
    /// A caller-visible stand-in for the source's "unknown nodeClass"
    /// abort (unreachable in this crate since `Node` is a closed enum, kept
    /// for API parity with the distilled spec's status codes), or the
    /// id-synthesis retry budget was exhausted without finding a free id.
    #[error("internal error")]
    InternalError,
    /// `insert` found an existing alive entry for the requested id.
    #[error("node id already exists")]
    NodeIdExists,
    /// `replace`/`remove` found no alive entry for the requested id.
    #[error("node id unknown")]
    NodeIdUnknown,
}
