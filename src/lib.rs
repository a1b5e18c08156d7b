// https://github.com/rust-lang/rfcs/blob/master/text/2585-unsafe-block-in-unsafe-fn.md
#![deny(unsafe_op_in_unsafe_fn)]

//! A concurrent, in-memory address-space store for an OPC UA information
//! model: a `NodeId`-keyed map from node identifiers to nodes, built so
//! that `get`/`iterate` never block and never take a lock, while
//! `insert`/`replace`/`remove` serialize only against the specific entries
//! they touch.
//!
//! The module layout mirrors the dependency order of the data structures
//! themselves: node identity and content (`nodeid`, `node`) at the bottom,
//! the refcounted storage record built on top of them (`refcount`,
//! `entry`), the lock-free resizable hash index as a peer of the
//! reclamation engine (`index`, which leans on `crossbeam_epoch` directly
//! rather than a separate hand-rolled epoch module), and the public
//! `Store` façade on top of all of it.

mod config;
mod entry;
mod error;
mod index;
mod node;
mod nodeid;
mod refcount;
mod store;

pub use config::StoreConfig;
pub use error::StoreError;
pub use node::{
    DataTypeAttributes, DataValue, MethodAttributes, Node, NodeClass, NodeHeader,
    ObjectAttributes, ObjectTypeAttributes, Reference, ReferenceTypeAttributes, StatusCode,
    Variant, VariableAttributes, VariableTypeAttributes, ViewAttributes,
};
pub use nodeid::NodeId;
pub use store::{Borrow, Iter, Store};
