//! Node identifiers.
//!
//! A [`NodeId`] is the key of the address-space store: a namespace index plus
//! one of four payload kinds. Namespace 1 is reserved for ids the store
//! synthesizes itself (see [`crate::store::Store::insert`]).

use std::hash::{Hash, Hasher};

/// Namespace index reserved for store-generated identifiers.
pub const SYNTHESIZED_NAMESPACE: u16 = 1;

/// The payload half of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeIdKind {
    Numeric(u32),
    String(String),
    Guid([u8; 16]),
    Opaque(Vec<u8>),
}

/// `(namespaceIndex, kind, payload)`, globally unique per server.
///
/// Equality and hashing are defined over the full tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub namespace_index: u16,
    pub kind: NodeIdKind,
}

impl NodeId {
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            kind: NodeIdKind::Numeric(value),
        }
    }

    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            kind: NodeIdKind::String(value.into()),
        }
    }

    pub fn guid(namespace_index: u16, value: [u8; 16]) -> Self {
        Self {
            namespace_index,
            kind: NodeIdKind::Guid(value),
        }
    }

    pub fn opaque(namespace_index: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace_index,
            kind: NodeIdKind::Opaque(value.into()),
        }
    }

    /// Builds the store-synthesized id for auto-id synthesis, namespace 1,
    /// numeric payload `value`.
    pub(crate) fn synthesized(value: u32) -> Self {
        Self::numeric(SYNTHESIZED_NAMESPACE, value)
    }

    /// Stable 64-bit hash used to pick a bucket in the index. Kept separate
    /// from `Hash::hash` so the index isn't coupled to whatever `BuildHasher`
    /// callers configure for some other purpose.
    pub(crate) fn bucket_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ids_hash_equal() {
        let a = NodeId::numeric(0, 42);
        let b = NodeId::numeric(0, 42);
        assert_eq!(a, b);
        assert_eq!(a.bucket_hash(), b.bucket_hash());
    }

    #[test]
    fn namespace_distinguishes_otherwise_equal_payloads() {
        let a = NodeId::numeric(0, 42);
        let b = NodeId::numeric(1, 42);
        assert_ne!(a, b);
    }

    #[test]
    fn kind_distinguishes_otherwise_equal_payloads() {
        let a = NodeId::numeric(0, 7);
        let b = NodeId::string(0, "7");
        assert_ne!(a, b);
    }

    #[test]
    fn synthesized_uses_reserved_namespace() {
        let id = NodeId::synthesized(3);
        assert_eq!(id.namespace_index, SYNTHESIZED_NAMESPACE);
        assert_eq!(id.kind, NodeIdKind::Numeric(3));
    }
}
