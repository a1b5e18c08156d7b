//! The OPC UA node model: the eight node classes and the value payloads they
//! carry.
//!
//! The store treats everything below the common header as opaque — it never
//! inspects a [`Variant`] or a [`Reference`], it only moves, borrows, and
//! eventually drops them. Closing `Node` as an `enum` (rather than the
//! source's variably-sized envelope keyed by a runtime class tag) means the
//! "unknown nodeClass" failure case named in the distilled spec has no
//! runtime representation: the compiler enforces that every arm matching on
//! `NodeClass`/`Node` is exhaustive.

use crate::nodeid::NodeId;

/// One of the eight closed OPC UA node classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    ReferenceType,
    DataType,
    View,
}

/// Fields common to every node class.
#[derive(Debug, Clone)]
pub struct NodeHeader {
    pub node_id: Option<NodeId>,
    pub browse_name: String,
    pub display_name: String,
    pub description: String,
    pub write_mask: u32,
    pub user_write_mask: u32,
    pub references: Vec<Reference>,
}

impl NodeHeader {
    pub fn new(browse_name: impl Into<String>) -> Self {
        Self {
            node_id: None,
            browse_name: browse_name.into(),
            display_name: String::new(),
            description: String::new(),
            write_mask: 0,
            user_write_mask: 0,
            references: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.node_id = Some(id);
        self
    }
}

/// A reference from one node to another.
#[derive(Debug, Clone)]
pub struct Reference {
    pub reference_type: NodeId,
    pub target: NodeId,
    pub is_forward: bool,
}

/// A scalar or array value carried by a `Variable`/`VariableType` node.
///
/// Only the handful of built-in types the store's own tests exercise are
/// modeled; a full OPC UA type system is out of scope (see non-goals: no
/// encoding, no query/indexing).
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    ByteString(Vec<u8>),
    Array(Vec<Variant>),
}

/// Status/quality for a `DataValue`, loosely modeled on the OPC UA
/// `StatusCode` bit layout (severity in the high two bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0);

    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }
}

/// A `Variant` plus the status/timestamp metadata OPC UA attaches to reads.
#[derive(Debug, Clone)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    pub source_timestamp: Option<u64>,
    pub server_timestamp: Option<u64>,
}

impl DataValue {
    pub fn good(value: Variant) -> Self {
        Self {
            value,
            status: StatusCode::GOOD,
            source_timestamp: None,
            server_timestamp: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectAttributes {
    pub event_notifier: u8,
}

#[derive(Debug, Clone)]
pub struct VariableAttributes {
    pub value: DataValue,
    pub data_type: NodeId,
    pub value_rank: i32,
    pub array_dimensions: Vec<u32>,
    pub access_level: u8,
    pub user_access_level: u8,
}

#[derive(Debug, Clone)]
pub struct MethodAttributes {
    pub executable: bool,
    pub user_executable: bool,
}

#[derive(Debug, Clone)]
pub struct ObjectTypeAttributes {
    pub is_abstract: bool,
}

#[derive(Debug, Clone)]
pub struct VariableTypeAttributes {
    pub value: Option<DataValue>,
    pub data_type: NodeId,
    pub is_abstract: bool,
}

#[derive(Debug, Clone)]
pub struct ReferenceTypeAttributes {
    pub is_abstract: bool,
    pub symmetric: bool,
    pub inverse_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DataTypeAttributes {
    pub is_abstract: bool,
    pub data_type_definition: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ViewAttributes {
    pub contains_no_loops: bool,
    pub event_notifier: u8,
}

/// A complete information-model node: the common header plus the
/// variant-specific attribute record for its node class.
///
/// `Node`'s `Drop` glue, generated by the compiler from the owned
/// `String`/`Vec`/`Variant` fields reachable from whichever variant is
/// present, *is* the source's variant-dispatched deleter (see
/// `crate::entry`): there is no separate "unknown class" arm to get wrong.
#[derive(Debug, Clone)]
pub enum Node {
    Object(NodeHeader, ObjectAttributes),
    Variable(NodeHeader, VariableAttributes),
    Method(NodeHeader, MethodAttributes),
    ObjectType(NodeHeader, ObjectTypeAttributes),
    VariableType(NodeHeader, VariableTypeAttributes),
    ReferenceType(NodeHeader, ReferenceTypeAttributes),
    DataType(NodeHeader, DataTypeAttributes),
    View(NodeHeader, ViewAttributes),
}

impl Node {
    pub fn node_class(&self) -> NodeClass {
        match self {
            Node::Object(..) => NodeClass::Object,
            Node::Variable(..) => NodeClass::Variable,
            Node::Method(..) => NodeClass::Method,
            Node::ObjectType(..) => NodeClass::ObjectType,
            Node::VariableType(..) => NodeClass::VariableType,
            Node::ReferenceType(..) => NodeClass::ReferenceType,
            Node::DataType(..) => NodeClass::DataType,
            Node::View(..) => NodeClass::View,
        }
    }

    pub fn header(&self) -> &NodeHeader {
        match self {
            Node::Object(h, _)
            | Node::Variable(h, _)
            | Node::Method(h, _)
            | Node::ObjectType(h, _)
            | Node::VariableType(h, _)
            | Node::ReferenceType(h, _)
            | Node::DataType(h, _)
            | Node::View(h, _) => h,
        }
    }

    pub fn header_mut(&mut self) -> &mut NodeHeader {
        match self {
            Node::Object(h, _)
            | Node::Variable(h, _)
            | Node::Method(h, _)
            | Node::ObjectType(h, _)
            | Node::VariableType(h, _)
            | Node::ReferenceType(h, _)
            | Node::DataType(h, _)
            | Node::View(h, _) => h,
        }
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        self.header().node_id.as_ref()
    }

    pub(crate) fn set_node_id(&mut self, id: NodeId) {
        self.header_mut().node_id = Some(id);
    }
}
