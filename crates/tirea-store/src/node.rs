//! Persistent state tree and immutable snapshots.
//!
//! State is stored as a [`Node`] tree whose containers are persistent
//! collections from `im`. Cloning a tree is O(1); mutating a clone copies only
//! the nodes on the path to the change, so every committed [`Snapshot`] shares
//! all untouched subtrees with its predecessor.

use crate::{Path, Seg, StoreResult};
use im::{OrdMap, Vector};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::sync::Arc;

/// A value in the state tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Node {
    /// JSON `null`.
    #[default]
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(Number),
    /// JSON string.
    String(String),
    /// Persistent array.
    Array(Vector<Node>),
    /// Persistent object with keys in sorted order.
    Object(OrdMap<String, Node>),
}

impl Node {
    /// An empty object node.
    #[inline]
    pub fn object() -> Self {
        Node::Object(OrdMap::new())
    }

    /// An empty array node.
    #[inline]
    pub fn array() -> Self {
        Node::Array(Vector::new())
    }

    /// The JSON type name of this node, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "boolean",
            Node::Number(_) => "number",
            Node::String(_) => "string",
            Node::Array(_) => "array",
            Node::Object(_) => "object",
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// Returns true for arrays and objects.
    #[inline]
    pub fn is_container(&self) -> bool {
        matches!(self, Node::Array(_) | Node::Object(_))
    }

    /// Look up a direct child.
    ///
    /// Objects accept index segments as their decimal key; arrays accept
    /// key segments that parse as an index.
    pub fn child(&self, seg: &Seg) -> Option<&Node> {
        match self {
            Node::Object(map) => map.get(seg.to_key().as_str()),
            Node::Array(items) => seg.as_index().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Mutable counterpart of [`Node::child`]. Copies shared structure on write.
    pub fn child_mut(&mut self, seg: &Seg) -> Option<&mut Node> {
        match self {
            Node::Object(map) => map.get_mut(seg.to_key().as_str()),
            Node::Array(items) => seg.as_index().and_then(move |i| items.get_mut(i)),
            _ => None,
        }
    }

    /// Resolve a path relative to this node.
    pub fn get(&self, path: &Path) -> Option<&Node> {
        path.iter().try_fold(self, |node, seg| node.child(seg))
    }

    /// Resolve a path relative to this node for mutation.
    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Node> {
        let mut current = self;
        for seg in path {
            current = current.child_mut(seg)?;
        }
        Some(current)
    }

    /// Convert to a plain JSON value (deep copy).
    pub fn to_value(&self) -> Value {
        match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::String(s) => Value::String(s.clone()),
            Node::Array(items) => Value::Array(items.iter().map(Node::to_value).collect()),
            Node::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }

    /// Deserialize this node into a typed value.
    pub fn to_typed<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.to_value())?)
    }

    /// True when both nodes are containers backed by the same shared storage.
    ///
    /// Scalars never compare as shared.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Array(a), Node::Array(b)) => a.ptr_eq(b),
            (Node::Object(a), Node::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::String(s),
            Value::Array(items) => Node::Array(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => Node::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Node::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&Node> for Value {
    fn from(node: &Node) -> Self {
        node.to_value()
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Number(n) => n.serialize(serializer),
            Node::String(s) => serializer.serialize_str(s),
            Node::Array(items) => serializer.collect_seq(items.iter()),
            Node::Object(map) => serializer.collect_map(map.iter()),
        }
    }
}

/// An immutable, cheaply cloneable state snapshot.
///
/// Reading never opens a draft. Two snapshots are the same commit exactly
/// when [`Snapshot::ptr_eq`] holds.
#[derive(Clone, Debug)]
pub struct Snapshot(Arc<Node>);

impl Snapshot {
    /// Wrap a tree as a snapshot.
    pub fn new(root: Node) -> Self {
        Self(Arc::new(root))
    }

    /// Build a snapshot from a JSON value.
    pub fn from_value(value: Value) -> Self {
        Self::new(Node::from(value))
    }

    pub(crate) fn from_arc(root: Arc<Node>) -> Self {
        Self(root)
    }

    pub(crate) fn as_arc(&self) -> &Arc<Node> {
        &self.0
    }

    /// The root node.
    #[inline]
    pub fn root(&self) -> &Node {
        &self.0
    }

    /// Resolve a path inside the snapshot.
    pub fn get(&self, path: impl Into<Path>) -> Option<&Node> {
        self.0.get(&path.into())
    }

    /// Resolve a path and copy it out as JSON.
    pub fn value_at(&self, path: impl Into<Path>) -> Option<Value> {
        self.get(path).map(Node::to_value)
    }

    /// Resolve a path and deserialize it; `Ok(None)` when absent.
    pub fn get_as<T: DeserializeOwned>(&self, path: impl Into<Path>) -> StoreResult<Option<T>> {
        self.get(path).map(Node::to_typed).transpose()
    }

    /// The whole snapshot as JSON.
    pub fn to_value(&self) -> Value {
        self.0.to_value()
    }

    /// Referential identity: both handles point at the same committed tree.
    #[inline]
    pub fn ptr_eq(a: &Snapshot, b: &Snapshot) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}
