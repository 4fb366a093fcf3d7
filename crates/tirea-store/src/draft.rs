//! Copy-on-write drafts over a snapshot.
//!
//! A [`Draft`] is the only mutable view of state. It starts as an O(1) clone
//! of its base snapshot's tree, applies [`Op`]s in place (persistent
//! containers copy only the touched spine), and records one [`Edit`] per
//! changed position. Inserting into or removing from the middle of an array
//! also records every element position that shifted. [`Draft::commit`]
//! reconciles the edits against the base, hands the net list to a listener
//! and produces the next snapshot.

use crate::{Node, Number, Op, Path, Seg, Snapshot, StoreError, StoreResult};
use im::{OrdMap, Vector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// What kind of structural change an edit records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    /// A key or element was added to its container.
    Add,
    /// A key or element was removed from its container.
    Remove,
    /// An existing value was replaced.
    Replace,
}

/// One direct structural change made by a draft.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    /// Kind of change.
    pub kind: EditKind,
    /// Location of the changed value.
    pub path: Path,
}

impl Edit {
    #[inline]
    pub fn add(path: Path) -> Self {
        Self {
            kind: EditKind::Add,
            path,
        }
    }

    #[inline]
    pub fn remove(path: Path) -> Self {
        Self {
            kind: EditKind::Remove,
            path,
        }
    }

    #[inline]
    pub fn replace(path: Path) -> Self {
        Self {
            kind: EditKind::Replace,
            path,
        }
    }

    /// Whether the edit changed the membership of its parent container.
    #[inline]
    pub fn changes_membership(&self) -> bool {
        matches!(self.kind, EditKind::Add | EditKind::Remove)
    }
}

/// A mutable, copy-on-write working view over one snapshot.
#[derive(Debug)]
pub struct Draft {
    base: Snapshot,
    root: Node,
    edits: Vec<Edit>,
}

enum Target {
    Missing,
    Array,
    Object,
    Scalar,
}

impl Draft {
    /// Open a draft over `base`.
    pub fn new(base: &Snapshot) -> Self {
        Self {
            base: base.clone(),
            root: base.root().clone(),
            edits: Vec::new(),
        }
    }

    /// The snapshot this draft was opened against.
    #[inline]
    pub fn base(&self) -> &Snapshot {
        &self.base
    }

    /// Current (uncommitted) value at `path`.
    #[inline]
    pub fn get(&self, path: &Path) -> Option<&Node> {
        self.root.get(path)
    }

    /// Edits recorded so far, in application order and not yet reconciled
    /// against the base snapshot.
    #[inline]
    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    /// Whether any edit has been recorded.
    #[inline]
    pub fn is_modified(&self) -> bool {
        !self.edits.is_empty()
    }

    /// Finalize the draft.
    ///
    /// `listener` receives the net edit list before this returns: one edit
    /// per path whose final value differs from the base, with its kind
    /// recomputed from the two values. Edits that cancel out are dropped. A
    /// draft whose net edit list is empty yields its base snapshot unchanged.
    pub fn commit<F>(self, listener: F) -> Snapshot
    where
        F: FnOnce(&[Edit]),
    {
        let edits = self.net_edits();
        listener(&edits);
        if edits.is_empty() {
            self.base
        } else {
            Snapshot::new(self.root)
        }
    }

    fn net_edits(&self) -> Vec<Edit> {
        let base = self.base.root();
        let mut seen = HashSet::new();
        self.edits
            .iter()
            .filter(|edit| seen.insert(edit.path.clone()))
            .filter_map(|edit| {
                let kind = match (base.get(&edit.path), self.root.get(&edit.path)) {
                    (None, None) => return None,
                    (Some(old), Some(new)) if old.ptr_eq(new) || old == new => return None,
                    (None, Some(_)) => EditKind::Add,
                    (Some(_), None) => EditKind::Remove,
                    (Some(_), Some(_)) => EditKind::Replace,
                };
                Some(Edit {
                    kind,
                    path: edit.path.clone(),
                })
            })
            .collect()
    }

    /// Apply a single operation.
    ///
    /// A failing operation leaves the draft exactly as it was.
    pub fn apply(&mut self, op: &Op) -> StoreResult<()> {
        match op {
            Op::Set { path, value } => self.set(path, Node::from(value.clone())),
            Op::Delete { path } => {
                self.delete(path);
                Ok(())
            }
            Op::Append { path, value } => self.append(path, Node::from(value.clone())),
            Op::MergeObject { path, value } => self.merge_object(path, value),
            Op::Increment { path, amount } => self.adjust(path, amount, false),
            Op::Decrement { path, amount } => self.adjust(path, amount, true),
            Op::Insert { path, index, value } => {
                self.insert(path, *index, Node::from(value.clone()))
            }
            Op::Remove { path, value } => self.remove(path, &Node::from(value.clone())),
        }
    }

    fn classify(&self, path: &Path) -> Target {
        match self.root.get(path) {
            None | Some(Node::Null) => Target::Missing,
            Some(Node::Array(_)) => Target::Array,
            Some(Node::Object(_)) => Target::Object,
            Some(_) => Target::Scalar,
        }
    }

    fn set(&mut self, path: &Path, value: Node) -> StoreResult<()> {
        let depth = existing_depth(&self.root, path);

        if depth == path.len() {
            let target = self
                .root
                .get_mut(path)
                .ok_or_else(|| StoreError::path_not_found(path.clone()))?;
            if *target != value {
                *target = value;
                self.edits.push(Edit::replace(path.clone()));
            }
            return Ok(());
        }

        let missing = &path.segments()[depth];
        let subtree = nest(&path.segments()[depth + 1..], value, path)?;
        let container_path = path.prefix(depth);
        let container = self
            .root
            .get_mut(&container_path)
            .ok_or_else(|| StoreError::path_not_found(container_path.clone()))?;

        match container {
            Node::Object(map) => {
                map.insert(missing.to_key(), subtree);
                self.edits.push(Edit::add(path.prefix(depth + 1)));
            }
            Node::Array(items) => {
                let index = missing.as_index().ok_or_else(|| {
                    StoreError::type_mismatch(path.prefix(depth + 1), "index", "key")
                })?;
                if index != items.len() {
                    return Err(StoreError::index_out_of_bounds(
                        path.prefix(depth + 1),
                        index,
                        items.len(),
                    ));
                }
                items.push_back(subtree);
                self.edits.push(Edit::add(path.prefix(depth + 1)));
            }
            Node::Null => {
                let mut map = OrdMap::new();
                map.insert(missing.to_key(), subtree);
                *container = Node::Object(map);
                self.edits.push(Edit::replace(container_path));
            }
            other => {
                return Err(StoreError::type_mismatch(
                    container_path,
                    "object",
                    other.type_name(),
                ));
            }
        }
        Ok(())
    }

    fn delete(&mut self, path: &Path) {
        let Some(last) = path.last() else {
            if !self.root.is_null() {
                self.root = Node::Null;
                self.edits.push(Edit::replace(Path::root()));
            }
            return;
        };

        let parent = path.prefix(path.len() - 1);
        // Some(Some((index, len))) for an array element, Some(None) for a key.
        let removed = match self.root.get_mut(&parent) {
            Some(Node::Object(map)) => map.remove(last.to_key().as_str()).map(|_| None),
            Some(Node::Array(items)) => match last.as_index() {
                Some(index) if index < items.len() => {
                    items.remove(index);
                    Some(Some((index, items.len())))
                }
                _ => None,
            },
            _ => None,
        };

        match removed {
            Some(Some((index, len))) => self.record_removal(&parent, index, len),
            Some(None) => self.edits.push(Edit::remove(path.clone())),
            None => {}
        }
    }

    /// Record an element inserted at `index` into an array that held `len`
    /// elements: every shifted position is replaced and the new tail is added.
    fn record_insertion(&mut self, array: &Path, index: usize, len: usize) {
        for shifted in index..len {
            self.edits.push(Edit::replace(array.clone().index(shifted)));
        }
        self.edits.push(Edit::add(array.clone().index(len)));
    }

    /// Record an element removed at `index` from an array now holding `len`
    /// elements: every shifted position is replaced and the old tail removed.
    fn record_removal(&mut self, array: &Path, index: usize, len: usize) {
        for shifted in index..len {
            self.edits.push(Edit::replace(array.clone().index(shifted)));
        }
        self.edits.push(Edit::remove(array.clone().index(len)));
    }

    fn append(&mut self, path: &Path, value: Node) -> StoreResult<()> {
        match self.classify(path) {
            Target::Missing => self.set(path, Node::Array(Vector::unit(value))),
            Target::Array => {
                if let Some(Node::Array(items)) = self.root.get_mut(path) {
                    let len = items.len();
                    items.push_back(value);
                    self.record_insertion(path, len, len);
                }
                Ok(())
            }
            Target::Object | Target::Scalar => Err(StoreError::append_requires_array(path.clone())),
        }
    }

    fn insert(&mut self, path: &Path, index: usize, value: Node) -> StoreResult<()> {
        let target = self
            .root
            .get_mut(path)
            .ok_or_else(|| StoreError::path_not_found(path.clone()))?;

        match target {
            Node::Array(items) => {
                if index > items.len() {
                    return Err(StoreError::index_out_of_bounds(
                        path.clone(),
                        index,
                        items.len(),
                    ));
                }
                let len = items.len();
                items.insert(index, value);
                self.record_insertion(path, index, len);
                Ok(())
            }
            other => Err(StoreError::type_mismatch(
                path.clone(),
                "array",
                other.type_name(),
            )),
        }
    }

    fn remove(&mut self, path: &Path, value: &Node) -> StoreResult<()> {
        let target = self
            .root
            .get_mut(path)
            .ok_or_else(|| StoreError::path_not_found(path.clone()))?;

        match target {
            Node::Array(items) => {
                if let Some(pos) = items.iter().position(|v| v == value) {
                    items.remove(pos);
                    let len = items.len();
                    self.record_removal(path, pos, len);
                }
                Ok(())
            }
            other => Err(StoreError::type_mismatch(
                path.clone(),
                "array",
                other.type_name(),
            )),
        }
    }

    fn merge_object(&mut self, path: &Path, value: &Value) -> StoreResult<()> {
        let incoming = value
            .as_object()
            .ok_or_else(|| StoreError::merge_requires_object(path.clone()))?;

        match self.classify(path) {
            Target::Missing => self.set(path, Node::from(value.clone())),
            Target::Object => {
                if let Some(Node::Object(map)) = self.root.get_mut(path) {
                    for (key, v) in incoming {
                        let node = Node::from(v.clone());
                        let edit = match map.get(key.as_str()) {
                            Some(old) if *old == node => continue,
                            Some(_) => Edit::replace(path.clone().key(key.clone())),
                            None => Edit::add(path.clone().key(key.clone())),
                        };
                        map.insert(key.clone(), node);
                        self.edits.push(edit);
                    }
                }
                Ok(())
            }
            Target::Array | Target::Scalar => Err(StoreError::merge_requires_object(path.clone())),
        }
    }

    fn adjust(&mut self, path: &Path, amount: &Number, negate: bool) -> StoreResult<()> {
        let name = if negate { "decrement" } else { "increment" };
        let target = self
            .root
            .get_mut(path)
            .ok_or_else(|| StoreError::path_not_found(path.clone()))?;
        let Node::Number(current) = target else {
            return Err(StoreError::numeric_on_non_number(path.clone()));
        };

        let next = if let Some(i) = current.as_i64() {
            match amount {
                Number::Int(a) => {
                    let value = if negate { i.checked_sub(*a) } else { i.checked_add(*a) };
                    let value = value.ok_or_else(|| {
                        StoreError::invalid_operation(format!("{name} overflow at {path}"))
                    })?;
                    serde_json::Number::from(value)
                }
                Number::Float(a) => {
                    let value = if negate { i as f64 - a } else { i as f64 + a };
                    finite_number(path, value, name)?
                }
            }
        } else if let Some(f) = current.as_f64() {
            let value = if negate {
                f - amount.as_f64()
            } else {
                f + amount.as_f64()
            };
            finite_number(path, value, name)?
        } else {
            return Err(StoreError::numeric_on_non_number(path.clone()));
        };

        if *current != next {
            *current = next;
            self.edits.push(Edit::replace(path.clone()));
        }
        Ok(())
    }
}

/// Number of leading segments of `path` that resolve in `root`.
fn existing_depth(root: &Node, path: &Path) -> usize {
    let mut current = root;
    let mut depth = 0;
    for seg in path {
        match current.child(seg) {
            Some(next) => {
                current = next;
                depth += 1;
            }
            None => break,
        }
    }
    depth
}

/// Wrap `value` in intermediate objects for the remaining key segments.
fn nest(rest: &[Seg], value: Node, full_path: &Path) -> StoreResult<Node> {
    rest.iter().rev().try_fold(value, |inner, seg| match seg {
        Seg::Key(key) => Ok(Node::Object(OrdMap::unit(key.clone(), inner))),
        Seg::Index(_) => Err(StoreError::type_mismatch(full_path.clone(), "array", "null")),
    })
}

fn finite_number(path: &Path, value: f64, op: &str) -> StoreResult<serde_json::Number> {
    if !value.is_finite() {
        return Err(StoreError::invalid_operation(format!(
            "{op} produced non-finite value at {path}"
        )));
    }
    serde_json::Number::from_f64(value).ok_or_else(|| {
        StoreError::invalid_operation(format!("{op} produced non-representable value at {path}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use serde_json::json;

    fn draft_of(value: Value) -> Draft {
        Draft::new(&Snapshot::from_value(value))
    }

    fn kinds(draft: &Draft) -> Vec<(EditKind, String)> {
        draft
            .edits()
            .iter()
            .map(|e| (e.kind, e.path.dotted()))
            .collect()
    }

    #[test]
    fn test_set_existing_records_replace() {
        let mut d = draft_of(json!({"a": {"b": 0}}));
        d.apply(&Op::set(path!("a", "b"), json!(1))).unwrap();
        assert_eq!(kinds(&d), vec![(EditKind::Replace, "a.b".into())]);
    }

    #[test]
    fn test_set_equal_value_records_nothing() {
        let mut d = draft_of(json!({"a": 1}));
        d.apply(&Op::set(path!("a"), json!(1))).unwrap();
        assert!(!d.is_modified());
    }

    #[test]
    fn test_set_new_key_records_add_at_first_missing_segment() {
        let mut d = draft_of(json!({"obj": {}}));
        d.apply(&Op::set(path!("obj", "x", "y"), json!(true))).unwrap();
        assert_eq!(kinds(&d), vec![(EditKind::Add, "obj.x".into())]);
        assert_eq!(
            d.get(&path!("obj", "x", "y")).map(Node::to_value),
            Some(json!(true))
        );
    }

    #[test]
    fn test_set_array_len_appends_and_oob_fails() {
        let mut d = draft_of(json!({"arr": [1]}));
        d.apply(&Op::set(path!("arr", 1), json!(2))).unwrap();
        assert_eq!(kinds(&d), vec![(EditKind::Add, "arr.1".into())]);

        let err = d.apply(&Op::set(path!("arr", 5), json!(3))).unwrap_err();
        assert!(matches!(err, StoreError::IndexOutOfBounds { index: 5, len: 2, .. }));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut d = draft_of(json!({"n": 1}));
        let err = d.apply(&Op::set(path!("n", "x"), json!(1))).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        assert!(!d.is_modified());
    }

    #[test]
    fn test_root_replace_uses_empty_path() {
        let mut d = draft_of(json!({"a": 1}));
        d.apply(&Op::set(Path::root(), json!({"b": 2}))).unwrap();
        assert_eq!(kinds(&d), vec![(EditKind::Replace, String::new())]);
    }

    #[test]
    fn test_delete_records_remove_and_missing_is_noop() {
        let mut d = draft_of(json!({"obj": {"k": 1}, "arr": [1, 2, 3]}));
        d.apply(&Op::delete(path!("obj", "k"))).unwrap();
        d.apply(&Op::delete(path!("arr", 0))).unwrap();
        d.apply(&Op::delete(path!("nope"))).unwrap();
        assert_eq!(
            kinds(&d),
            vec![
                (EditKind::Remove, "obj.k".into()),
                (EditKind::Replace, "arr.0".into()),
                (EditKind::Replace, "arr.1".into()),
                (EditKind::Remove, "arr.2".into()),
            ]
        );
        assert_eq!(d.get(&path!("arr")).map(Node::to_value), Some(json!([2, 3])));
    }

    #[test]
    fn test_append_insert_remove() {
        let mut d = draft_of(json!({"foo": ["foo", "bar"]}));
        d.apply(&Op::append(path!("foo"), json!("baz"))).unwrap();
        d.apply(&Op::insert(path!("foo"), 0, json!("first"))).unwrap();
        d.apply(&Op::remove(path!("foo"), json!("bar"))).unwrap();
        assert_eq!(
            kinds(&d),
            vec![
                // append
                (EditKind::Add, "foo.2".into()),
                // insert at 0 shifts every element
                (EditKind::Replace, "foo.0".into()),
                (EditKind::Replace, "foo.1".into()),
                (EditKind::Replace, "foo.2".into()),
                (EditKind::Add, "foo.3".into()),
                // remove "bar" from ["first", "foo", "bar", "baz"]
                (EditKind::Replace, "foo.2".into()),
                (EditKind::Remove, "foo.3".into()),
            ]
        );
        assert_eq!(
            d.get(&path!("foo")).map(Node::to_value),
            Some(json!(["first", "foo", "baz"]))
        );
    }

    #[test]
    fn test_append_creates_array_and_rejects_scalars() {
        let mut d = draft_of(json!({"n": 1}));
        d.apply(&Op::append(path!("items"), json!(1))).unwrap();
        assert_eq!(kinds(&d), vec![(EditKind::Add, "items".into())]);
        assert!(matches!(
            d.apply(&Op::append(path!("n"), json!(1))),
            Err(StoreError::AppendRequiresArray { .. })
        ));
    }

    #[test]
    fn test_merge_object_reports_per_key() {
        let mut d = draft_of(json!({"user": {"name": "Alice", "age": 30}}));
        d.apply(&Op::merge_object(
            path!("user"),
            json!({"name": "Alice", "age": 31, "email": "a@example.com"}),
        ))
        .unwrap();
        assert_eq!(
            kinds(&d),
            vec![
                (EditKind::Replace, "user.age".into()),
                (EditKind::Add, "user.email".into())
            ]
        );
    }

    #[test]
    fn test_increment_and_decrement() {
        let mut d = draft_of(json!({"count": 5, "ratio": 0.5, "label": "x"}));
        d.apply(&Op::increment(path!("count"), 3i64)).unwrap();
        d.apply(&Op::decrement(path!("ratio"), 0.25)).unwrap();
        assert_eq!(d.get(&path!("count")).map(Node::to_value), Some(json!(8)));
        assert_eq!(d.get(&path!("ratio")).map(Node::to_value), Some(json!(0.25)));
        assert!(matches!(
            d.apply(&Op::increment(path!("label"), 1i64)),
            Err(StoreError::NumericOperationOnNonNumber { .. })
        ));
        assert!(matches!(
            d.apply(&Op::increment(path!("count"), f64::NAN)),
            Err(StoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            d.apply(&Op::increment(path!("count"), i64::MAX)),
            Err(StoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_commit_without_edits_returns_base() {
        let base = Snapshot::from_value(json!({"a": 1}));
        let d = Draft::new(&base);
        let mut seen = None;
        let next = d.commit(|edits| seen = Some(edits.len()));
        assert_eq!(seen, Some(0));
        assert!(Snapshot::ptr_eq(&base, &next));
    }

    #[test]
    fn test_delete_last_element_records_no_shift() {
        let mut d = draft_of(json!({"arr": [1, 2, 3]}));
        d.apply(&Op::delete(path!("arr", 2))).unwrap();
        assert_eq!(kinds(&d), vec![(EditKind::Remove, "arr.2".into())]);
    }

    #[test]
    fn test_commit_reports_net_edits() {
        let base = Snapshot::from_value(json!({"a": 1, "list": ["x", "y"], "keep": 0}));
        let mut d = Draft::new(&base);
        d.apply(&Op::set(path!("a"), json!(2))).unwrap();
        d.apply(&Op::set(path!("a"), json!(1))).unwrap();
        d.apply(&Op::set(path!("tmp"), json!(true))).unwrap();
        d.apply(&Op::delete(path!("tmp"))).unwrap();
        d.apply(&Op::insert(path!("list"), 0, json!("w"))).unwrap();
        d.apply(&Op::set(path!("keep"), json!(5))).unwrap();

        let mut net = Vec::new();
        d.commit(|edits| {
            net = edits
                .iter()
                .map(|e| (e.kind, e.path.dotted()))
                .collect::<Vec<_>>();
        });
        assert_eq!(
            net,
            vec![
                (EditKind::Replace, "list.0".into()),
                (EditKind::Replace, "list.1".into()),
                (EditKind::Add, "list.2".into()),
                (EditKind::Replace, "keep".into()),
            ]
        );
    }

    #[test]
    fn test_commit_of_reverted_draft_returns_base() {
        let base = Snapshot::from_value(json!({"a": 1, "list": ["x"]}));
        let mut d = Draft::new(&base);
        d.apply(&Op::set(path!("a"), json!(2))).unwrap();
        d.apply(&Op::set(path!("a"), json!(1))).unwrap();
        d.apply(&Op::append(path!("list"), json!("y"))).unwrap();
        d.apply(&Op::delete(path!("list", 1))).unwrap();
        assert!(d.is_modified());

        let mut seen = None;
        let next = d.commit(|edits| seen = Some(edits.len()));
        assert_eq!(seen, Some(0));
        assert!(Snapshot::ptr_eq(&base, &next));
    }

    #[test]
    fn test_commit_shares_untouched_subtrees() {
        let base = Snapshot::from_value(json!({"a": {"x": 1}, "b": {"y": 2}}));
        let mut d = Draft::new(&base);
        d.apply(&Op::set(path!("a", "x"), json!(10))).unwrap();
        let next = d.commit(|_| {});

        assert!(!Snapshot::ptr_eq(&base, &next));
        assert_eq!(base.value_at("a.x"), Some(json!(1)));
        assert_eq!(next.value_at("a.x"), Some(json!(10)));
        let (old_b, new_b) = (base.get("b").unwrap(), next.get("b").unwrap());
        assert!(old_b.ptr_eq(new_b));
    }
}
