//! Mutation operations applied to an open draft.
//!
//! Every write made through an action's state facade is expressed as one
//! `Op`. The draft applies it copy-on-write and records the structural
//! edits it caused.

use crate::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A numeric value that can be used in increment/decrement operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
}

impl Number {
    /// Convert to f64.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Number::Int(v)
    }
}

impl From<i32> for Number {
    fn from(v: i32) -> Self {
        Number::Int(v as i64)
    }
}

impl From<u32> for Number {
    fn from(v: u32) -> Self {
        Number::Int(v as i64)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Float(v)
    }
}

/// A single state mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Set a value at the path.
    ///
    /// Creates intermediate objects if they don't exist. An array index
    /// equal to the array length appends.
    Set {
        /// Target path.
        path: Path,
        /// Value to set.
        value: Value,
    },

    /// Delete the value at the path.
    ///
    /// No-op if the path doesn't exist.
    Delete {
        /// Target path.
        path: Path,
    },

    /// Append a value to an array at the path.
    ///
    /// Creates the array if it doesn't exist.
    Append {
        /// Target path (must be an array or non-existent).
        path: Path,
        /// Value to append.
        value: Value,
    },

    /// Shallow-merge an object into the object at the path.
    ///
    /// Creates the object if it doesn't exist.
    MergeObject {
        /// Target path (must be an object or non-existent).
        path: Path,
        /// Object to merge.
        value: Value,
    },

    /// Increment a numeric value at the path.
    Increment {
        /// Target path (must be a number).
        path: Path,
        /// Amount to increment by.
        amount: Number,
    },

    /// Decrement a numeric value at the path.
    Decrement {
        /// Target path (must be a number).
        path: Path,
        /// Amount to decrement by.
        amount: Number,
    },

    /// Insert a value at a specific index in an array, shifting later
    /// elements to the right.
    Insert {
        /// Target path (must be an array).
        path: Path,
        /// Index to insert at.
        index: usize,
        /// Value to insert.
        value: Value,
    },

    /// Remove the first occurrence of a value from an array.
    ///
    /// No-op if the value is not found.
    Remove {
        /// Target path (must be an array).
        path: Path,
        /// Value to remove.
        value: Value,
    },
}

impl Op {
    /// Create a Set operation.
    #[inline]
    pub fn set(path: Path, value: impl Into<Value>) -> Self {
        Op::Set {
            path,
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    #[inline]
    pub fn delete(path: Path) -> Self {
        Op::Delete { path }
    }

    /// Create an Append operation.
    #[inline]
    pub fn append(path: Path, value: impl Into<Value>) -> Self {
        Op::Append {
            path,
            value: value.into(),
        }
    }

    /// Create a MergeObject operation.
    #[inline]
    pub fn merge_object(path: Path, value: impl Into<Value>) -> Self {
        Op::MergeObject {
            path,
            value: value.into(),
        }
    }

    /// Create an Increment operation.
    #[inline]
    pub fn increment(path: Path, amount: impl Into<Number>) -> Self {
        Op::Increment {
            path,
            amount: amount.into(),
        }
    }

    /// Create a Decrement operation.
    #[inline]
    pub fn decrement(path: Path, amount: impl Into<Number>) -> Self {
        Op::Decrement {
            path,
            amount: amount.into(),
        }
    }

    /// Create an Insert operation.
    #[inline]
    pub fn insert(path: Path, index: usize, value: impl Into<Value>) -> Self {
        Op::Insert {
            path,
            index,
            value: value.into(),
        }
    }

    /// Create a Remove operation.
    #[inline]
    pub fn remove(path: Path, value: impl Into<Value>) -> Self {
        Op::Remove {
            path,
            value: value.into(),
        }
    }

    /// Get the path this operation targets.
    #[inline]
    pub fn path(&self) -> &Path {
        match self {
            Op::Set { path, .. }
            | Op::Delete { path }
            | Op::Append { path, .. }
            | Op::MergeObject { path, .. }
            | Op::Increment { path, .. }
            | Op::Decrement { path, .. }
            | Op::Insert { path, .. }
            | Op::Remove { path, .. } => path,
        }
    }

    /// Re-root the operation under `base`.
    pub(crate) fn rebased(mut self, base: &Path) -> Self {
        if base.is_empty() {
            return self;
        }
        let joined = base.join(self.path());
        match &mut self {
            Op::Set { path, .. }
            | Op::Delete { path }
            | Op::Append { path, .. }
            | Op::MergeObject { path, .. }
            | Op::Increment { path, .. }
            | Op::Decrement { path, .. }
            | Op::Insert { path, .. }
            | Op::Remove { path, .. } => *path = joined,
        }
        self
    }

    /// Get the operation name.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Op::Set { .. } => "set",
            Op::Delete { .. } => "delete",
            Op::Append { .. } => "append",
            Op::MergeObject { .. } => "merge_object",
            Op::Increment { .. } => "increment",
            Op::Decrement { .. } => "decrement",
            Op::Insert { .. } => "insert",
            Op::Remove { .. } => "remove",
        }
    }
}
