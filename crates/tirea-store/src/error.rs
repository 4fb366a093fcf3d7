//! Error types for store operations.

use crate::Path;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading, mutating, or dispatching actions.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path does not exist in the state tree.
    #[error("path not found: {path}")]
    PathNotFound {
        /// The path that was not found.
        path: Path,
    },

    /// Array index is out of bounds.
    #[error("index {index} out of bounds (len: {len}) at path {path}")]
    IndexOutOfBounds {
        /// The path to the array.
        path: Path,
        /// The index that was accessed.
        index: usize,
        /// The actual length of the array.
        len: usize,
    },

    /// Type mismatch when accessing a value.
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The path where the mismatch occurred.
        path: Path,
        /// The expected type.
        expected: &'static str,
        /// The actual type found.
        found: &'static str,
    },

    /// Numeric operation on a non-numeric value.
    #[error("numeric operation requires number at {path}")]
    NumericOperationOnNonNumber {
        /// The path where the non-numeric value was found.
        path: Path,
    },

    /// Merge operation requires an object value.
    #[error("merge requires object value at {path}")]
    MergeRequiresObject {
        /// The path where a non-object was found.
        path: Path,
    },

    /// Append operation requires an array value.
    #[error("append requires array value at {path}")]
    AppendRequiresArray {
        /// The path where a non-array was found.
        path: Path,
    },

    /// Invalid operation error.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of what went wrong.
        message: String,
    },

    /// A draft-bound state handle was used after its draft was committed.
    #[error(
        "stale draft access after commit in action `{action}`; re-acquire state before mutating during async continuation"
    )]
    StaleDraft {
        /// Name of the action whose handle went stale.
        action: String,
    },

    /// No action is declared under the given name.
    #[error("unknown action: {name}")]
    UnknownAction {
        /// The qualified name that failed to resolve.
        name: String,
    },

    /// An action body reported a failure.
    #[error("action failed: {message}")]
    Failed {
        /// Description supplied by the action.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Create a path not found error.
    #[inline]
    pub fn path_not_found(path: Path) -> Self {
        StoreError::PathNotFound { path }
    }

    /// Create an index out of bounds error.
    #[inline]
    pub fn index_out_of_bounds(path: Path, index: usize, len: usize) -> Self {
        StoreError::IndexOutOfBounds { path, index, len }
    }

    /// Create a type mismatch error.
    #[inline]
    pub fn type_mismatch(path: Path, expected: &'static str, found: &'static str) -> Self {
        StoreError::TypeMismatch {
            path,
            expected,
            found,
        }
    }

    /// Create a numeric operation on non-number error.
    #[inline]
    pub fn numeric_on_non_number(path: Path) -> Self {
        StoreError::NumericOperationOnNonNumber { path }
    }

    /// Create a merge requires object error.
    #[inline]
    pub fn merge_requires_object(path: Path) -> Self {
        StoreError::MergeRequiresObject { path }
    }

    /// Create an append requires array error.
    #[inline]
    pub fn append_requires_array(path: Path) -> Self {
        StoreError::AppendRequiresArray { path }
    }

    /// Create an invalid operation error.
    #[inline]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        StoreError::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create a stale draft error for the named action.
    #[inline]
    pub fn stale_draft(action: impl Into<String>) -> Self {
        StoreError::StaleDraft {
            action: action.into(),
        }
    }

    /// Create an unknown action error.
    #[inline]
    pub fn unknown_action(name: impl Into<String>) -> Self {
        StoreError::UnknownAction { name: name.into() }
    }

    /// Create an action failure, for use inside action bodies.
    #[inline]
    pub fn failed(message: impl Into<String>) -> Self {
        StoreError::Failed {
            message: message.into(),
        }
    }

    /// Returns true for the stale draft usage error.
    #[inline]
    pub fn is_stale_draft(&self) -> bool {
        matches!(self, StoreError::StaleDraft { .. })
    }
}
