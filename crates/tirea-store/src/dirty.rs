//! Dirty path accumulation.
//!
//! Turns one commit's edit list into the set of dot-joined paths whose
//! subscribers must hear about it. Membership changes (`add`/`remove`) also
//! dirty the parent container; replacements only dirty themselves.

use crate::draft::Edit;
use serde::Serialize;
use std::collections::BTreeSet;

/// The set of paths changed by a single commit.
///
/// Only membership is meaningful; iteration order is sorted for stable logs.
/// The root path is the empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirtyPaths(BTreeSet<String>);

impl DirtyPaths {
    /// Accumulate the dirty set for an ordered edit list.
    pub fn from_edits(edits: &[Edit]) -> Self {
        let mut paths = BTreeSet::new();
        for edit in edits {
            paths.insert(edit.path.dotted());
            if edit.changes_membership() {
                if let Some(parent) = edit.path.parent() {
                    paths.insert(parent.dotted());
                }
            }
        }
        Self(paths)
    }

    #[inline]
    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the dirty paths.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<'a> IntoIterator for &'a DirtyPaths {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for DirtyPaths {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
