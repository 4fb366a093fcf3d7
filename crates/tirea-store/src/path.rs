//! Path representation for navigating the state tree.
//!
//! Paths are sequences of segments that describe a location in the state.
//! Each segment is either a key (for objects) or an index (for arrays).
//!
//! Subscriptions and dirty sets address state with dot-joined strings
//! (`"todos.2.title"`); [`Path::dotted`] and [`parse_path`] convert between
//! the two forms.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used when a path is rendered as a subscription key.
pub const PATH_SEPARATOR: char = '.';

/// A single segment in a state path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seg {
    /// Object key access: `{"key": value}`
    Key(String),
    /// Array index access: `[index]`
    Index(usize),
}

impl Seg {
    /// Create a key segment.
    #[inline]
    pub fn key(k: impl Into<String>) -> Self {
        Seg::Key(k.into())
    }

    /// Create an index segment.
    #[inline]
    pub fn index(i: usize) -> Self {
        Seg::Index(i)
    }

    /// Get the key if this is a key segment.
    #[inline]
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Seg::Key(k) => Some(k),
            Seg::Index(_) => None,
        }
    }

    /// Interpret the segment as an array index.
    ///
    /// Key segments made only of ASCII digits count as indices, so a
    /// dotted path like `"items.0"` works for arrays.
    #[inline]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Seg::Key(k) => k.parse().ok(),
            Seg::Index(i) => Some(*i),
        }
    }

    /// Interpret the segment as an object key.
    pub fn to_key(&self) -> String {
        match self {
            Seg::Key(k) => k.clone(),
            Seg::Index(i) => i.to_string(),
        }
    }
}

impl fmt::Display for Seg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seg::Key(k) => write!(f, ".{}", k),
            Seg::Index(i) => write!(f, "[{}]", i),
        }
    }
}

impl From<String> for Seg {
    fn from(s: String) -> Self {
        Seg::Key(s)
    }
}

impl From<&str> for Seg {
    fn from(s: &str) -> Self {
        Seg::Key(s.to_owned())
    }
}

impl From<usize> for Seg {
    fn from(i: usize) -> Self {
        Seg::Index(i)
    }
}

/// A complete path into the state tree.
///
/// # Examples
///
/// ```
/// use tirea_store::Path;
///
/// let path = Path::root().key("users").index(0).key("name");
/// assert_eq!(path.len(), 3);
/// assert_eq!(path.dotted(), "users.0.name");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Path(Vec<Seg>);

impl Path {
    /// Create an empty path (root).
    #[inline]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Create a path from a vector of segments.
    #[inline]
    pub fn from_segments(segments: Vec<Seg>) -> Self {
        Self(segments)
    }

    /// Append a key segment and return self (builder pattern).
    #[inline]
    pub fn key(mut self, k: impl Into<String>) -> Self {
        self.0.push(Seg::Key(k.into()));
        self
    }

    /// Append an index segment and return self (builder pattern).
    #[inline]
    pub fn index(mut self, i: usize) -> Self {
        self.0.push(Seg::Index(i));
        self
    }

    /// Push a segment onto the path (mutating).
    #[inline]
    pub fn push(&mut self, seg: Seg) {
        self.0.push(seg);
    }

    /// Pop the last segment from the path.
    #[inline]
    pub fn pop(&mut self) -> Option<Seg> {
        self.0.pop()
    }

    /// Get the segments of this path.
    #[inline]
    pub fn segments(&self) -> &[Seg] {
        &self.0
    }

    /// Check if this path is empty (root).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the number of segments in this path.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Get the last segment.
    #[inline]
    pub fn last(&self) -> Option<&Seg> {
        self.0.last()
    }

    /// Join this path with another path.
    #[inline]
    pub fn join(&self, other: &Path) -> Path {
        let mut result = self.clone();
        result.0.extend(other.0.iter().cloned());
        result
    }

    /// The first `len` segments of this path.
    #[inline]
    pub fn prefix(&self, len: usize) -> Path {
        Path(self.0[..len.min(self.0.len())].to_vec())
    }

    /// Check if this path is a prefix of another path.
    ///
    /// ```
    /// use tirea_store::path;
    ///
    /// let parent = path!("user");
    /// let child = path!("user", "name");
    ///
    /// assert!(parent.is_prefix_of(&child));
    /// assert!(!child.is_prefix_of(&parent));
    /// ```
    #[inline]
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Get the parent path (path without the last segment).
    #[inline]
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            None
        } else {
            let mut p = self.clone();
            p.pop();
            Some(p)
        }
    }

    /// Render the path as a dot-joined subscription key.
    ///
    /// The root path renders as the empty string.
    pub fn dotted(&self) -> String {
        let mut out = String::new();
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(PATH_SEPARATOR);
            }
            match seg {
                Seg::Key(k) => out.push_str(k),
                Seg::Index(idx) => out.push_str(&idx.to_string()),
            }
        }
        out
    }

    /// Iterate over the segments.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Seg> {
        self.0.iter()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for seg in &self.0 {
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

impl FromIterator<Seg> for Path {
    fn from_iter<I: IntoIterator<Item = Seg>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a Seg;
    type IntoIter = std::slice::Iter<'a, Seg>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for Path {
    type Output = Seg;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        parse_path(s)
    }
}

impl From<String> for Path {
    fn from(s: String) -> Self {
        parse_path(&s)
    }
}

impl From<&String> for Path {
    fn from(s: &String) -> Self {
        parse_path(s)
    }
}

impl From<&Path> for Path {
    fn from(p: &Path) -> Self {
        p.clone()
    }
}

/// Parse a dot-separated path string into a Path.
///
/// Empty segments are skipped, so `""` is the root and `"a..b"` equals
/// `"a.b"`. Segments made only of ASCII digits become index segments.
pub fn parse_path(path: &str) -> Path {
    path.split(PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if segment.bytes().all(|b| b.is_ascii_digit()) {
                match segment.parse::<usize>() {
                    Ok(i) => Seg::Index(i),
                    Err(_) => Seg::key(segment),
                }
            } else {
                Seg::key(segment)
            }
        })
        .collect()
}

/// Construct a `Path` from a sequence of segments.
///
/// # Examples
///
/// ```
/// use tirea_store::path;
///
/// // String literals become Key segments
/// let p = path!("users", "alice", "email");
///
/// // Numbers become Index segments
/// let p = path!("items", 0, "name");
/// assert_eq!(p.dotted(), "items.0.name");
/// ```
#[macro_export]
macro_rules! path {
    () => {
        $crate::Path::root()
    };
    ($($seg:expr),+ $(,)?) => {{
        let mut p = $crate::Path::root();
        $(
            p.push($crate::path!(@seg $seg));
        )+
        p
    }};
    (@seg $seg:expr) => {
        $crate::Seg::from($seg)
    };
}
