//! Structured cache key value object.
//!
//! Query results are cached under hierarchical keys such as
//! `["attendance", "class", "7b"]`. Invalidation with `exact: false` marks a
//! key and everything nested under it stale, so key identity and the prefix
//! relation are the only semantics the sync core needs.

use serde::{Deserialize, Serialize};

/// Hierarchical identifier for a cached query result.
///
/// Segments are ordered and compared as a whole; a key is a prefix of
/// another when the other starts with all of its segments. Keys are cheap to
/// clone and hashable so they can live in pending sets and registry entries.
///
/// # Example
///
/// ```
/// use campus_sync::domain::CacheKey;
///
/// let all = CacheKey::new(["attendance"]);
/// let class = CacheKey::new(["attendance", "class-7b"]);
///
/// assert!(all.is_prefix_of(&class));
/// assert_eq!(class.to_string(), "attendance:class-7b");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    /// Creates a key from ordered segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Returns the ordered segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns true when `other` is this key or nested under it.
    ///
    /// This is the relation the cache applies for `exact: false`
    /// invalidation.
    pub fn is_prefix_of(&self, other: &CacheKey) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(":"))
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for CacheKey {
    fn from(segments: [S; N]) -> Self {
        Self::new(segments)
    }
}
