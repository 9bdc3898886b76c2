//! # Materialized Reply Paths
//!
//! Every post stores its position in the thread's reply tree as a *path*: the
//! ids of its ancestors from the top-level post down to itself.
//!
//! ```text
//!   post 2 (top level)        path = [2]
//!   ├── post 3                path = [2, 3]
//!   │   └── post 7            path = [2, 3, 7]
//!   └── post 5                path = [2, 5]
//!   post 4 (top level)        path = [4]
//! ```
//!
//! A post's path extends its parent's path by exactly one element, so the
//! path length is depth + 1 and `path[0]` names the reply tree's root.
//!
//! ## On-Disk Encoding
//!
//! SQLite has no array type. A path is stored as TEXT made of fixed-width,
//! zero-padded decimal segments, 19 digits each (enough for any positive
//! `i64`):
//!
//! ```text
//! [2, 3, 7]  →  "0000000000000000002" "0000000000000000003" "0000000000000000007"
//! ```
//!
//! Because every segment has the same width, byte-wise text comparison of two
//! encoded paths gives the same answer as lexicographic comparison of the id
//! sequences, and a proper prefix sorts before its extensions. This lets the
//! store index and compare paths directly: `ORDER BY path` is depth-first
//! order, and `path > ?` is "after this post in depth-first order".
//!
//! The same encoding is produced inside SQL by `printf('%019d', id)`.
//!
//! ## Ordering Contracts
//!
//! [`SortMode`] names the three listing orders and [`SortMode::compare`]
//! states each one in Rust. The query layer implements them in SQL.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::error::{Error, Result};
use crate::types::{Post, PostId};

/// Width of one encoded path segment.
pub const SEGMENT_WIDTH: usize = 19;

// =============================================================================
// PostPath
// =============================================================================

/// The ancestor chain of a post, root first, ending with the post itself.
///
/// # Rust Pattern: Derived Ord
///
/// `Vec<T: Ord>` orders lexicographically with shorter prefixes first, which
/// is exactly depth-first tree order. Deriving `Ord` gives us the same order
/// the encoded TEXT column has in SQLite.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PostPath(Vec<PostId>);

impl PostPath {
    /// Path of a top-level post.
    pub fn root(id: PostId) -> Self {
        Self(vec![id])
    }

    /// Path of a new reply to the post at `self`.
    pub fn child(&self, id: PostId) -> Self {
        let mut ids = Vec::with_capacity(self.0.len() + 1);
        ids.extend_from_slice(&self.0);
        ids.push(id);
        Self(ids)
    }

    /// Path for post `id` given its parent's path, if any.
    pub fn of(parent: Option<&PostPath>, id: PostId) -> Self {
        match parent {
            Some(p) => p.child(id),
            None => Self::root(id),
        }
    }

    pub fn ids(&self) -> &[PostId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of ancestors. Top-level posts have depth 0.
    pub fn depth(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Id of the top-level post of this reply tree.
    pub fn root_id(&self) -> Option<PostId> {
        self.0.first().copied()
    }

    /// Id of the post this path belongs to.
    pub fn post_id(&self) -> Option<PostId> {
        self.0.last().copied()
    }

    /// Path of the parent post, `None` for top-level posts.
    pub fn parent_path(&self) -> Option<PostPath> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// True when `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &PostPath) -> bool {
        self.0.len() < other.0.len() && other.0.starts_with(&self.0)
    }

    /// True when `self` extends `parent` by exactly one element.
    pub fn is_child_of(&self, parent: &PostPath) -> bool {
        self.0.len() == parent.0.len() + 1 && self.0.starts_with(&parent.0)
    }

    /// Replaces the leading `old_prefix` with `new_prefix`.
    ///
    /// Used when a post is moved: every path in its subtree starts with the
    /// moved post's old path and must start with its new one instead.
    /// Returns `None` if `self` does not start with `old_prefix`.
    pub fn rebase(&self, old_prefix: &PostPath, new_prefix: &PostPath) -> Option<PostPath> {
        let rest = self.0.strip_prefix(old_prefix.0.as_slice())?;
        let mut ids = Vec::with_capacity(new_prefix.0.len() + rest.len());
        ids.extend_from_slice(&new_prefix.0);
        ids.extend_from_slice(rest);
        Some(Self(ids))
    }

    /// Encodes the path in its stored TEXT form.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * SEGMENT_WIDTH);
        for id in &self.0 {
            out.push_str(&encode_segment(*id));
        }
        out
    }

    /// Decodes a stored path.
    ///
    /// # Errors
    ///
    /// `Error::Schema` if the text is not a sequence of 19-digit segments.
    pub fn decode(text: &str) -> Result<Self> {
        if text.len() % SEGMENT_WIDTH != 0 || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Schema(format!("malformed post path '{text}'")));
        }

        text.as_bytes()
            .chunks(SEGMENT_WIDTH)
            .map(|seg| {
                // Segments are ASCII digits, checked above.
                let s = std::str::from_utf8(seg).unwrap_or_default();
                s.parse::<i64>()
                    .map(PostId::from_raw)
                    .map_err(|_| {
                        Error::Schema(format!("path segment '{s}' out of range"))
                    })
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

/// Encodes one id the way `printf('%019d', id)` does in SQL.
pub fn encode_segment(id: PostId) -> String {
    format!("{:0width$}", id.as_raw(), width = SEGMENT_WIDTH)
}

impl fmt::Display for PostPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|id| id.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

impl ToSql for PostPath {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.encode()))
    }
}

impl FromSql for PostPath {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        PostPath::decode(text).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// =============================================================================
// Sort Modes
// =============================================================================

/// Listing order for a thread's posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortMode {
    /// Creation order `(created, id)`, ignoring the tree.
    #[default]
    Flat,
    /// Depth-first `(path, created)`: ancestors before descendants.
    Tree,
    /// Depth-first, paginated by top-level post so reply trees never split.
    ParentTree,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Flat => "flat",
            SortMode::Tree => "tree",
            SortMode::ParentTree => "parent_tree",
        }
    }

    /// Compares two posts of one thread in this mode's listing order.
    ///
    /// In `ParentTree` mode only the choice of reply tree follows `desc`;
    /// posts inside a tree always run depth-first from the root.
    pub fn compare(&self, a: &Post, b: &Post, desc: bool) -> Ordering {
        let dir = |o: Ordering| if desc { o.reverse() } else { o };
        match self {
            SortMode::Flat => dir(a.created.cmp(&b.created).then(a.id.cmp(&b.id))),
            SortMode::Tree => dir(a.path.cmp(&b.path).then(a.created.cmp(&b.created))),
            SortMode::ParentTree => dir(a.path.root_id().cmp(&b.path.root_id()))
                .then_with(|| a.path.cmp(&b.path)),
        }
    }
}

impl FromStr for SortMode {
    type Err = Error;

    /// Parses a sort mode. An empty string selects the default (`flat`).
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "flat" => Ok(SortMode::Flat),
            "tree" => Ok(SortMode::Tree),
            "parent_tree" => Ok(SortMode::ParentTree),
            other => Err(Error::InvalidSort(other.to_string())),
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
