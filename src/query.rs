//! # Post Listing Queries
//!
//! Lists one thread's posts in one of three orders, a page at a time.
//!
//! ## Query Variants
//!
//! Each (sort mode, direction) pair has its own static SQL statement:
//!
//! | Mode          | Cursor compares             | Order                       | `LIMIT` applies to |
//! |---------------|-----------------------------|-----------------------------|--------------------|
//! | `flat`        | `id`                        | `created, id`               | posts              |
//! | `tree`        | `path`                      | `path, created`             | posts              |
//! | `parent_tree` | `root` (cursor's tree)      | `root`, then `path` asc     | top-level posts    |
//!
//! Descending flips the comparison (`>` becomes `<`) and the order. In
//! `parent_tree` only the order of reply trees flips; each tree is still
//! listed from its top-level post down.
//!
//! Nothing is assembled at run time: the statement is picked by `match` and
//! every value is a bound parameter:
//!
//! - `?1` thread id
//! - `?2` cursor post id, or NULL for "from the start"
//! - `?3` limit, `-1` for unbounded (SQLite treats a negative LIMIT as none)
//!
//! ## Cursors
//!
//! The cursor is exclusive: a page starts strictly after (ascending) or
//! strictly before (descending) the cursor post. A cursor naming a post that
//! does not exist matches nothing and yields an empty page.
//!
//! ## Whole Reply Trees
//!
//! `parent_tree` pages by top-level post. The limit selects that many reply
//! trees and every descendant of each selected tree is returned with it, so
//! pages vary in size but never split a tree. A cursor inside a tree stands
//! for the whole tree: the next page starts at the following tree.

use rusqlite::{Connection, Row};

use crate::error::{Error, Result};
use crate::path::SortMode;
use crate::types::{timestamp_column, Post, PostId, ThreadId};

// =============================================================================
// SQL
// =============================================================================

/// Post columns in the order [`post_from_row`] reads them.
macro_rules! post_columns {
    () => {
        "p.id, p.author, p.message, p.thread, p.forum, p.parent, p.created_us, p.is_edited, p.path"
    };
}
pub(crate) use post_columns;

const FLAT_ASC: &str = concat!(
    "SELECT ",
    post_columns!(),
    " FROM posts p
     WHERE p.thread = ?1
       AND (?2 IS NULL OR p.id > (SELECT s.id FROM posts s WHERE s.id = ?2))
     ORDER BY p.created_us, p.id
     LIMIT ?3"
);

const FLAT_DESC: &str = concat!(
    "SELECT ",
    post_columns!(),
    " FROM posts p
     WHERE p.thread = ?1
       AND (?2 IS NULL OR p.id < (SELECT s.id FROM posts s WHERE s.id = ?2))
     ORDER BY p.created_us DESC, p.id DESC
     LIMIT ?3"
);

const TREE_ASC: &str = concat!(
    "SELECT ",
    post_columns!(),
    " FROM posts p
     WHERE p.thread = ?1
       AND (?2 IS NULL OR p.path > (SELECT s.path FROM posts s WHERE s.id = ?2))
     ORDER BY p.path, p.created_us
     LIMIT ?3"
);

const TREE_DESC: &str = concat!(
    "SELECT ",
    post_columns!(),
    " FROM posts p
     WHERE p.thread = ?1
       AND (?2 IS NULL OR p.path < (SELECT s.path FROM posts s WHERE s.id = ?2))
     ORDER BY p.path DESC, p.created_us DESC
     LIMIT ?3"
);

const PARENT_TREE_ASC: &str = concat!(
    "SELECT ",
    post_columns!(),
    " FROM posts p
     JOIN (
         SELECT r.id FROM posts r
         WHERE r.thread = ?1 AND r.parent IS NULL
           AND (?2 IS NULL OR r.root > (SELECT s.root FROM posts s WHERE s.id = ?2))
         ORDER BY r.root
         LIMIT ?3
     ) roots ON p.root = roots.id
     WHERE p.thread = ?1
     ORDER BY p.root, p.path"
);

const PARENT_TREE_DESC: &str = concat!(
    "SELECT ",
    post_columns!(),
    " FROM posts p
     JOIN (
         SELECT r.id FROM posts r
         WHERE r.thread = ?1 AND r.parent IS NULL
           AND (?2 IS NULL OR r.root < (SELECT s.root FROM posts s WHERE s.id = ?2))
         ORDER BY r.root DESC
         LIMIT ?3
     ) roots ON p.root = roots.id
     WHERE p.thread = ?1
     ORDER BY p.root DESC, p.path"
);

// =============================================================================
// Page Parameters
// =============================================================================

/// Which page of a thread's posts to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostPage {
    /// Page size, 0 for unbounded. In `ParentTree` mode, the number of
    /// reply trees.
    pub limit: u64,
    /// Exclusive cursor. `None` starts at the beginning (or the end, if `desc`).
    pub since: Option<PostId>,
    pub sort: SortMode,
    pub desc: bool,
}

impl PostPage {
    /// A first page of unbounded size in ascending order.
    pub fn new(sort: SortMode) -> Self {
        Self {
            sort,
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn since(mut self, cursor: PostId) -> Self {
        self.since = Some(cursor);
        self
    }

    pub fn desc(mut self, desc: bool) -> Self {
        self.desc = desc;
        self
    }

    /// Builds a page from request values as the HTTP layer receives them.
    ///
    /// A negative limit is treated as 0 (unbounded). An empty `since` means
    /// no cursor and an empty `sort` means `flat`.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidSort` for an unknown sort mode
    /// - `Error::InvalidCursor` if `since` is not an integer
    pub fn parse(limit: i64, since: &str, sort: &str, desc: bool) -> Result<Self> {
        let since = match since.trim() {
            "" => None,
            s => Some(PostId::from_raw(
                s.parse::<i64>()
                    .map_err(|_| Error::InvalidCursor(since.to_string()))?,
            )),
        };

        Ok(Self {
            limit: u64::try_from(limit).unwrap_or(0),
            since,
            sort: sort.parse()?,
            desc,
        })
    }

    /// The statement for this page's mode and direction.
    fn sql(&self) -> &'static str {
        match (self.sort, self.desc) {
            (SortMode::Flat, false) => FLAT_ASC,
            (SortMode::Flat, true) => FLAT_DESC,
            (SortMode::Tree, false) => TREE_ASC,
            (SortMode::Tree, true) => TREE_DESC,
            (SortMode::ParentTree, false) => PARENT_TREE_ASC,
            (SortMode::ParentTree, true) => PARENT_TREE_DESC,
        }
    }
}

/// `LIMIT` value for a page size where 0 means unbounded.
pub(crate) fn sql_limit(limit: u64) -> i64 {
    match limit {
        0 => -1,
        n => i64::try_from(n).unwrap_or(i64::MAX),
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Lists one page of a thread's posts.
///
/// An unknown thread yields an empty page; callers that must distinguish it
/// from an empty thread resolve the thread first.
///
/// Repeating a call with no writes in between returns the same sequence:
/// every order ends in a unique key (`id` or `path`).
pub fn get_posts(conn: &Connection, thread: ThreadId, page: &PostPage) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare_cached(page.sql())?;
    let posts = stmt
        .query_map(
            rusqlite::params![thread, page.since, sql_limit(page.limit)],
            post_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    tracing::debug!(
        thread = %thread,
        sort = %page.sort,
        desc = page.desc,
        limit = page.limit,
        rows = posts.len(),
        "listed posts"
    );
    Ok(posts)
}

/// Maps a row selected with [`post_columns!`] to a [`Post`].
pub(crate) fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        author: row.get(1)?,
        message: row.get(2)?,
        thread: row.get(3)?,
        forum: row.get(4)?,
        parent: row.get(5)?,
        created: timestamp_column(row, 6)?,
        is_edited: row.get(7)?,
        path: row.get(8)?,
    })
}

// =============================================================================
// Tests
// =============================================================================
