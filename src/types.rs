//! # Core Types for ForumDB
//!
//! This module defines the domain records that flow between the store and the
//! service layer above it: users, forums, threads, posts, votes.
//!
//! ## Rust Pattern: Newtype Wrappers
//!
//! Post and thread identifiers are both 64-bit integers in SQLite. Wrapping
//! them in distinct types means the compiler rejects a thread id passed where
//! a post id (for example a pagination cursor) is expected:
//!
//! ```rust,ignore
//! fn get_posts(thread: ThreadId, since: Option<PostId>) { ... }
//!
//! get_posts(post_id, Some(thread_id));  // Compile error
//! ```
//!
//! ## Timestamps
//!
//! Creation times are `chrono::DateTime<Utc>` in memory and INTEGER
//! microseconds since the Unix epoch on disk. Values are truncated to
//! microsecond precision before they are written so that what the caller
//! gets back from a create equals what a later read returns.
//!
//! ## Serialization
//!
//! Records derive `serde` traits with the field names the HTTP layer uses
//! (`isEdited`, `user` for a forum owner). A top-level post serializes its
//! parent as `0`, and an incoming `0` parent means "no parent".

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::path::PostPath;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a post, assigned by the store on insert.
///
/// Ids strictly increase in insertion order. Posts created by one call get
/// consecutive ids in the order they were supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(i64);

impl PostId {
    /// Creates a PostId from a raw store value.
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value for database storage.
    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql for PostId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for PostId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

/// Identifier of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(i64);

impl ThreadId {
    /// Creates a ThreadId from a raw store value.
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value for database storage.
    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql for ThreadId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for ThreadId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

// =============================================================================
// Timestamps
// =============================================================================

/// Truncates a timestamp to the precision the store keeps.
pub fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Returns the current time at store precision.
pub fn now() -> DateTime<Utc> {
    normalize_timestamp(Utc::now())
}

/// Converts a timestamp to its stored form.
/// An update field counts only when it carries a non-empty string.
pub(crate) fn provided(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

pub(crate) fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Reads a stored timestamp column.
///
/// An out-of-range value surfaces as a rusqlite conversion error so it can be
/// returned from a row-mapping closure with `?`.
pub(crate) fn timestamp_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

// =============================================================================
// Users
// =============================================================================

/// A forum user. Nicknames and emails are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub nickname: String,
    pub fullname: String,
    pub email: String,
    #[serde(default)]
    pub about: String,
}

/// Partial profile update. `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub fullname: Option<String>,
    pub email: Option<String>,
    pub about: Option<String>,
}

impl UserUpdate {
    /// True when the update would change nothing.
    pub fn is_empty(&self) -> bool {
        provided(&self.fullname).is_none()
            && provided(&self.email).is_none()
            && provided(&self.about).is_none()
    }
}

/// Pagination for a forum's member listing, ordered by nickname.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPage {
    /// Page size, 0 for unbounded.
    pub limit: u64,
    /// Exclusive nickname cursor.
    pub since: Option<String>,
    pub desc: bool,
}

// =============================================================================
// Forums
// =============================================================================

/// Request to create a forum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewForum {
    pub slug: String,
    pub title: String,
    /// Nickname of the owner.
    pub user: String,
}

/// A forum with its counters.
///
/// `posts` is the durable counter. It includes pending deltas only after a
/// flush, so readers that need an exact value flush first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forum {
    pub slug: String,
    pub title: String,
    pub user: String,
    pub threads: i64,
    pub posts: i64,
}

// =============================================================================
// Threads
// =============================================================================

/// Request to create a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewThread {
    #[serde(default)]
    pub slug: Option<String>,
    pub title: String,
    pub author: String,
    pub message: String,
    /// Creation time; the store stamps the current time when absent.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// A discussion thread inside a forum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub forum: String,
    pub author: String,
    pub title: String,
    pub message: String,
    pub created: DateTime<Utc>,
    pub votes: i64,
}

/// Partial title/message update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadUpdate {
    pub title: Option<String>,
    pub message: Option<String>,
}

/// Pagination for a forum's thread listing, ordered by creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadPage {
    /// Page size, 0 for unbounded.
    pub limit: u64,
    /// Inclusive creation-time cursor.
    pub since: Option<DateTime<Utc>>,
    pub desc: bool,
}

/// A user's vote on a thread, `+1` or `-1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub nickname: String,
    pub voice: i32,
}

// =============================================================================
// Posts
// =============================================================================

/// A post to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub author: String,
    pub message: String,
    /// Parent post; `None` for a top-level reply.
    #[serde(default, with = "parent_id")]
    pub parent: Option<PostId>,
}

impl NewPost {
    /// Creates a top-level post.
    pub fn new(author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            message: message.into(),
            parent: None,
        }
    }

    /// Makes this post a reply to `parent`.
    pub fn reply_to(mut self, parent: PostId) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A stored post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author: String,
    pub message: String,
    pub thread: ThreadId,
    pub forum: String,
    #[serde(default, with = "parent_id")]
    pub parent: Option<PostId>,
    pub created: DateTime<Utc>,
    #[serde(rename = "isEdited")]
    pub is_edited: bool,
    /// Ancestor chain ending with this post's id.
    #[serde(skip)]
    pub path: PostPath,
}

/// Edit of a post's text and/or position in the reply tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostUpdate {
    pub message: Option<String>,
    /// New parent. `Some` moves the post and its subtree.
    #[serde(default, with = "parent_id")]
    pub parent: Option<PostId>,
}

/// Related records that can be attached to a post lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Related {
    User,
    Forum,
    Thread,
}

/// A post together with the requested related records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDetails {
    pub post: Post,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forum: Option<Forum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<Thread>,
}

/// Row counts for the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub user: i64,
    pub forum: i64,
    pub thread: i64,
    pub post: i64,
}

/// Serde adapter: `None` parent is written as `0`, and `0` reads back as `None`.
mod parent_id {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::PostId;

    pub fn serialize<S: Serializer>(parent: &Option<PostId>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(parent.map(|p| p.as_raw()).unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<PostId>, D::Error> {
        let raw = Option::<i64>::deserialize(d)?;
        Ok(raw.filter(|&v| v != 0).map(PostId::from_raw))
    }
}

// =============================================================================
// Tests
// =============================================================================
