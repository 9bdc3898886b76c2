//! # SQLite Schema for ForumDB
//!
//! This module defines the database schema and handles initialization.
//!
//! ## Table Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Schema Overview                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  users               forums                forum_pending_posts          │
//! │  ┌──────────────┐    ┌──────────────┐      ┌──────────────────┐         │
//! │  │ nickname (PK)│◄───│ owner        │      │ forum (PK, FK) ──┼──┐      │
//! │  │ email (UQ)   │    │ slug (PK)    │◄─────┼──────────────────┘  │      │
//! │  └──────────────┘    │ posts        │      │ posts (delta)    │  │      │
//! │         ▲            └──────────────┘      └──────────────────┘  │      │
//! │         │                   ▲                                    │      │
//! │  threads                    │              posts                 │      │
//! │  ┌──────────────┐           │              ┌──────────────────┐  │      │
//! │  │ id (PK)      │◄──────────┼──────────────│ thread           │  │      │
//! │  │ slug (UQ)    │           └──────────────│ forum            │  │      │
//! │  │ forum, author│                          │ parent, path,root│  │      │
//! │  │ votes        │                          └──────────────────┘  │      │
//! │  └──────────────┘                                                │      │
//! │                                                                         │
//! │  votes (thread, nickname)      forum_users (forum, nickname)            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! ### Why a separate `forum_pending_posts` table?
//!
//! Every post insert changes its forum's post count. Updating `forums.posts`
//! on each insert would make that one row the hottest row in the database.
//! Instead inserts add to a staging row, and [`crate::counter`] folds all
//! staged deltas into `forums.posts` in one transaction when someone needs
//! the exact number. Staged deltas are durable, so a restart loses nothing.
//!
//! ### Why compute `path` in a trigger?
//!
//! A post's path depends on its own id, which does not exist until the row
//! is inserted. The AFTER INSERT trigger reads the parent's path and appends
//! the new id, so a multi-row insert computes every path in one statement,
//! including replies to posts inserted earlier in the same statement.
//!
//! ### Case-insensitive keys
//!
//! Nicknames, emails and slugs compare with `COLLATE NOCASE`, so lookups,
//! uniqueness and foreign keys all ignore case.

use rusqlite::Connection;

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when making breaking schema changes.
///
/// There are no migrations: a database with a different version is rejected.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// Metadata key/value table, holds the schema version.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS forumdb_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

/// Users, keyed by nickname.
const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    nickname TEXT PRIMARY KEY COLLATE NOCASE,
    fullname TEXT NOT NULL,
    email    TEXT NOT NULL UNIQUE COLLATE NOCASE,
    about    TEXT NOT NULL DEFAULT ''
)
"#;

/// Forums with their durable post counter.
///
/// # Columns
///
/// - `posts`: post count as of the last flush. The true count is
///   `posts + forum_pending_posts.posts`.
const CREATE_FORUMS: &str = r#"
CREATE TABLE IF NOT EXISTS forums (
    slug  TEXT PRIMARY KEY COLLATE NOCASE,
    title TEXT NOT NULL,
    owner TEXT NOT NULL COLLATE NOCASE REFERENCES users(nickname),
    posts INTEGER NOT NULL DEFAULT 0
)
"#;

/// Per-forum staging row for post-count deltas not yet folded into `forums`.
const CREATE_FORUM_PENDING_POSTS: &str = r#"
CREATE TABLE IF NOT EXISTS forum_pending_posts (
    forum TEXT PRIMARY KEY COLLATE NOCASE REFERENCES forums(slug) ON DELETE CASCADE,
    posts INTEGER NOT NULL DEFAULT 0
)
"#;

/// Threads. `slug` is optional but unique when present.
const CREATE_THREADS: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    slug       TEXT UNIQUE COLLATE NOCASE,
    forum      TEXT NOT NULL COLLATE NOCASE REFERENCES forums(slug),
    author     TEXT NOT NULL COLLATE NOCASE REFERENCES users(nickname),
    title      TEXT NOT NULL,
    message    TEXT NOT NULL,
    created_us INTEGER NOT NULL,
    votes      INTEGER NOT NULL DEFAULT 0
)
"#;

/// Supports the forum thread listing ordered by creation time.
const CREATE_THREADS_FORUM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS threads_forum_created
ON threads(forum, created_us)
"#;

/// Posts.
///
/// # Columns
///
/// - `id`: AUTOINCREMENT so ids are never reused and strictly increase
/// - `forum`: copied from the thread at insert time for cheap reads
/// - `parent`: NULL for top-level posts
/// - `path`: encoded ancestor chain (see [`crate::path`]), set by trigger
/// - `root`: first element of `path`, set by trigger
///
/// # Indexes
///
/// One per listing order: `(thread, created_us, id)` for flat,
/// `(thread, path)` for tree, `(thread, root, path)` for parent_tree.
const CREATE_POSTS: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    author     TEXT NOT NULL COLLATE NOCASE REFERENCES users(nickname),
    message    TEXT NOT NULL,
    thread     INTEGER NOT NULL REFERENCES threads(id),
    forum      TEXT NOT NULL COLLATE NOCASE,
    parent     INTEGER,
    created_us INTEGER NOT NULL,
    is_edited  INTEGER NOT NULL DEFAULT 0,
    path       TEXT NOT NULL DEFAULT '',
    root       INTEGER NOT NULL DEFAULT 0
)
"#;

const CREATE_POSTS_FLAT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS posts_thread_created
ON posts(thread, created_us, id)
"#;

const CREATE_POSTS_TREE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS posts_thread_path
ON posts(thread, path)
"#;

const CREATE_POSTS_PARENT_TREE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS posts_thread_root_path
ON posts(thread, root, path)
"#;

/// Rejects a reply whose parent is missing or lives in another thread.
///
/// The abort surfaces as a constraint violation, which the packet writer
/// diagnoses into a not-found error.
const CREATE_POSTS_PARENT_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS posts_parent_check
BEFORE INSERT ON posts
WHEN NEW.parent IS NOT NULL
 AND NOT EXISTS (SELECT 1 FROM posts p WHERE p.id = NEW.parent AND p.thread = NEW.thread)
BEGIN
    SELECT RAISE(ABORT, 'parent post was created in another thread');
END
"#;

/// Materializes `path` and `root` from the parent row.
const CREATE_POSTS_PATH_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS posts_materialize_path
AFTER INSERT ON posts
BEGIN
    UPDATE posts
    SET path = coalesce((SELECT p.path FROM posts p WHERE p.id = NEW.parent), '')
               || printf('%019d', NEW.id),
        root = coalesce((SELECT p.root FROM posts p WHERE p.id = NEW.parent), NEW.id)
    WHERE id = NEW.id;
END
"#;

/// One vote per user per thread.
const CREATE_VOTES: &str = r#"
CREATE TABLE IF NOT EXISTS votes (
    thread   INTEGER NOT NULL REFERENCES threads(id),
    nickname TEXT NOT NULL COLLATE NOCASE REFERENCES users(nickname),
    voice    INTEGER NOT NULL CHECK (voice IN (-1, 1)),
    PRIMARY KEY (thread, nickname)
)
"#;

/// Keep `threads.votes` equal to the sum of voices.
const CREATE_VOTES_TRIGGERS: &str = r#"
CREATE TRIGGER IF NOT EXISTS votes_insert_total
AFTER INSERT ON votes
BEGIN
    UPDATE threads SET votes = votes + NEW.voice WHERE id = NEW.thread;
END;

CREATE TRIGGER IF NOT EXISTS votes_update_total
AFTER UPDATE OF voice ON votes
BEGIN
    UPDATE threads SET votes = votes + NEW.voice - OLD.voice WHERE id = NEW.thread;
END;
"#;

/// Users who created a thread or post in a forum.
const CREATE_FORUM_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS forum_users (
    forum    TEXT NOT NULL COLLATE NOCASE,
    nickname TEXT NOT NULL COLLATE NOCASE,
    PRIMARY KEY (forum, nickname)
)
"#;

/// Every table, in an order that satisfies foreign keys when deleting.
pub(crate) const DATA_TABLES: &[&str] = &[
    "forum_users",
    "votes",
    "posts",
    "threads",
    "forum_pending_posts",
    "forums",
    "users",
];

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the ForumDB schema applied.
///
/// # Ownership
///
/// `Database` owns its `Connection`. [`Database::into_connection`] hands it to
/// the writer thread, which becomes its only user.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Applies pragmas, creates tables and triggers, checks the version.
    fn initialize(&mut self) -> Result<()> {
        // WAL: readers see a consistent snapshot while the writer commits.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;
        // Foreign keys carry the author/thread/forum existence checks.
        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;

        for ddl in [
            CREATE_METADATA,
            CREATE_USERS,
            CREATE_FORUMS,
            CREATE_FORUM_PENDING_POSTS,
            CREATE_THREADS,
            CREATE_THREADS_FORUM_INDEX,
            CREATE_POSTS,
            CREATE_POSTS_FLAT_INDEX,
            CREATE_POSTS_TREE_INDEX,
            CREATE_POSTS_PARENT_TREE_INDEX,
            CREATE_POSTS_PARENT_TRIGGER,
            CREATE_POSTS_PATH_TRIGGER,
            CREATE_VOTES,
            CREATE_VOTES_TRIGGERS,
            CREATE_FORUM_USERS,
        ] {
            self.conn.execute_batch(ddl)?;
        }

        self.verify_or_set_version()?;
        tracing::debug!(version = SCHEMA_VERSION, "schema ready");

        Ok(())
    }

    /// Verifies the schema version, or sets it if this is a new database.
    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM forumdb_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .ok();

        match existing.map(|s| s.parse::<i32>().unwrap_or(0)) {
            None => {
                self.conn.execute(
                    "INSERT INTO forumdb_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, expected {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Consumes the wrapper and returns the initialized connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Returns a reference to the underlying SQLite connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Applies the per-connection pragmas a read-only pool connection needs.
///
/// `journal_mode` is a database property already set by the writer, and a
/// read-only connection cannot change it.
pub(crate) fn configure_reader(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
