//! # ForumDB - Threaded Forum Store
//!
//! ForumDB stores users, forums, threads and posts in SQLite and serves the
//! queries a discussion board needs. It provides:
//!
//! - **Tree-ordered post listing**: flat, tree and parent-tree pages with cursors
//! - **Packetized post inserts**: one multi-row INSERT per packet of posts
//! - **Buffered forum counters**: post counts staged per batch, folded on read
//! - **Materialized paths**: every post carries its ancestry as a sortable key
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Async API Layer                          │
//! │           (ForumDb: users, forums, threads, posts)              │
//! └───────────────┬─────────────────────────────────┬───────────────┘
//!                 │ writes                          │ reads
//!                 ▼                                 ▼
//! ┌───────────────────────────────┐   ┌───────────────────────────────┐
//! │         Writer Thread         │   │         Reader Pool           │
//! │  (owns read-write connection) │   │  (read-only connections)      │
//! │                               │   │                               │
//! │  ┌─────────┐ ┌─────────────┐  │   │  ┌─────────────────────────┐  │
//! │  │ Packet  │ │ Forum Post  │  │   │  │ Post Query Builder      │  │
//! │  │ Writer  │ │ Counter     │  │   │  │ (flat/tree/parent_tree) │  │
//! │  └─────────┘ └─────────────┘  │   │  └─────────────────────────┘  │
//! └───────────────┬───────────────┘   └───────────────┬───────────────┘
//!                 └─────────────────┬─────────────────┘
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          SQLite (WAL)                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Path prefix**: a post's path is its parent's path plus its own id
//! 2. **Same thread**: a parent always lives in the child's thread
//! 3. **Shared timestamp**: all posts of one batch carry the same `created`
//! 4. **All or nothing**: a failed batch leaves no posts and no count change
//! 5. **Counts converge**: after a flush, every forum's `posts` is exact
//!
//! ## Module Organization
//!
//! - [`error`]: Error enum for all failure modes
//! - [`types`]: Domain records (User, Forum, Thread, Post) and ids
//! - [`path`]: Materialized post paths and listing sort modes
//! - [`schema`]: SQLite DDL, triggers and database initialization
//! - [`packet`]: Packetized multi-row post inserts
//! - [`query`]: Post page queries
//! - [`counter`]: Buffered forum post counts
//! - [`reader`]: Read operations and the reader pool loop
//! - [`writer`]: Write operations and the writer thread
//! - [`config`]: Environment-driven settings
//! - [`api`]: Async API (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for ForumDB operations.
pub mod error;

/// Domain records and id newtypes.
pub mod types;

/// Materialized post paths.
///
/// A path is the list of post ids from the thread's root post down to the
/// post itself. Stored as fixed-width text, so comparing two encoded paths
/// gives tree order.
pub mod path;

/// SQLite schema definitions and database initialization.
pub mod schema;

/// Packetized post inserts.
pub mod packet;

/// Post listing queries.
pub mod query;

/// Buffered forum post counts.
///
/// Post creation stages a count change per forum. The pending changes are
/// folded into `forums.posts` the next time someone reads a forum count.
pub mod counter;

/// Read operations for ForumDB.
pub mod reader;

/// Write operations and the single writer thread.
pub mod writer;

/// Runtime settings.
pub mod config;

/// Async API for ForumDB.
///
/// The main entry point is [`ForumDb`](api::ForumDb).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::ForumDb;
pub use config::ForumConfig;
pub use counter::ForumPostCounter;
pub use error::{Error, Result};
pub use path::{PostPath, SortMode};
pub use query::PostPage;
pub use schema::Database;

pub use types::{
    Forum, NewForum, NewPost, NewThread, Post, PostDetails, PostId, PostUpdate, Related, Status,
    Thread, ThreadId, ThreadPage, ThreadUpdate, User, UserPage, UserUpdate, Vote,
};
