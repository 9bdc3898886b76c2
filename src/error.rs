//! # Error Handling for ForumDB
//!
//! This module defines the error types used throughout ForumDB. A single
//! error enum ([`Error`]) represents every failure mode, so the service layer
//! above the store can map outcomes to responses with one `match`.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations:
//! - `Display` comes from the `#[error(...)]` attributes
//! - `From<rusqlite::Error>` comes from `#[from]`, so `?` converts store errors
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Not found | `ThreadNotFound`, `ParentNotFound`, `ForumNotFound`, `UserNotFound`, `PostNotFound` | 404 |
//! | Conflict | `ForumExists`, `ThreadExists`, `UserExists`, `UserConflict` | 409 |
//! | Bad input | `InvalidSort`, `InvalidCursor`, `InvalidParent` | 400 |
//! | Internal | `Sqlite`, `Schema`, `Config` | Log and investigate |
//!
//! ## Documented Ambiguity
//!
//! When a packet of posts cannot be inserted because its author does not
//! exist, the store reports [`Error::ThreadNotFound`], exactly as it does for
//! a missing thread. Only a bad parent surfaces as [`Error::ParentNotFound`].
//! Callers depend on this mapping, so it is kept as is.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in ForumDB operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Not Found
    // =========================================================================

    /// The thread does not exist.
    ///
    /// Also returned when a post's author does not exist during a packet
    /// insert (see the module docs).
    #[error("can't find thread '{0}'")]
    ThreadNotFound(String),

    /// A post names a parent that does not exist or lives in another thread.
    #[error("parent post was created in another thread")]
    ParentNotFound,

    /// The forum does not exist.
    #[error("can't find forum '{0}'")]
    ForumNotFound(String),

    /// The user does not exist.
    #[error("can't find user '{0}'")]
    UserNotFound(String),

    /// The post does not exist.
    #[error("can't find post {0}")]
    PostNotFound(i64),

    // =========================================================================
    // Conflicts (sibling create/update operations)
    // =========================================================================

    /// A forum with this slug already exists.
    #[error("forum '{0}' already exists")]
    ForumExists(String),

    /// A thread with this slug already exists.
    #[error("thread '{0}' already exists")]
    ThreadExists(String),

    /// A user with this nickname or email already exists.
    #[error("user '{0}' already exists")]
    UserExists(String),

    /// Updating the user would collide with another user's email.
    #[error("update of user '{0}' conflicts with another user")]
    UserConflict(String),

    // =========================================================================
    // Bad Input
    // =========================================================================

    /// Sort mode is not one of `flat`, `tree`, `parent_tree`.
    #[error("unknown sort mode '{0}'")]
    InvalidSort(String),

    /// The pagination cursor is not a post id.
    #[error("invalid cursor '{0}': expected a post id")]
    InvalidCursor(String),

    /// Reparenting a post under itself or one of its descendants.
    #[error("post {post} cannot be moved under its own descendant {parent}")]
    InvalidParent {
        /// The post being moved
        post: i64,
        /// The requested new parent
        parent: i64,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// Wraps any error from `rusqlite`: a locked database, a full disk,
    /// a corrupted file. These are transient or operational and are never
    /// retried inside the store.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema mismatch, stored data that cannot be decoded, or a store
    /// worker that is no longer running.
    #[error("schema error: {0}")]
    Schema(String),

    /// Configuration value could not be parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true for the not-found family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ThreadNotFound(_)
                | Error::ParentNotFound
                | Error::ForumNotFound(_)
                | Error::UserNotFound(_)
                | Error::PostNotFound(_)
        )
    }

    /// Returns true for uniqueness conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::ForumExists(_)
                | Error::ThreadExists(_)
                | Error::UserExists(_)
                | Error::UserConflict(_)
        )
    }
}

/// Returns true when a rusqlite error is a constraint violation
/// (foreign key, unique, check, or a `RAISE(ABORT)` from a trigger).
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Returns true when a rusqlite error is a UNIQUE or PRIMARY KEY violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::ThreadNotFound("42".to_string()).to_string(),
            "can't find thread '42'"
        );
        assert_eq!(
            Error::InvalidParent { post: 3, parent: 7 }.to_string(),
            "post 3 cannot be moved under its own descendant 7"
        );
        assert_eq!(
            Error::InvalidSort("random".to_string()).to_string(),
            "unknown sort mode 'random'"
        );
    }

    #[test]
    fn test_error_families() {
        assert!(Error::ParentNotFound.is_not_found());
        assert!(Error::ForumNotFound("f".into()).is_not_found());
        assert!(!Error::ForumExists("f".into()).is_not_found());
        assert!(Error::UserConflict("u".into()).is_conflict());
        assert!(!Error::Schema("x".into()).is_conflict());
    }

    /// The `#[from]` attribute lets `?` turn rusqlite errors into ours.
    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();

        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }

    #[test]
    fn test_constraint_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL UNIQUE)",
        )
        .unwrap();
        conn.execute("INSERT INTO t (v) VALUES ('a')", []).unwrap();

        let dup = conn
            .execute("INSERT INTO t (v) VALUES ('a')", [])
            .unwrap_err();
        assert!(is_constraint_violation(&dup));
        assert!(is_unique_violation(&dup));

        let not_null = conn
            .execute("INSERT INTO t (v) VALUES (NULL)", [])
            .unwrap_err();
        assert!(is_constraint_violation(&not_null));
        assert!(!is_unique_violation(&not_null));
    }
}
