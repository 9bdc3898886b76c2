//! # Buffered Forum Post Counters
//!
//! Every post insert changes its forum's post count, and a busy forum would
//! serialize all its writers on one `forums` row if that count were updated
//! in place. [`ForumPostCounter`] moves the update off the insert path:
//!
//! ```text
//!   create_posts(f1, 5) ──► forum_pending_posts[f1] += 5 ──┐
//!   create_posts(f2, 2) ──► forum_pending_posts[f2] += 2 ──┤   pending_updates: 3
//!   create_posts(f1, 3) ──► forum_pending_posts[f1] += 3 ──┘
//!
//!   get_forum(f1) ──► flush_if_dirty()
//!                       BEGIN IMMEDIATE
//!                       forums.posts += pending      (every forum)
//!                       pending = 0                  (every forum)
//!                       COMMIT                       pending_updates: 0
//! ```
//!
//! The true count for a forum is always `forums.posts + pending`. A flush
//! moves every delta at once, inside one transaction, so no reader ever sees
//! a half-applied flush.
//!
//! ## Dirty Signal
//!
//! `pending_updates` counts buffered-but-unflushed updates. When it is zero,
//! [`ForumPostCounter::flush_if_dirty`] returns without touching the store.
//! That is the common case, and it costs one atomic load.
//!
//! ## Rust Pattern: Double-Checked Locking
//!
//! ```text
//! load(pending) == 0 ? ──yes──► return false           (no lock, no I/O)
//!        │ no
//!        ▼
//! lock(flush_lock)
//! load(pending) == 0 ? ──yes──► return false           (someone else flushed)
//!        │ no
//!        ▼
//! run flush transaction, subtract what we observed
//! ```
//!
//! The second check matters when several readers observe a dirty counter at
//! the same moment: the first one flushes, the rest find nothing to do.
//!
//! Subtracting the observed value (rather than storing zero) keeps updates
//! that were buffered while the flush ran: they stay counted and the next
//! flush picks them up.
//!
//! ## Injectable
//!
//! The counter is an ordinary value. The store shares one through an `Arc`,
//! and tests build as many independent instances as they like.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use rusqlite::Connection;

use crate::error::{is_constraint_violation, Error, Result};

// =============================================================================
// SQL
// =============================================================================

const BUFFER_SQL: &str = "INSERT INTO forum_pending_posts (forum, posts) VALUES (?1, ?2) \
     ON CONFLICT(forum) DO UPDATE SET posts = posts + excluded.posts";

const APPLY_PENDING_SQL: &str = "UPDATE forums \
     SET posts = posts + (SELECT p.posts FROM forum_pending_posts p WHERE p.forum = forums.slug) \
     WHERE slug IN (SELECT forum FROM forum_pending_posts WHERE posts <> 0)";

const RESET_PENDING_SQL: &str = "UPDATE forum_pending_posts SET posts = 0 WHERE posts <> 0";

// =============================================================================
// ForumPostCounter
// =============================================================================

/// Buffers forum post-count deltas and folds them into `forums.posts` on demand.
#[derive(Debug, Default)]
pub struct ForumPostCounter {
    /// Buffered updates not yet flushed. Zero means clean.
    pending_updates: AtomicU64,

    /// Serializes flushes.
    flush_lock: Mutex<()>,

    /// Number of flush transactions committed, for observability and tests.
    flushes: AtomicU64,
}

impl ForumPostCounter {
    /// Creates a clean counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a counter that is dirty if the store holds unflushed deltas.
    ///
    /// Staged deltas are durable. After a restart they are still in
    /// `forum_pending_posts`, and this makes the next flush pick them up.
    pub fn from_store(conn: &Connection) -> Result<Self> {
        let staged: i64 = conn.query_row(
            "SELECT COUNT(*) FROM forum_pending_posts WHERE posts <> 0",
            [],
            |row| row.get(0),
        )?;

        let counter = Self::new();
        counter
            .pending_updates
            .store(u64::try_from(staged).unwrap_or(0), Ordering::Release);

        if staged > 0 {
            tracing::info!(forums = staged, "found unflushed forum post counts");
        }
        Ok(counter)
    }

    /// Adds `delta` to `forum`'s pending total and marks the counter dirty.
    ///
    /// Runs inside whatever transaction the caller has open, so a rolled
    /// back insert also rolls back its delta. The dirty signal is raised
    /// only after the staging row was written.
    ///
    /// # Errors
    ///
    /// - `Error::ForumNotFound` if the forum does not exist
    /// - `Error::Sqlite` for any other store failure
    pub fn buffer_post_count(&self, conn: &Connection, forum: &str, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }

        conn.prepare_cached(BUFFER_SQL)?
            .execute(rusqlite::params![forum, delta])
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::ForumNotFound(forum.to_string())
                } else {
                    Error::Sqlite(e)
                }
            })?;

        self.pending_updates.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Folds every pending delta into its forum's durable count.
    ///
    /// Returns `Ok(false)` without store access when there is nothing to do,
    /// `Ok(true)` when a flush transaction committed.
    ///
    /// # Errors
    ///
    /// On any store error the transaction is rolled back, the dirty signal is
    /// left as it was, and the error is returned. A later call retries.
    pub fn flush_if_dirty(&self, conn: &Connection) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }

        // A poisoned lock only means another flush panicked; the guarded
        // state is the store, which that flush's transaction protected.
        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let observed = self.pending_updates.load(Ordering::Acquire);
        if observed == 0 {
            return Ok(false);
        }

        conn.execute_batch("BEGIN IMMEDIATE")?;

        match Self::apply_pending(conn) {
            Ok(forums) => {
                if let Err(e) = conn.execute_batch("COMMIT") {
                    tracing::warn!(error = %e, "forum count flush failed to commit");
                    Self::rollback(conn);
                    return Err(e.into());
                }
                self.pending_updates.fetch_sub(observed, Ordering::AcqRel);
                self.flushes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(forums, updates = observed, "flushed forum post counts");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "forum count flush rolled back");
                Self::rollback(conn);
                Err(e)
            }
        }
    }

    fn rollback(conn: &Connection) {
        if let Err(rollback) = conn.execute_batch("ROLLBACK") {
            tracing::error!(error = %rollback, "failed to roll back forum count flush");
        }
    }

    /// Applies and zeroes all pending rows. Returns the number of forums touched.
    fn apply_pending(conn: &Connection) -> Result<usize> {
        let forums = conn.execute(APPLY_PENDING_SQL, [])?;
        conn.execute(RESET_PENDING_SQL, [])?;
        Ok(forums)
    }

    /// True when buffered updates are waiting for a flush.
    pub fn is_dirty(&self) -> bool {
        self.pending_updates.load(Ordering::Acquire) != 0
    }

    /// Number of buffered updates waiting for a flush.
    pub fn pending_updates(&self) -> u64 {
        self.pending_updates.load(Ordering::Acquire)
    }

    /// Number of flush transactions committed by this counter.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Marks the counter clean. Used after every table was truncated.
    pub fn reset(&self) {
        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.pending_updates.store(0, Ordering::Release);
    }
}

// =============================================================================
// Tests
// =============================================================================
