//! # Async API for ForumDB
//!
//! [`ForumDb`] is the handle the service layer holds. It is `Clone`, and
//! every clone talks to the same writer thread and reader pool.
//!
//! ## The SQLite Challenge
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so a connection cannot be
//! shared between tasks. Each connection lives on its own OS thread and async
//! callers reach it through channels:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Tokio Runtime                           │
//! │   request tasks ──► ForumDb (Clone)                          │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ mpsc<WriteRequest>           │ mpsc<ReadRequest>
//!                ▼                              ▼
//!     ┌─────────────────────┐      ┌──────────────────────────┐
//!     │   forumdb-writer    │      │  forumdb-reader-0..N     │
//!     │  read-write conn    │      │  read-only conns         │
//!     │  ForumPostCounter ◄─┼──┐   │                          │
//!     └──────────┬──────────┘  │   └────────────┬─────────────┘
//!                └─────────────┼────────────────┘
//!                              │        ▼
//!              ForumDb::flush_if_dirty  SQLite (WAL)
//!              (atomic fast path)
//! ```
//!
//! ## Forum Post Counts
//!
//! Post batches only buffer their forum's count change. Operations that
//! report forum post counts ([`ForumDb::get_forum`], [`ForumDb::status`],
//! post details with the forum attached) call [`ForumDb::flush_if_dirty`]
//! first. Nothing else flushes, unless `flush_interval` is configured, in
//! which case a background task also flushes on that period.
//!
//! When nothing is pending, `flush_if_dirty` is an atomic load in the
//! calling task and never reaches the writer thread.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::ForumConfig;
use crate::counter::ForumPostCounter;
use crate::error::{Error, Result};
use crate::query::PostPage;
use crate::reader::{self, ReadRequest};
use crate::schema::{configure_reader, Database};
use crate::types::{
    now, Forum, NewForum, NewPost, NewThread, Post, PostDetails, PostId, PostUpdate, Related,
    Status, Thread, ThreadId, ThreadPage, ThreadUpdate, User, UserPage, UserUpdate, Vote,
};
use crate::writer::{spawn_writer, ForumWriterHandle};

/// Size of the read request channel.
const READ_CHANNEL_SIZE: usize = 4096;

// =============================================================================
// ForumDb - The Main Async Handle
// =============================================================================

/// The main async handle for ForumDB operations.
///
/// # Example
///
/// ```rust,ignore
/// use forumdb::{ForumDb, NewPost, PostPage, SortMode};
///
/// #[tokio::main]
/// async fn main() -> forumdb::Result<()> {
///     let db = ForumDb::open("forum.db").await?;
///
///     let posts = db.create_posts("my-thread", vec![NewPost::new("alice", "hi")]).await?;
///     let page = db
///         .get_thread_posts("my-thread", PostPage::new(SortMode::Tree).limit(20))
///         .await?;
///
///     db.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ForumDb {
    writer: ForumWriterHandle,
    read_tx: mpsc::Sender<ReadRequest>,
    reader_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    writer_thread: Arc<Mutex<Option<JoinHandle<()>>>>,
    reader_count: usize,
    counter: Arc<ForumPostCounter>,
}

impl ForumDb {
    /// Opens or creates a database at `path` with default settings.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(ForumConfig::with_path(path.as_ref())).await
    }

    /// Opens or creates a database with explicit settings.
    ///
    /// Must be called from within a Tokio runtime when `flush_interval` is
    /// set, since the periodic flush runs as a task.
    pub async fn open_with_config(config: ForumConfig) -> Result<Self> {
        let db = Database::open(&config.db_path)?;

        // Deltas staged before a restart are still pending.
        let counter = Arc::new(ForumPostCounter::from_store(db.connection())?);

        let (writer, writer_thread) = spawn_writer(
            db.into_connection(),
            Arc::clone(&counter),
            config.writer_config(),
        )?;

        let (read_tx, read_rx) = mpsc::channel(READ_CHANNEL_SIZE);
        let read_rx = Arc::new(std::sync::Mutex::new(read_rx));
        let reader_count = config.reader_threads.max(1);

        let mut reader_handles = Vec::with_capacity(reader_count);
        for i in 0..reader_count {
            let conn = Connection::open_with_flags(
                &config.db_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            configure_reader(&conn)?;

            let rx = Arc::clone(&read_rx);
            let handle = thread::Builder::new()
                .name(format!("forumdb-reader-{}", i))
                .spawn(move || reader::run_reader_pooled(conn, rx))
                .map_err(|e| {
                    Error::Schema(format!("failed to spawn reader thread: {}", e))
                })?;
            reader_handles.push(handle);
        }

        tracing::info!(
            path = %config.db_path.display(),
            readers = reader_count,
            packet_size = config.packet_size,
            pending_updates = counter.pending_updates(),
            "opened forum database"
        );

        let db = Self {
            writer,
            read_tx,
            reader_handles: Arc::new(Mutex::new(reader_handles)),
            writer_thread: Arc::new(Mutex::new(Some(writer_thread))),
            reader_count,
            counter,
        };

        if let Some(period) = config.flush_interval {
            db.spawn_flush_task(period);
        }

        Ok(db)
    }

    /// Spawns the periodic forum count flush.
    ///
    /// The task stops once the writer has shut down.
    fn spawn_flush_task(&self, period: Duration) {
        let writer = self.writer.clone();
        let counter = Arc::clone(&self.counter);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;
                if writer.is_closed() {
                    break;
                }
                if !counter.is_dirty() {
                    continue;
                }
                if let Err(e) = writer.flush_counts().await {
                    if writer.is_closed() {
                        break;
                    }
                    tracing::warn!(error = %e, "background forum count flush failed");
                }
            }
            tracing::debug!("flush task stopped");
        });
    }

    /// Number of reader threads in the pool.
    pub fn reader_count(&self) -> usize {
        self.reader_count
    }

    /// The shared forum post counter.
    pub fn counter(&self) -> &ForumPostCounter {
        &self.counter
    }

    async fn read<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> ReadRequest,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();

        self.read_tx
            .send(make(response_tx))
            .await
            .map_err(|_| Error::Schema("reader pool has shut down".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Schema("reader dropped response".to_string()))?
    }

    // =========================================================================
    // Forum Post Counter
    // =========================================================================

    /// Folds pending forum post counts into the forums if any are pending.
    ///
    /// Returns whether a flush transaction ran. A clean counter returns
    /// `false` without leaving the calling task.
    pub async fn flush_if_dirty(&self) -> Result<bool> {
        if !self.counter.is_dirty() {
            return Ok(false);
        }
        self.writer.flush_counts().await
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Creates a user. A taken nickname or email is `Error::UserExists`.
    pub async fn create_user(&self, user: User) -> Result<User> {
        self.writer.create_user(user).await
    }

    pub async fn get_user(&self, nickname: &str) -> Result<User> {
        let nickname = nickname.to_string();
        self.read(|response| ReadRequest::GetUser { nickname, response })
            .await
    }

    pub async fn update_user(&self, nickname: &str, update: UserUpdate) -> Result<User> {
        self.writer.update_user(nickname.to_string(), update).await
    }

    /// Users sharing `nickname` or `email`, to report a create conflict.
    pub async fn find_conflicting_users(&self, nickname: &str, email: &str) -> Result<Vec<User>> {
        let (nickname, email) = (nickname.to_string(), email.to_string());
        self.read(|response| ReadRequest::FindConflictingUsers {
            nickname,
            email,
            response,
        })
        .await
    }

    // =========================================================================
    // Forums
    // =========================================================================

    pub async fn create_forum(&self, forum: NewForum) -> Result<Forum> {
        self.writer.create_forum(forum).await
    }

    /// Fetches a forum with exact counts. Flushes pending post counts first.
    pub async fn get_forum(&self, slug: &str) -> Result<Forum> {
        self.flush_if_dirty().await?;
        let slug = slug.to_string();
        self.read(|response| ReadRequest::GetForum { slug, response })
            .await
    }

    /// Lists users who created a thread or post in the forum.
    pub async fn get_forum_users(&self, forum: &str, page: UserPage) -> Result<Vec<User>> {
        let forum = forum.to_string();
        self.read(|response| ReadRequest::GetForumUsers {
            forum,
            page,
            response,
        })
        .await
    }

    // =========================================================================
    // Threads
    // =========================================================================

    pub async fn create_thread(&self, forum: &str, thread: NewThread) -> Result<Thread> {
        self.writer.create_thread(forum.to_string(), thread).await
    }

    /// Fetches a thread by slug or numeric id.
    pub async fn get_thread(&self, slug_or_id: &str) -> Result<Thread> {
        let slug_or_id = slug_or_id.to_string();
        self.read(|response| ReadRequest::ResolveThread {
            slug_or_id,
            response,
        })
        .await
    }

    pub async fn update_thread(&self, slug_or_id: &str, update: ThreadUpdate) -> Result<Thread> {
        self.writer
            .update_thread(slug_or_id.to_string(), update)
            .await
    }

    /// Lists a forum's threads by creation time.
    pub async fn get_threads(&self, forum: &str, page: ThreadPage) -> Result<Vec<Thread>> {
        let forum = forum.to_string();
        self.read(|response| ReadRequest::GetThreads {
            forum,
            page,
            response,
        })
        .await
    }

    pub async fn vote(&self, slug_or_id: &str, vote: Vote) -> Result<Thread> {
        self.writer.vote(slug_or_id.to_string(), vote).await
    }

    // =========================================================================
    // Posts
    // =========================================================================

    /// Creates posts in a thread, all stamped with the current time.
    ///
    /// The forum's post count is buffered, not updated; see the module docs.
    pub async fn create_posts(&self, slug_or_id: &str, posts: Vec<NewPost>) -> Result<Vec<Post>> {
        self.writer
            .create_posts(slug_or_id.to_string(), posts, now())
            .await
    }

    /// Creates posts with an explicit shared creation time.
    pub async fn create_posts_at(
        &self,
        slug_or_id: &str,
        posts: Vec<NewPost>,
        created: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Post>> {
        self.writer
            .create_posts(slug_or_id.to_string(), posts, created)
            .await
    }

    /// Lists a page of a thread's posts by thread id.
    ///
    /// An unknown thread yields an empty page.
    pub async fn get_posts(&self, thread: ThreadId, page: PostPage) -> Result<Vec<Post>> {
        self.read(|response| ReadRequest::GetPosts {
            thread,
            page,
            response,
        })
        .await
    }

    /// Lists a page of a thread's posts, resolving the thread first so an
    /// unknown thread is `Error::ThreadNotFound`.
    pub async fn get_thread_posts(&self, slug_or_id: &str, page: PostPage) -> Result<Vec<Post>> {
        let thread = self.get_thread(slug_or_id).await?;
        self.get_posts(thread.id, page).await
    }

    pub async fn get_post(&self, id: PostId) -> Result<Post> {
        self.read(|response| ReadRequest::GetPost { id, response })
            .await
    }

    /// Fetches a post with related records. Flushes first when the forum is
    /// requested, so its post count is exact.
    pub async fn get_post_details(&self, id: PostId, related: Vec<Related>) -> Result<PostDetails> {
        if related.contains(&Related::Forum) {
            self.flush_if_dirty().await?;
        }
        self.read(|response| ReadRequest::GetPostDetails {
            id,
            related,
            response,
        })
        .await
    }

    pub async fn update_post(&self, id: PostId, update: PostUpdate) -> Result<Post> {
        self.writer.update_post(id, update).await
    }

    // =========================================================================
    // Service
    // =========================================================================

    /// Store-wide counts. Flushes pending post counts first.
    pub async fn status(&self) -> Result<Status> {
        self.flush_if_dirty().await?;
        self.read(|response| ReadRequest::Status { response }).await
    }

    /// Deletes all data and resets the post counter.
    pub async fn clear(&self) -> Result<()> {
        self.writer.clear().await
    }

    /// Stops the reader pool and the writer thread and waits for them.
    ///
    /// Requests queued before this call complete first. After shutdown every
    /// operation on any clone of this handle fails with `Error::Schema`.
    pub async fn shutdown(self) {
        for _ in 0..self.reader_count {
            let _ = self.read_tx.send(ReadRequest::Shutdown).await;
        }
        let handles = std::mem::take(&mut *self.reader_handles.lock().await);
        for handle in handles {
            let _ = handle.join();
        }

        self.writer.shutdown().await;
        if let Some(handle) = self.writer_thread.lock().await.take() {
            let _ = handle.join();
        }
        tracing::info!("forum database shut down");
    }
}

// =============================================================================
// Tests
// =============================================================================
