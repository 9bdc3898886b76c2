//! # Write Path
//!
//! All writes go through one dedicated thread that owns the only read-write
//! SQLite connection. SQLite allows one writer at a time anyway; making that
//! explicit removes `SQLITE_BUSY` retries from the write path and makes the
//! packet insert's id range contiguous.
//!
//! ```text
//!   ForumDb ──► ForumWriterHandle ──► mpsc ──► forumdb-writer thread
//!                  (async, Clone)                 │
//!                                                 ├─ create_posts ─► packet::create_posts
//!                                                 │                  counter.buffer_post_count
//!                                                 │                  forum_users
//!                                                 ├─ flush_counts ─► counter.flush_if_dirty
//!                                                 └─ ... other writes
//! ```
//!
//! ## Atomicity
//!
//! Each write operation runs inside its own savepoint ([`with_savepoint`]).
//! When it fails, everything it wrote is rolled back, including the forum
//! post-count delta buffered for a post batch.
//!
//! The operations are plain `&Connection` functions so tests can run them
//! without the thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::{mpsc, oneshot};

use crate::counter::ForumPostCounter;
use crate::error::{is_unique_violation, Error, Result};
use crate::packet::{self, DEFAULT_PACKET_SIZE};
use crate::reader;
use crate::schema::DATA_TABLES;
use crate::types::{
    normalize_timestamp, now, provided, to_micros, Forum, NewForum, NewPost, NewThread, Post,
    PostId, PostUpdate, Thread, ThreadId, ThreadUpdate, User, UserUpdate, Vote,
};

/// Size of the write request channel.
const WRITE_CHANNEL_SIZE: usize = 1024;

// =============================================================================
// Writer Configuration
// =============================================================================

/// Configuration for the writer thread.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Posts per multi-row insert statement.
    pub packet_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

// =============================================================================
// Savepoints
// =============================================================================

/// Runs `f` inside a savepoint, releasing it on success and rolling it back
/// on error.
///
/// Works both as a top-level transaction and nested inside one.
pub fn with_savepoint<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch("SAVEPOINT write_op")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("RELEASE write_op")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK TO write_op; RELEASE write_op") {
                tracing::error!(error = %rollback, "failed to roll back write");
            }
            Err(e)
        }
    }
}

// =============================================================================
// Users
// =============================================================================

/// Creates a user.
///
/// # Errors
///
/// `Error::UserExists` if the nickname or email is taken. Use
/// [`reader::find_conflicting_users`] to report which users collide.
pub fn create_user(conn: &Connection, user: &User) -> Result<User> {
    conn.prepare_cached(
        "INSERT INTO users (nickname, fullname, email, about) VALUES (?1, ?2, ?3, ?4)",
    )?
    .execute([&user.nickname, &user.fullname, &user.email, &user.about])
    .map_err(|e| {
        if is_unique_violation(&e) {
            Error::UserExists(user.nickname.clone())
        } else {
            Error::Sqlite(e)
        }
    })?;
    Ok(user.clone())
}

/// Applies a partial profile update and returns the stored user.
pub fn update_user(conn: &Connection, nickname: &str, update: &UserUpdate) -> Result<User> {
    if update.is_empty() {
        return reader::get_user(conn, nickname);
    }

    let changed = conn
        .prepare_cached(
            "UPDATE users SET fullname = coalesce(?2, fullname),
                              email = coalesce(?3, email),
                              about = coalesce(?4, about)
             WHERE nickname = ?1",
        )?
        .execute(rusqlite::params![
            nickname,
            provided(&update.fullname),
            provided(&update.email),
            provided(&update.about),
        ])
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::UserConflict(nickname.to_string())
            } else {
                Error::Sqlite(e)
            }
        })?;

    if changed == 0 {
        return Err(Error::UserNotFound(nickname.to_string()));
    }
    reader::get_user(conn, nickname)
}

/// Returns the stored spelling of a nickname.
fn canonical_nickname(conn: &Connection, nickname: &str) -> Result<String> {
    conn.prepare_cached("SELECT nickname FROM users WHERE nickname = ?1")?
        .query_row([nickname], |row| row.get(0))
        .optional()?
        .ok_or_else(|| Error::UserNotFound(nickname.to_string()))
}

// =============================================================================
// Forums
// =============================================================================

/// Creates a forum and its pending post-count row.
///
/// # Errors
///
/// - `Error::UserNotFound` if the owner does not exist
/// - `Error::ForumExists` if the slug is taken
pub fn create_forum(conn: &Connection, forum: &NewForum) -> Result<Forum> {
    with_savepoint(conn, |conn| {
        let owner = canonical_nickname(conn, &forum.user)?;

        conn.prepare_cached(
            "INSERT INTO forums (slug, title, owner) VALUES (?1, ?2, ?3)",
        )?
        .execute([&forum.slug, &forum.title, &owner])
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::ForumExists(forum.slug.clone())
            } else {
                Error::Sqlite(e)
            }
        })?;
        conn.prepare_cached(
            "INSERT INTO forum_pending_posts (forum, posts) VALUES (?1, 0)",
        )?
        .execute([&forum.slug])?;

        tracing::info!(forum = %forum.slug, owner = %owner, "created forum");
        reader::get_forum(conn, &forum.slug)
    })
}

/// Records users as members of a forum. Existing memberships are kept.
fn add_forum_members<'a>(
    conn: &Connection,
    forum: &str,
    nicknames: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO forum_users (forum, nickname) VALUES (?1, ?2)",
    )?;
    for nickname in nicknames {
        stmt.execute([forum, nickname])?;
    }
    Ok(())
}

// =============================================================================
// Threads
// =============================================================================

/// Creates a thread in `forum` and records its author as a forum member.
///
/// An empty slug is stored as no slug. A missing `created` is stamped with
/// the current time.
///
/// # Errors
///
/// - `Error::ForumNotFound`, `Error::UserNotFound`
/// - `Error::ThreadExists` if the slug is taken
pub fn create_thread(conn: &Connection, forum: &str, thread: &NewThread) -> Result<Thread> {
    with_savepoint(conn, |conn| {
        let forum_slug = reader::get_forum(conn, forum)?.slug;
        let author = canonical_nickname(conn, &thread.author)?;
        let slug = thread.slug.as_deref().filter(|s| !s.is_empty());
        let created = thread.created.map(normalize_timestamp).unwrap_or_else(now);

        conn.prepare_cached(
            "INSERT INTO threads (slug, forum, author, title, message, created_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?
        .execute(rusqlite::params![
            slug,
            forum_slug,
            author,
            thread.title,
            thread.message,
            to_micros(&created)
        ])
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::ThreadExists(slug.unwrap_or_default().to_string())
            } else {
                Error::Sqlite(e)
            }
        })?;
        let id = ThreadId::from_raw(conn.last_insert_rowid());

        add_forum_members(conn, &forum_slug, [author.as_str()])?;
        reader::get_thread_by_id(conn, id)
    })
}

/// Applies a partial title/message update to a thread.
pub fn update_thread(
    conn: &Connection,
    slug_or_id: &str,
    update: &ThreadUpdate,
) -> Result<Thread> {
    let thread = reader::resolve_thread(conn, slug_or_id)?;
    let (title, message) = (provided(&update.title), provided(&update.message));
    if title.is_none() && message.is_none() {
        return Ok(thread);
    }

    conn.prepare_cached(
        "UPDATE threads SET title = coalesce(?2, title), message = coalesce(?3, message)
         WHERE id = ?1",
    )?
    .execute(rusqlite::params![thread.id, title, message])?;
    reader::get_thread_by_id(conn, thread.id)
}

/// Records or changes a user's vote. Returns the thread with its new total.
pub fn vote(conn: &Connection, slug_or_id: &str, vote: &Vote) -> Result<Thread> {
    let thread = reader::resolve_thread(conn, slug_or_id)?;
    let nickname = canonical_nickname(conn, &vote.nickname)?;

    conn.prepare_cached(
        "INSERT INTO votes (thread, nickname, voice) VALUES (?1, ?2, ?3)
         ON CONFLICT(thread, nickname) DO UPDATE SET voice = excluded.voice",
    )?
    .execute(rusqlite::params![thread.id, nickname, vote.voice])?;
    reader::get_thread_by_id(conn, thread.id)
}

// =============================================================================
// Posts
// =============================================================================

/// Creates a batch of posts in a thread named by slug or id.
///
/// The thread is resolved first, so an unknown thread is reported even for
/// an empty batch. An empty batch then returns without writing. Otherwise,
/// in one savepoint: the posts are inserted in packets, the forum's pending
/// post count grows by the batch size, and the authors become forum members.
pub fn create_posts(
    conn: &Connection,
    counter: &ForumPostCounter,
    slug_or_id: &str,
    posts: &[NewPost],
    created: DateTime<Utc>,
    packet_size: usize,
) -> Result<Vec<Post>> {
    let thread = reader::resolve_thread(conn, slug_or_id)?;
    if posts.is_empty() {
        return Ok(Vec::new());
    }

    with_savepoint(conn, |conn| {
        let created_posts =
            packet::create_posts(conn, thread.id, &thread.forum, posts, created, packet_size)?;
        let delta = i64::try_from(created_posts.len())
            .map_err(|_| Error::Schema("post batch too large".to_string()))?;
        counter.buffer_post_count(conn, &thread.forum, delta)?;
        add_forum_members(conn, &thread.forum, posts.iter().map(|p| p.author.as_str()))?;
        Ok(created_posts)
    })
}

/// Edits a post's message and/or moves it under another parent.
///
/// `is_edited` is set only when the message actually changes. Moving a post
/// rewrites the path and root of its whole subtree.
///
/// # Errors
///
/// - `Error::PostNotFound` if the post does not exist
/// - `Error::ParentNotFound` if the new parent is missing or in another thread
/// - `Error::InvalidParent` if the new parent is the post or one of its descendants
pub fn update_post(conn: &Connection, id: PostId, update: &PostUpdate) -> Result<Post> {
    with_savepoint(conn, |conn| {
        let post = reader::get_post(conn, id)?;

        if let Some(message) = provided(&update.message).filter(|m| *m != post.message) {
            conn.prepare_cached("UPDATE posts SET message = ?2, is_edited = 1 WHERE id = ?1")?
                .execute(rusqlite::params![id, message])?;
        }

        if let Some(new_parent) = update.parent.filter(|p| Some(*p) != post.parent) {
            move_subtree(conn, &post, new_parent)?;
        }

        reader::get_post(conn, id)
    })
}

/// Re-roots `post` and its descendants under `new_parent`.
fn move_subtree(conn: &Connection, post: &Post, new_parent: PostId) -> Result<()> {
    let parent = match reader::get_post(conn, new_parent) {
        Ok(parent) if parent.thread == post.thread => parent,
        Ok(_) | Err(Error::PostNotFound(_)) => return Err(Error::ParentNotFound),
        Err(e) => return Err(e),
    };
    if parent.id == post.id || post.path.is_ancestor_of(&parent.path) {
        return Err(Error::InvalidParent {
            post: post.id.as_raw(),
            parent: new_parent.as_raw(),
        });
    }

    let old_prefix = post.path.encode();
    let new_path = parent.path.child(post.id);
    let new_root = new_path.root_id().unwrap_or(post.id);

    conn.prepare_cached("UPDATE posts SET parent = ?2 WHERE id = ?1")?
        .execute(rusqlite::params![post.id, parent.id])?;
    let moved = conn
        .prepare_cached(
            "UPDATE posts SET path = ?3 || substr(path, ?4), root = ?5
             WHERE thread = ?1 AND substr(path, 1, length(?2)) = ?2",
        )?
        .execute(rusqlite::params![
            post.thread,
            old_prefix,
            new_path.encode(),
            i64::try_from(old_prefix.len() + 1).unwrap_or(i64::MAX),
            new_root
        ])?;

    tracing::debug!(
        post = %post.id,
        from = %post.path,
        to = %new_path,
        moved,
        "moved reply subtree"
    );
    Ok(())
}

// =============================================================================
// Service
// =============================================================================

/// Deletes every row and restarts id sequences.
pub fn clear(conn: &Connection) -> Result<()> {
    with_savepoint(conn, |conn| {
        for table in DATA_TABLES {
            conn.execute(&format!("DELETE FROM {table}"), [])?;
        }
        conn.execute("DELETE FROM sqlite_sequence", [])?;
        Ok(())
    })
}

// =============================================================================
// Request Types
// =============================================================================

/// A write request sent to the writer thread.
pub enum WriteRequest {
    CreateUser {
        user: User,
        response: oneshot::Sender<Result<User>>,
    },
    UpdateUser {
        nickname: String,
        update: UserUpdate,
        response: oneshot::Sender<Result<User>>,
    },
    CreateForum {
        forum: NewForum,
        response: oneshot::Sender<Result<Forum>>,
    },
    CreateThread {
        forum: String,
        thread: NewThread,
        response: oneshot::Sender<Result<Thread>>,
    },
    UpdateThread {
        slug_or_id: String,
        update: ThreadUpdate,
        response: oneshot::Sender<Result<Thread>>,
    },
    Vote {
        slug_or_id: String,
        vote: Vote,
        response: oneshot::Sender<Result<Thread>>,
    },
    CreatePosts {
        slug_or_id: String,
        posts: Vec<NewPost>,
        created: DateTime<Utc>,
        response: oneshot::Sender<Result<Vec<Post>>>,
    },
    UpdatePost {
        id: PostId,
        update: PostUpdate,
        response: oneshot::Sender<Result<Post>>,
    },
    /// Fold pending forum post counts into the forums.
    FlushCounts {
        response: oneshot::Sender<Result<bool>>,
    },
    Clear {
        response: oneshot::Sender<Result<()>>,
    },
    /// Stop the writer thread.
    Shutdown,
}

// =============================================================================
// ForumWriter
// =============================================================================

/// Owns the read-write connection and executes write requests.
pub struct ForumWriter {
    conn: Connection,
    counter: Arc<ForumPostCounter>,
    config: WriterConfig,
}

impl ForumWriter {
    pub fn new(
        conn: Connection,
        counter: Arc<ForumPostCounter>,
        config: WriterConfig,
    ) -> Self {
        Self {
            conn,
            counter,
            config,
        }
    }

    /// Executes one request and sends its result. Returns false on shutdown.
    fn handle(&self, request: WriteRequest) -> bool {
        let conn = &self.conn;
        match request {
            WriteRequest::CreateUser { user, response } => {
                let _ = response.send(create_user(conn, &user));
            }
            WriteRequest::UpdateUser {
                nickname,
                update,
                response,
            } => {
                let _ = response.send(update_user(conn, &nickname, &update));
            }
            WriteRequest::CreateForum { forum, response } => {
                let _ = response.send(create_forum(conn, &forum));
            }
            WriteRequest::CreateThread {
                forum,
                thread,
                response,
            } => {
                let _ = response.send(create_thread(conn, &forum, &thread));
            }
            WriteRequest::UpdateThread {
                slug_or_id,
                update,
                response,
            } => {
                let _ = response.send(update_thread(conn, &slug_or_id, &update));
            }
            WriteRequest::Vote {
                slug_or_id,
                vote: v,
                response,
            } => {
                let _ = response.send(vote(conn, &slug_or_id, &v));
            }
            WriteRequest::CreatePosts {
                slug_or_id,
                posts,
                created,
                response,
            } => {
                let result = create_posts(
                    conn,
                    &self.counter,
                    &slug_or_id,
                    &posts,
                    created,
                    self.config.packet_size,
                );
                if let Err(e) = &result {
                    tracing::debug!(
                        thread = %slug_or_id,
                        posts = posts.len(),
                        error = %e,
                        "post batch rejected"
                    );
                }
                let _ = response.send(result);
            }
            WriteRequest::UpdatePost {
                id,
                update,
                response,
            } => {
                let _ = response.send(update_post(conn, id, &update));
            }
            WriteRequest::FlushCounts { response } => {
                let _ = response.send(self.counter.flush_if_dirty(conn));
            }
            WriteRequest::Clear { response } => {
                let result = clear(conn);
                if result.is_ok() {
                    self.counter.reset();
                    tracing::info!("cleared all data");
                }
                let _ = response.send(result);
            }
            WriteRequest::Shutdown => return false,
        }
        true
    }
}

/// Serves write requests until shutdown or until every handle is dropped.
pub fn run_writer(writer: ForumWriter, mut rx: mpsc::Receiver<WriteRequest>) {
    while let Some(request) = rx.blocking_recv() {
        if !writer.handle(request) {
            break;
        }
    }
    tracing::debug!("writer stopped");
}

/// Spawns the writer on a dedicated thread.
///
/// Returns a handle for submitting requests and the thread's join handle.
pub fn spawn_writer(
    conn: Connection,
    counter: Arc<ForumPostCounter>,
    config: WriterConfig,
) -> Result<(ForumWriterHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(WRITE_CHANNEL_SIZE);
    let writer = ForumWriter::new(conn, counter, config);

    let thread = std::thread::Builder::new()
        .name("forumdb-writer".to_string())
        .spawn(move || run_writer(writer, rx))
        .map_err(|e| {
            Error::Schema(format!("failed to spawn writer thread: {}", e))
        })?;

    Ok((ForumWriterHandle { tx }, thread))
}

// =============================================================================
// Writer Handle
// =============================================================================

/// Async handle to the writer thread.
#[derive(Clone)]
pub struct ForumWriterHandle {
    tx: mpsc::Sender<WriteRequest>,
}

impl ForumWriterHandle {
    /// Sends a request built around a fresh response channel and awaits the reply.
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> WriteRequest,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(make(response_tx))
            .await
            .map_err(|_| Error::Schema("writer has shut down".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Schema("writer dropped response".to_string()))?
    }

    pub async fn create_user(&self, user: User) -> Result<User> {
        self.request(|response| WriteRequest::CreateUser { user, response })
            .await
    }

    pub async fn update_user(&self, nickname: String, update: UserUpdate) -> Result<User> {
        self.request(|response| WriteRequest::UpdateUser {
            nickname,
            update,
            response,
        })
        .await
    }

    pub async fn create_forum(&self, forum: NewForum) -> Result<Forum> {
        self.request(|response| WriteRequest::CreateForum { forum, response })
            .await
    }

    pub async fn create_thread(&self, forum: String, thread: NewThread) -> Result<Thread> {
        self.request(|response| WriteRequest::CreateThread {
            forum,
            thread,
            response,
        })
        .await
    }

    pub async fn update_thread(&self, slug_or_id: String, update: ThreadUpdate) -> Result<Thread> {
        self.request(|response| WriteRequest::UpdateThread {
            slug_or_id,
            update,
            response,
        })
        .await
    }

    pub async fn vote(&self, slug_or_id: String, vote: Vote) -> Result<Thread> {
        self.request(|response| WriteRequest::Vote {
            slug_or_id,
            vote,
            response,
        })
        .await
    }

    pub async fn create_posts(
        &self,
        slug_or_id: String,
        posts: Vec<NewPost>,
        created: DateTime<Utc>,
    ) -> Result<Vec<Post>> {
        self.request(|response| WriteRequest::CreatePosts {
            slug_or_id,
            posts,
            created,
            response,
        })
        .await
    }

    pub async fn update_post(&self, id: PostId, update: PostUpdate) -> Result<Post> {
        self.request(|response| WriteRequest::UpdatePost {
            id,
            update,
            response,
        })
        .await
    }

    pub async fn flush_counts(&self) -> Result<bool> {
        self.request(|response| WriteRequest::FlushCounts { response })
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.request(|response| WriteRequest::Clear { response })
            .await
    }

    /// Asks the writer thread to stop after the requests queued before this one.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(WriteRequest::Shutdown).await;
    }

    /// True once the writer thread has stopped receiving.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Database;

    fn user(nickname: &str) -> User {
        User {
            nickname: nickname.to_string(),
            fullname: nickname.to_uppercase(),
            email: format!("{nickname}@example.com"),
            about: String::new(),
        }
    }

    fn new_thread(slug: Option<&str>, author: &str) -> NewThread {
        NewThread {
            slug: slug.map(str::to_string),
            title: "title".into(),
            author: author.into(),
            message: "message".into(),
            created: None,
        }
    }

    fn forum(slug: &str, owner: &str) -> NewForum {
        NewForum {
            slug: slug.into(),
            title: slug.to_uppercase(),
            user: owner.into(),
        }
    }

    fn voice(nickname: &str, voice: i32) -> Vote {
        Vote {
            nickname: nickname.into(),
            voice,
        }
    }

    fn message(text: &str) -> PostUpdate {
        PostUpdate {
            message: Some(text.into()),
            parent: None,
        }
    }

    fn reparent(parent: i64) -> PostUpdate {
        PostUpdate {
            message: None,
            parent: Some(PostId::from_raw(parent)),
        }
    }

    /// Users alice and bob, forum `f` owned by alice, thread 1 by alice.
    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        create_user(conn, &user("alice")).unwrap();
        create_user(conn, &user("bob")).unwrap();
        create_forum(conn, &forum("f", "ALICE")).unwrap();
        create_thread(conn, "f", &new_thread(Some("t"), "alice")).unwrap();
        db
    }

    #[test]
    fn test_user_conflicts() {
        let db = seeded();
        let conn = db.connection();

        let mut dup = user("ALICE");
        dup.email = "other@example.com".into();
        assert!(matches!(create_user(conn, &dup), Err(Error::UserExists(_))));

        let update = UserUpdate {
            email: Some("BOB@example.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            update_user(conn, "alice", &update),
            Err(Error::UserConflict(_))
        ));

        let update = UserUpdate {
            about: Some("hi".into()),
            ..Default::default()
        };
        let alice = update_user(conn, "Alice", &update).unwrap();
        assert_eq!(alice.about, "hi");
        assert_eq!(alice.fullname, "ALICE");
        assert!(matches!(
            update_user(conn, "zed", &update),
            Err(Error::UserNotFound(_))
        ));

        let blank = UserUpdate {
            about: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(update_user(conn, "alice", &blank).unwrap().about, "hi");
    }

    #[test]
    fn test_forum_creation() {
        let db = seeded();
        let conn = db.connection();

        let existing = reader::get_forum(conn, "f").unwrap();
        assert_eq!(existing.user, "alice");

        let again = create_forum(conn, &forum("F", "bob"));
        assert!(matches!(again, Err(Error::ForumExists(_))));

        let orphan = create_forum(conn, &forum("g", "zed"));
        assert!(matches!(orphan, Err(Error::UserNotFound(_))));
    }

    #[test]
    fn test_thread_creation() {
        let db = seeded();
        let conn = db.connection();

        let dup = create_thread(conn, "f", &new_thread(Some("T"), "bob"));
        assert!(matches!(dup, Err(Error::ThreadExists(_))));
        assert!(matches!(
            create_thread(conn, "nope", &new_thread(None, "bob")),
            Err(Error::ForumNotFound(_))
        ));

        let untitled = create_thread(conn, "F", &new_thread(Some(""), "BOB")).unwrap();
        assert_eq!(untitled.slug, None);
        assert_eq!(untitled.forum, "f");
        assert_eq!(untitled.author, "bob");

        let members = reader::get_forum_users(conn, "f", &Default::default()).unwrap();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_votes_replace_previous_voice() {
        let db = seeded();
        let conn = db.connection();

        vote(conn, "t", &voice("alice", 1)).unwrap();
        vote(conn, "1", &voice("bob", 1)).unwrap();
        let thread = vote(conn, "t", &voice("BOB", -1)).unwrap();
        assert_eq!(thread.votes, 0);

        assert!(matches!(
            vote(conn, "t", &voice("zed", 1)),
            Err(Error::UserNotFound(_))
        ));
    }

    #[test]
    fn test_create_posts_buffers_forum_count() {
        let db = seeded();
        let conn = db.connection();
        let counter = ForumPostCounter::new();

        let posts = vec![NewPost::new("bob", "a"), NewPost::new("bob", "b")];
        let created = create_posts(conn, &counter, "t", &posts, now(), 30).unwrap();
        assert_eq!(created.len(), 2);
        assert!(counter.is_dirty());
        assert_eq!(reader::get_forum(conn, "f").unwrap().posts, 0);

        counter.flush_if_dirty(conn).unwrap();
        assert_eq!(reader::get_forum(conn, "f").unwrap().posts, 2);
    }

    #[test]
    fn test_empty_post_batch_still_checks_thread() {
        let db = seeded();
        let counter = ForumPostCounter::new();

        let created = create_posts(db.connection(), &counter, "t", &[], now(), 30).unwrap();
        assert!(created.is_empty());
        assert!(matches!(
            create_posts(db.connection(), &counter, "missing", &[], now(), 30),
            Err(Error::ThreadNotFound(_))
        ));
        assert!(!counter.is_dirty());
    }

    #[test]
    fn test_update_post_message() {
        let db = seeded();
        let conn = db.connection();
        let counter = ForumPostCounter::new();
        let posts = [NewPost::new("alice", "hello")];
        let created = create_posts(conn, &counter, "t", &posts, now(), 30).unwrap();
        let post = &created[0];

        let same = update_post(conn, post.id, &message("hello")).unwrap();
        assert!(!same.is_edited);
        let blank = update_post(conn, post.id, &message("")).unwrap();
        assert!(!blank.is_edited);
        assert_eq!(blank.message, "hello");

        let edit = message("bye");
        let edited = update_post(conn, post.id, &edit).unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.message, "bye");

        assert!(matches!(
            update_post(conn, PostId::from_raw(999), &edit),
            Err(Error::PostNotFound(999))
        ));
    }

    #[test]
    fn test_move_subtree() {
        let db = seeded();
        let conn = db.connection();
        let counter = ForumPostCounter::new();

        // 1 ── 2 ── 3      4
        let posts = vec![
            NewPost::new("alice", "1"),
            NewPost::new("alice", "2").reply_to(PostId::from_raw(1)),
            NewPost::new("alice", "3").reply_to(PostId::from_raw(2)),
            NewPost::new("alice", "4"),
        ];
        create_posts(conn, &counter, "t", &posts, now(), 30).unwrap();

        let second = PostId::from_raw(2);
        assert!(matches!(
            update_post(conn, second, &reparent(3)),
            Err(Error::InvalidParent { .. })
        ));
        assert!(matches!(
            update_post(conn, second, &reparent(99)),
            Err(Error::ParentNotFound)
        ));

        let moved = update_post(conn, second, &reparent(4)).unwrap();
        assert_eq!(moved.parent, Some(PostId::from_raw(4)));
        assert!(!moved.is_edited);

        let leaf = reader::get_post(conn, PostId::from_raw(3)).unwrap();
        let ids: Vec<i64> = leaf.path.ids().iter().map(|id| id.as_raw()).collect();
        assert_eq!(ids, vec![4, 2, 3]);
        assert_eq!(leaf.path.root_id(), Some(PostId::from_raw(4)));

        let root: i64 = conn
            .query_row("SELECT root FROM posts WHERE id = 3", [], |r| r.get(0))
            .unwrap();
        assert_eq!(root, 4);
    }

    #[test]
    fn test_clear_restarts_ids() {
        let db = seeded();
        let conn = db.connection();
        clear(conn).unwrap();

        assert_eq!(
            reader::status(conn).unwrap(),
            crate::types::Status::default()
        );
        create_user(conn, &user("carol")).unwrap();
        create_forum(conn, &forum("g", "carol")).unwrap();
        let thread = create_thread(conn, "g", &new_thread(None, "carol")).unwrap();
        assert_eq!(thread.id, ThreadId::from_raw(1));
    }

    #[test]
    fn test_failed_savepoint_leaves_nothing() {
        let db = seeded();
        let conn = db.connection();
        let result: Result<()> = with_savepoint(conn, |conn| {
            conn.execute(
                "INSERT INTO forum_users (forum, nickname) VALUES ('f', 'ghost')",
                [],
            )?;
            Err(Error::ParentNotFound)
        });
        assert!(result.is_err());

        let ghosts: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM forum_users WHERE nickname = 'ghost'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(ghosts, 0);
        assert!(conn.is_autocommit());
    }
}
