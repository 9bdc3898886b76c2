//! # Read Path
//!
//! Read operations run on a pool of reader threads, each owning one
//! read-only SQLite connection. With WAL, readers see the latest committed
//! state and never block the writer.
//!
//! ```text
//!   ForumDb ──► mpsc::Sender<ReadRequest> ──┬──► reader-0 (read-only conn)
//!                                           ├──► reader-1 (read-only conn)
//!                                           └──► reader-N (read-only conn)
//! ```
//!
//! The functions in this module are plain `&Connection` functions. The pool
//! loop at the bottom dispatches requests to them, and tests call them
//! directly.
//!
//! Reads never flush the forum post counter; that needs the write
//! connection. Callers that need exact forum counts flush first (see
//! [`crate::api::ForumDb::get_forum`]).

use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{Connection, OptionalExtension, Row};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::query::{self, post_columns, sql_limit, PostPage};
use crate::types::{
    timestamp_column, to_micros, Forum, Post, PostDetails, PostId, Related, Status, Thread,
    ThreadId, ThreadPage, User, UserPage,
};

// =============================================================================
// Request Types
// =============================================================================

/// A read request sent to the reader pool.
pub enum ReadRequest {
    /// List a page of a thread's posts.
    GetPosts {
        thread: ThreadId,
        page: PostPage,
        response: oneshot::Sender<Result<Vec<Post>>>,
    },
    /// Fetch one post.
    GetPost {
        id: PostId,
        response: oneshot::Sender<Result<Post>>,
    },
    /// Fetch a post with related records.
    GetPostDetails {
        id: PostId,
        related: Vec<Related>,
        response: oneshot::Sender<Result<PostDetails>>,
    },
    /// Fetch a user by nickname.
    GetUser {
        nickname: String,
        response: oneshot::Sender<Result<User>>,
    },
    /// Users holding a nickname or email.
    FindConflictingUsers {
        nickname: String,
        email: String,
        response: oneshot::Sender<Result<Vec<User>>>,
    },
    /// Fetch a forum by slug.
    GetForum {
        slug: String,
        response: oneshot::Sender<Result<Forum>>,
    },
    /// List a forum's members.
    GetForumUsers {
        forum: String,
        page: UserPage,
        response: oneshot::Sender<Result<Vec<User>>>,
    },
    /// Fetch a thread by slug or numeric id.
    ResolveThread {
        slug_or_id: String,
        response: oneshot::Sender<Result<Thread>>,
    },
    /// List a forum's threads.
    GetThreads {
        forum: String,
        page: ThreadPage,
        response: oneshot::Sender<Result<Vec<Thread>>>,
    },
    /// Row counts.
    Status {
        response: oneshot::Sender<Result<Status>>,
    },
    /// Stop one reader thread.
    Shutdown,
}

// =============================================================================
// Users
// =============================================================================

const USER_COLUMNS: &str = "nickname, fullname, email, about";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        nickname: row.get(0)?,
        fullname: row.get(1)?,
        email: row.get(2)?,
        about: row.get(3)?,
    })
}

/// Fetches a user by nickname (case-insensitive).
pub fn get_user(conn: &Connection, nickname: &str) -> Result<User> {
    conn.prepare_cached(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE nickname = ?1"
    ))?
    .query_row([nickname], user_from_row)
    .optional()?
    .ok_or_else(|| Error::UserNotFound(nickname.to_string()))
}

/// Users that share the nickname or the email, for reporting a create conflict.
pub fn find_conflicting_users(conn: &Connection, nickname: &str, email: &str) -> Result<Vec<User>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE nickname = ?1 OR email = ?2 ORDER BY nickname"
    ))?;
    let users = stmt
        .query_map([nickname, email], user_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

const FORUM_USERS_ASC: &str = "SELECT u.nickname, u.fullname, u.email, u.about
     FROM forum_users fu JOIN users u ON u.nickname = fu.nickname
     WHERE fu.forum = ?1 AND (?2 IS NULL OR fu.nickname > ?2)
     ORDER BY fu.nickname
     LIMIT ?3";

const FORUM_USERS_DESC: &str = "SELECT u.nickname, u.fullname, u.email, u.about
     FROM forum_users fu JOIN users u ON u.nickname = fu.nickname
     WHERE fu.forum = ?1 AND (?2 IS NULL OR fu.nickname < ?2)
     ORDER BY fu.nickname DESC
     LIMIT ?3";

/// Lists users who created a thread or post in `forum`, ordered by nickname.
///
/// An empty page is checked against the forum table so that an unknown forum
/// reports `ForumNotFound` rather than "no members".
pub fn get_forum_users(conn: &Connection, forum: &str, page: &UserPage) -> Result<Vec<User>> {
    let sql = if page.desc { FORUM_USERS_DESC } else { FORUM_USERS_ASC };
    let users = conn
        .prepare_cached(sql)?
        .query_map(
            rusqlite::params![forum, page.since, sql_limit(page.limit)],
            user_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if users.is_empty() && !forum_exists(conn, forum)? {
        return Err(Error::ForumNotFound(forum.to_string()));
    }
    Ok(users)
}

// =============================================================================
// Forums
// =============================================================================

pub(crate) fn forum_exists(conn: &Connection, slug: &str) -> Result<bool> {
    Ok(conn
        .prepare_cached("SELECT EXISTS (SELECT 1 FROM forums WHERE slug = ?1)")?
        .query_row([slug], |row| row.get(0))?)
}

/// Fetches a forum. `posts` is the durable count as of the last flush.
pub fn get_forum(conn: &Connection, slug: &str) -> Result<Forum> {
    conn.prepare_cached(
        "SELECT f.slug, f.title, f.owner,
                (SELECT COUNT(*) FROM threads t WHERE t.forum = f.slug),
                f.posts
         FROM forums f WHERE f.slug = ?1",
    )?
    .query_row([slug], |row| {
        Ok(Forum {
            slug: row.get(0)?,
            title: row.get(1)?,
            user: row.get(2)?,
            threads: row.get(3)?,
            posts: row.get(4)?,
        })
    })
    .optional()?
    .ok_or_else(|| Error::ForumNotFound(slug.to_string()))
}

// =============================================================================
// Threads
// =============================================================================

const THREAD_COLUMNS: &str = "id, slug, forum, author, title, message, created_us, votes";

pub(crate) fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        slug: row.get(1)?,
        forum: row.get(2)?,
        author: row.get(3)?,
        title: row.get(4)?,
        message: row.get(5)?,
        created: timestamp_column(row, 6)?,
        votes: row.get(7)?,
    })
}

pub fn get_thread_by_id(conn: &Connection, id: ThreadId) -> Result<Thread> {
    conn.prepare_cached(&format!(
        "SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"
    ))?
    .query_row([id], thread_from_row)
    .optional()?
    .ok_or_else(|| Error::ThreadNotFound(id.to_string()))
}

pub fn get_thread_by_slug(conn: &Connection, slug: &str) -> Result<Thread> {
    conn.prepare_cached(&format!(
        "SELECT {THREAD_COLUMNS} FROM threads WHERE slug = ?1"
    ))?
    .query_row([slug], thread_from_row)
    .optional()?
    .ok_or_else(|| Error::ThreadNotFound(slug.to_string()))
}

/// Fetches a thread named by a numeric id or by slug.
///
/// Text that parses as an integer is an id; anything else is a slug.
pub fn resolve_thread(conn: &Connection, slug_or_id: &str) -> Result<Thread> {
    match slug_or_id.parse::<i64>() {
        Ok(id) => get_thread_by_id(conn, ThreadId::from_raw(id)),
        Err(_) => get_thread_by_slug(conn, slug_or_id),
    }
}

/// Returns the forum slug a thread belongs to.
pub fn get_thread_forum(conn: &Connection, thread: ThreadId) -> Result<String> {
    conn.prepare_cached("SELECT forum FROM threads WHERE id = ?1")?
        .query_row([thread], |row| row.get(0))
        .optional()?
        .ok_or_else(|| Error::ThreadNotFound(thread.to_string()))
}

const THREADS_ASC: &str = "SELECT id, slug, forum, author, title, message, created_us, votes
     FROM threads
     WHERE forum = ?1 AND (?2 IS NULL OR created_us >= ?2)
     ORDER BY created_us, id
     LIMIT ?3";

const THREADS_DESC: &str = "SELECT id, slug, forum, author, title, message, created_us, votes
     FROM threads
     WHERE forum = ?1 AND (?2 IS NULL OR created_us <= ?2)
     ORDER BY created_us DESC, id DESC
     LIMIT ?3";

/// Lists a forum's threads by creation time. The `since` bound is inclusive.
///
/// An empty page falls back to a forum existence check.
pub fn get_threads(conn: &Connection, forum: &str, page: &ThreadPage) -> Result<Vec<Thread>> {
    let sql = if page.desc { THREADS_DESC } else { THREADS_ASC };
    let since = page.since.as_ref().map(to_micros);
    let threads = conn
        .prepare_cached(sql)?
        .query_map(
            rusqlite::params![forum, since, sql_limit(page.limit)],
            thread_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if threads.is_empty() && !forum_exists(conn, forum)? {
        return Err(Error::ForumNotFound(forum.to_string()));
    }
    Ok(threads)
}

// =============================================================================
// Posts
// =============================================================================

/// Fetches one post.
pub fn get_post(conn: &Connection, id: PostId) -> Result<Post> {
    conn.prepare_cached(concat!(
        "SELECT ",
        post_columns!(),
        " FROM posts p WHERE p.id = ?1"
    ))?
    .query_row([id], query::post_from_row)
    .optional()?
    .ok_or(Error::PostNotFound(id.as_raw()))
}

/// Fetches a post and the related records asked for.
pub fn get_post_details(conn: &Connection, id: PostId, related: &[Related]) -> Result<PostDetails> {
    let post = get_post(conn, id)?;

    let author = match related.contains(&Related::User) {
        true => Some(get_user(conn, &post.author)?),
        false => None,
    };
    let forum = match related.contains(&Related::Forum) {
        true => Some(get_forum(conn, &post.forum)?),
        false => None,
    };
    let thread = match related.contains(&Related::Thread) {
        true => Some(get_thread_by_id(conn, post.thread)?),
        false => None,
    };

    Ok(PostDetails {
        post,
        author,
        forum,
        thread,
    })
}

// =============================================================================
// Service
// =============================================================================

/// Store-wide counts. `post` is the sum of the forums' durable post counts.
pub fn status(conn: &Connection) -> Result<Status> {
    Ok(conn.query_row(
        "SELECT (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM forums),
                (SELECT COUNT(*) FROM threads),
                (SELECT COALESCE(SUM(posts), 0) FROM forums)",
        [],
        |row| {
            Ok(Status {
                user: row.get(0)?,
                forum: row.get(1)?,
                thread: row.get(2)?,
                post: row.get(3)?,
            })
        },
    )?)
}

// =============================================================================
// Reader Pool Loop
// =============================================================================

/// Serves read requests until shutdown or until every sender is gone.
///
/// Reader threads share one receiver. Whichever thread holds the lock waits
/// for the next request, then releases the lock before running it, so
/// several requests execute in parallel.
pub fn run_reader_pooled(conn: Connection, rx: Arc<Mutex<mpsc::Receiver<ReadRequest>>>) {
    loop {
        let request = {
            let mut guard = rx.lock().unwrap_or_else(PoisonError::into_inner);
            guard.blocking_recv()
        };

        match request {
            Some(ReadRequest::GetPosts {
                thread,
                page,
                response,
            }) => {
                let _ = response.send(query::get_posts(&conn, thread, &page));
            }
            Some(ReadRequest::GetPost { id, response }) => {
                let _ = response.send(get_post(&conn, id));
            }
            Some(ReadRequest::GetPostDetails {
                id,
                related,
                response,
            }) => {
                let _ = response.send(get_post_details(&conn, id, &related));
            }
            Some(ReadRequest::GetUser {
                nickname,
                response,
            }) => {
                let _ = response.send(get_user(&conn, &nickname));
            }
            Some(ReadRequest::FindConflictingUsers {
                nickname,
                email,
                response,
            }) => {
                let _ = response.send(find_conflicting_users(&conn, &nickname, &email));
            }
            Some(ReadRequest::GetForum {
                slug,
                response,
            }) => {
                let _ = response.send(get_forum(&conn, &slug));
            }
            Some(ReadRequest::GetForumUsers {
                forum,
                page,
                response,
            }) => {
                let _ = response.send(get_forum_users(&conn, &forum, &page));
            }
            Some(ReadRequest::ResolveThread {
                slug_or_id,
                response,
            }) => {
                let _ = response.send(resolve_thread(&conn, &slug_or_id));
            }
            Some(ReadRequest::GetThreads {
                forum,
                page,
                response,
            }) => {
                let _ = response.send(get_threads(&conn, &forum, &page));
            }
            Some(ReadRequest::Status { response }) => {
                let _ = response.send(status(&conn));
            }
            Some(ReadRequest::Shutdown) | None => break,
        }
    }
    tracing::debug!("reader stopped");
}

// =============================================================================
// Tests
// =============================================================================
