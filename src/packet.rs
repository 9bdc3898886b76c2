//! # Packetized Post Insert
//!
//! A single "create posts" request may carry thousands of posts. Inserting
//! them one row at a time costs one statement per post. Inserting them in one
//! statement makes that statement's parameter list, and the time the write
//! lock is held by a single step, grow with the request. This module splits
//! the request into fixed-size *packets* and inserts each packet with one
//! multi-row statement:
//!
//! ```text
//!   posts: [p0 p1 ... p29][p30 ... p59][p60 p61]      packet_size = 30
//!              │               │            │
//!              ▼               ▼            ▼
//!   INSERT INTO posts (...) VALUES (..),(..),...,(..) RETURNING id, forum, created_us
//! ```
//!
//! Every post of one call shares a single `created` timestamp, and ids come
//! out strictly increasing in input order.
//!
//! ## Failure Diagnosis
//!
//! A packet that violates a constraint inserts nothing. Store errors do not
//! say which precondition failed, so only on that path two existence checks
//! run to name the cause:
//!
//! | Check                          | Error                 |
//! |--------------------------------|-----------------------|
//! | thread does not exist          | `ThreadNotFound`      |
//! | some author does not exist     | `ThreadNotFound`      |
//! | otherwise (bad parent)         | `ParentNotFound`      |
//!
//! A missing author deliberately reports the same error as a missing thread.
//! The happy path never runs these checks.
//!
//! ## Atomicity
//!
//! One call is one savepoint. If any packet fails, the packets before it are
//! rolled back too, so a call either creates every post or none.
//!
//! ## Statement Text
//!
//! The statement is built from placeholders only. Values are always bound,
//! and [`rusqlite::Connection::prepare_cached`] keeps one prepared statement
//! per packet length.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ToSql};

use crate::error::{is_constraint_violation, Error, Result};
use crate::path::PostPath;
use crate::types::{
    normalize_timestamp, timestamp_column, to_micros, NewPost, Post, PostId, ThreadId,
};

// =============================================================================
// Configuration
// =============================================================================

/// Default number of posts per insert statement.
pub const DEFAULT_PACKET_SIZE: usize = 30;

/// Largest accepted packet. Six parameters per row must stay well under
/// SQLite's bound-parameter limit.
pub const MAX_PACKET_SIZE: usize = 1000;

/// Bound parameters per inserted row.
const COLUMNS_PER_ROW: usize = 6;

// =============================================================================
// Create Posts
// =============================================================================

/// Inserts `posts` into `thread` in packets of `packet_size`.
///
/// Returns the created posts in input order, each carrying its assigned id,
/// `created`, `forum` and materialized path. `is_edited` is false and
/// `thread` is `thread` for every returned post.
///
/// An empty `posts` returns an empty vector without touching the store.
/// Callers that need "thread not found" for an empty request must check
/// the thread themselves.
///
/// The forum's post counter is not touched here; that is the caller's job
/// (see [`crate::counter::ForumPostCounter::buffer_post_count`]).
///
/// # Errors
///
/// - `Error::ThreadNotFound` if the thread or any author does not exist
/// - `Error::ParentNotFound` if a parent is missing or in another thread
/// - `Error::Sqlite` for any other store failure
pub fn create_posts(
    conn: &Connection,
    thread: ThreadId,
    forum: &str,
    posts: &[NewPost],
    created: DateTime<Utc>,
    packet_size: usize,
) -> Result<Vec<Post>> {
    if posts.is_empty() {
        return Ok(Vec::new());
    }

    let created = normalize_timestamp(created);
    let packet_size = packet_size.clamp(1, MAX_PACKET_SIZE);

    conn.execute_batch("SAVEPOINT create_posts")?;

    let result = posts
        .chunks(packet_size)
        .try_fold(Vec::with_capacity(posts.len()), |mut out, packet| {
            out.extend(insert_packet(conn, thread, forum, packet, created)?);
            Ok::<_, Error>(out)
        });

    match result {
        Ok(created_posts) => {
            conn.execute_batch("RELEASE create_posts")?;
            tracing::debug!(
                thread = %thread,
                posts = created_posts.len(),
                packets = posts.len().div_ceil(packet_size),
                "created posts"
            );
            Ok(created_posts)
        }
        Err(e) => {
            // Undo earlier packets, then drop the savepoint itself.
            if let Err(rollback) =
                conn.execute_batch("ROLLBACK TO create_posts; RELEASE create_posts")
            {
                tracing::error!(error = %rollback, "failed to roll back post packets");
            }
            Err(e)
        }
    }
}

/// Inserts one packet with a single multi-row statement.
fn insert_packet(
    conn: &Connection,
    thread: ThreadId,
    forum: &str,
    packet: &[NewPost],
    created: DateTime<Utc>,
) -> Result<Vec<Post>> {
    let created_us = to_micros(&created);

    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(packet.len() * COLUMNS_PER_ROW);
    for post in packet {
        params.push(&post.author);
        params.push(&post.message);
        params.push(&post.parent);
        params.push(&thread);
        params.push(&created_us);
        params.push(&forum);
    }

    let mut stmt = conn.prepare_cached(&packet_insert_sql(packet.len()))?;
    let inserted = stmt
        .query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, PostId>(0)?,
                row.get::<_, String>(1)?,
                timestamp_column(row, 2)?,
            ))
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>());

    let inserted = match inserted {
        Ok(rows) if rows.len() == packet.len() => rows,
        Ok(rows) => {
            tracing::warn!(
                expected = packet.len(),
                got = rows.len(),
                "short packet insert"
            );
            return Err(diagnose_failed_packet(conn, thread, packet));
        }
        Err(e) if is_constraint_violation(&e) => {
            return Err(diagnose_failed_packet(conn, thread, packet));
        }
        Err(e) => return Err(e.into()),
    };

    let paths = packet_paths(conn, &inserted)?;

    inserted
        .into_iter()
        .zip(packet)
        .map(|((id, forum, created), new)| {
            let path = paths
                .get(&id)
                .cloned()
                .ok_or_else(|| {
                    Error::Schema(format!("post {id} has no materialized path"))
                })?;
            Ok(Post {
                id,
                author: new.author.clone(),
                message: new.message.clone(),
                thread,
                forum,
                parent: new.parent,
                created,
                is_edited: false,
                path,
            })
        })
        .collect()
}

/// Reads the paths the insert trigger materialized for a packet.
///
/// `RETURNING` reports rows as inserted, before AFTER triggers ran, so the
/// paths are read back by id range. Ids of one packet are contiguous because
/// the writer holds the write lock for the whole statement.
fn packet_paths(
    conn: &Connection,
    inserted: &[(PostId, String, DateTime<Utc>)],
) -> Result<HashMap<PostId, PostPath>> {
    let (Some(first), Some(last)) = (inserted.first(), inserted.last()) else {
        return Ok(HashMap::new());
    };

    let mut stmt = conn.prepare_cached("SELECT id, path FROM posts WHERE id BETWEEN ?1 AND ?2")?;
    let rows = stmt.query_map([first.0, last.0], |row| {
        Ok((row.get::<_, PostId>(0)?, row.get::<_, PostPath>(1)?))
    })?;

    let mut paths = HashMap::with_capacity(inserted.len());
    for row in rows {
        let (id, path) = row?;
        paths.insert(id, path);
    }
    Ok(paths)
}

/// Builds `INSERT ... VALUES (?, ...), ... RETURNING ...` for `rows` rows.
pub(crate) fn packet_insert_sql(rows: usize) -> String {
    const ROW: &str = "(?, ?, ?, ?, ?, ?)";

    let mut sql = String::with_capacity(128 + rows * (ROW.len() + 2));
    sql.push_str(
        "INSERT INTO posts (author, message, parent, thread, created_us, forum) VALUES ",
    );
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(ROW);
    }
    sql.push_str(" RETURNING id, forum, created_us");
    sql
}

// =============================================================================
// Failure Diagnosis
// =============================================================================

/// Names the precondition a failed packet violated.
///
/// If a diagnosis query itself fails, that store error is returned instead.
fn diagnose_failed_packet(conn: &Connection, thread: ThreadId, packet: &[NewPost]) -> Error {
    diagnose(conn, thread, packet).unwrap_or_else(|e| e)
}

fn diagnose(conn: &Connection, thread: ThreadId, packet: &[NewPost]) -> Result<Error> {
    let thread_exists: bool = conn
        .prepare_cached("SELECT EXISTS (SELECT 1 FROM threads WHERE id = ?1)")?
        .query_row([thread], |row| row.get(0))?;
    if !thread_exists {
        return Ok(Error::ThreadNotFound(thread.to_string()));
    }

    let mut author_exists =
        conn.prepare_cached("SELECT EXISTS (SELECT 1 FROM users WHERE nickname = ?1)")?;
    let mut checked = HashSet::new();
    for post in packet {
        if !checked.insert(post.author.to_lowercase()) {
            continue;
        }
        let exists: bool = author_exists.query_row([&post.author], |row| row.get(0))?;
        if !exists {
            // Reported as a missing thread; keep the real cause in the logs.
            tracing::debug!(
                thread = %thread,
                author = %post.author,
                "post author does not exist"
            );
            return Ok(Error::ThreadNotFound(thread.to_string()));
        }
    }

    Ok(Error::ParentNotFound)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Database;

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.connection()
            .execute_batch(
                "INSERT INTO users (nickname, fullname, email) VALUES ('a', 'A', 'a@x');
                 INSERT INTO forums (slug, title, owner) VALUES ('f', 'F', 'a');
                 INSERT INTO threads (forum, author, title, message, created_us) VALUES
                    ('f', 'a', 't', 'm', 0);",
            )
            .unwrap();
        db
    }

    fn post_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM posts", [], |r| r.get(0))
            .unwrap()
    }

    fn insert(conn: &Connection, posts: &[NewPost], packet_size: usize) -> Result<Vec<Post>> {
        create_posts(
            conn,
            ThreadId::from_raw(1),
            "f",
            posts,
            Utc::now(),
            packet_size,
        )
    }

    #[test]
    fn test_insert_sql_shape() {
        let sql = packet_insert_sql(2);
        assert_eq!(sql.matches('?').count(), 12);
        assert!(sql.ends_with("RETURNING id, forum, created_us"));
        assert!(sql.contains("(?, ?, ?, ?, ?, ?), (?, ?, ?, ?, ?, ?)"));
    }

    #[test]
    fn test_empty_input_is_noop() {
        // No schema: touching the store would fail.
        let conn = Connection::open_in_memory().unwrap();
        let posts = insert(&conn, &[], 30).unwrap();
        assert!(posts.is_empty());
    }

    #[test]
    fn test_reply_within_same_packet() {
        let db = seeded();
        let conn = db.connection();
        let posts = vec![
            NewPost::new("a", "first"),
            NewPost::new("a", "second").reply_to(PostId::from_raw(1)),
        ];

        let created = insert(conn, &posts, 30).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].path, PostPath::root(PostId::from_raw(1)));
        assert_eq!(created[1].path, created[0].path.child(PostId::from_raw(2)));
        assert_eq!(created[1].parent, Some(PostId::from_raw(1)));
        assert!(created.iter().all(|p| !p.is_edited && p.forum == "f"));
    }

    #[test]
    fn test_unknown_thread() {
        let db = seeded();
        let err = create_posts(
            db.connection(),
            ThreadId::from_raw(99),
            "f",
            &[NewPost::new("a", "m")],
            Utc::now(),
            30,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ThreadNotFound(t) if t == "99"));
    }

    #[test]
    fn test_unknown_author_reports_thread_not_found() {
        let db = seeded();
        let posts = [NewPost::new("a", "ok"), NewPost::new("ghost", "m")];
        let err = insert(db.connection(), &posts, 30).unwrap_err();
        assert!(matches!(err, Error::ThreadNotFound(_)));
        assert_eq!(post_count(db.connection()), 0);
    }

    #[test]
    fn test_unknown_parent() {
        let db = seeded();
        let posts = [NewPost::new("a", "m").reply_to(PostId::from_raw(404))];
        let err = insert(db.connection(), &posts, 30).unwrap_err();
        assert!(matches!(err, Error::ParentNotFound));
    }

    #[test]
    fn test_failed_packet_rolls_back_earlier_packets() {
        let db = seeded();
        let conn = db.connection();
        let mut posts: Vec<NewPost> = (0..5).map(|i| NewPost::new("a", format!("p{i}"))).collect();
        posts.push(NewPost::new("a", "bad").reply_to(PostId::from_raw(404)));

        let err = insert(conn, &posts, 2).unwrap_err();
        assert!(matches!(err, Error::ParentNotFound));
        assert_eq!(post_count(conn), 0);

        // The connection is usable afterwards: no savepoint left open.
        assert!(conn.is_autocommit());
    }
}
