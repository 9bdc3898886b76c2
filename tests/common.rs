#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use forumdb::{writer, Database, ForumConfig, ForumDb, NewForum, NewThread, Thread, User, Vote};
use rusqlite::{Connection, OpenFlags};

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let _ = Database::open(&path).expect("initialize database");
    (dir, path)
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

pub fn open_read_write(path: &Path) -> Connection {
    Connection::open(path).expect("open read-write connection")
}

pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Fixed timestamp, `seconds` after 2024-01-01T00:00:00Z.
pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
}

pub fn user(nickname: &str) -> User {
    User {
        nickname: nickname.to_string(),
        fullname: format!("{} Fullname", nickname),
        email: format!("{}@example.com", nickname),
        about: String::new(),
    }
}

pub fn new_thread(slug: &str, author: &str) -> NewThread {
    NewThread {
        slug: Some(slug.to_string()),
        title: format!("Thread {}", slug),
        author: author.to_string(),
        message: "opening message".to_string(),
        created: Some(at(0)),
    }
}

pub fn new_forum(slug: &str, owner: &str) -> NewForum {
    NewForum {
        slug: slug.to_string(),
        title: format!("Forum {}", slug),
        user: owner.to_string(),
    }
}

pub fn vote(nickname: &str, voice: i32) -> Vote {
    Vote {
        nickname: nickname.to_string(),
        voice,
    }
}

pub fn test_config(path: &Path) -> ForumConfig {
    ForumConfig {
        reader_threads: 2,
        ..ForumConfig::with_path(path)
    }
}

pub async fn open_db(name: &str) -> (tempfile::TempDir, ForumDb) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let db = ForumDb::open_with_config(test_config(&dir.path().join(name)))
        .await
        .expect("open forum db");
    (dir, db)
}

/// Creates users `alice` and `bob`, forum `forum` owned by alice, and
/// thread `thread` in it.
pub async fn seed(db: &ForumDb) -> Thread {
    for nickname in ["alice", "bob"] {
        db.create_user(user(nickname)).await.expect("create user");
    }
    db.create_forum(NewForum {
        slug: "forum".into(),
        title: "Forum".into(),
        user: "alice".into(),
    })
    .await
    .expect("create forum");
    db.create_thread("forum", new_thread("thread", "alice"))
        .await
        .expect("create thread")
}

/// Synchronous variant of [`seed`] on a bare connection.
pub fn seed_sync(conn: &Connection) -> Thread {
    for nickname in ["alice", "bob"] {
        writer::create_user(conn, &user(nickname)).expect("create user");
    }
    writer::create_forum(
        conn,
        &NewForum {
            slug: "forum".into(),
            title: "Forum".into(),
            user: "alice".into(),
        },
    )
    .expect("create forum");
    writer::create_thread(conn, "forum", &new_thread("thread", "alice")).expect("create thread")
}

pub fn forum_posts(conn: &Connection, slug: &str) -> i64 {
    conn.query_row(
        "SELECT posts FROM forums WHERE slug = ?1",
        [slug],
        |row| row.get(0),
    )
    .expect("read forum posts")
}

pub fn post_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
        .expect("count posts")
}
