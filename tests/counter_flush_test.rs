mod common;

use std::time::Duration;

use forumdb::{Database, Error, ForumConfig, ForumDb, ForumPostCounter, NewPost, NewThread};

#[test]
fn buffered_deltas_sum_on_flush() {
    let (_dir, path) = common::create_temp_db_file("sum.db");
    let db = Database::open(&path).unwrap();
    let conn = db.connection();
    common::seed_sync(conn);
    let counter = ForumPostCounter::new();

    counter.buffer_post_count(conn, "forum", 5).unwrap();
    counter.buffer_post_count(conn, "forum", 3).unwrap();
    assert_eq!(common::forum_posts(conn, "forum"), 0);

    assert!(counter.flush_if_dirty(conn).unwrap());
    assert_eq!(common::forum_posts(conn, "forum"), 8);
    assert!(!counter.is_dirty());

    // Nothing pending: no transaction, no change.
    assert!(!counter.flush_if_dirty(conn).unwrap());
    assert_eq!(common::forum_posts(conn, "forum"), 8);
    assert_eq!(counter.flush_count(), 1);
}

#[test]
fn unknown_forum_is_rejected_without_dirtying() {
    let (_dir, path) = common::create_temp_db_file("unknown.db");
    let db = Database::open(&path).unwrap();
    let counter = ForumPostCounter::new();

    let err = counter
        .buffer_post_count(db.connection(), "nope", 1)
        .unwrap_err();
    assert!(matches!(err, Error::ForumNotFound(slug) if slug == "nope"));
    assert!(!counter.is_dirty());
}

#[test]
fn counters_are_independent_instances() {
    let (_dir, path) = common::create_temp_db_file("independent.db");
    let db = Database::open(&path).unwrap();
    let conn = db.connection();
    common::seed_sync(conn);

    let first = ForumPostCounter::new();
    let second = ForumPostCounter::new();
    first.buffer_post_count(conn, "forum", 2).unwrap();

    assert!(first.is_dirty());
    assert!(!second.is_dirty());
    assert!(!second.flush_if_dirty(conn).unwrap());
    assert_eq!(common::forum_posts(conn, "forum"), 0);
}

#[test]
fn failed_flush_keeps_deltas_for_retry() {
    let (_dir, path) = common::create_temp_db_file("busy.db");
    let db = Database::open(&path).unwrap();
    let conn = db.connection();
    common::seed_sync(conn);
    let counter = ForumPostCounter::new();
    counter.buffer_post_count(conn, "forum", 4).unwrap();

    // Another connection holds the write lock and we refuse to wait.
    conn.busy_timeout(Duration::ZERO).unwrap();
    let blocker = common::open_read_write(&path);
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    assert!(counter.flush_if_dirty(conn).is_err());
    assert!(counter.is_dirty());
    assert!(conn.is_autocommit());

    blocker.execute_batch("ROLLBACK").unwrap();
    assert_eq!(common::forum_posts(conn, "forum"), 0);

    assert!(counter.flush_if_dirty(conn).unwrap());
    assert_eq!(common::forum_posts(conn, "forum"), 4);
    assert!(!counter.is_dirty());
}

#[test]
fn failed_apply_leaves_connection_outside_a_transaction() {
    let (_dir, path) = common::create_temp_db_file("abort.db");
    let db = Database::open(&path).unwrap();
    let conn = db.connection();
    common::seed_sync(conn);
    let counter = ForumPostCounter::new();
    counter.buffer_post_count(conn, "forum", 2).unwrap();

    conn.execute_batch(
        "CREATE TRIGGER refuse_count BEFORE UPDATE OF posts ON forums
         BEGIN SELECT RAISE(ABORT, 'refused'); END;",
    )
    .unwrap();

    assert!(counter.flush_if_dirty(conn).is_err());
    assert!(conn.is_autocommit(), "flush transaction was rolled back");
    assert!(counter.is_dirty());

    conn.execute_batch("DROP TRIGGER refuse_count").unwrap();
    assert!(counter.flush_if_dirty(conn).unwrap());
    assert_eq!(common::forum_posts(conn, "forum"), 2);
}

#[test]
fn flush_touches_only_forums_with_pending_posts() {
    let (_dir, path) = common::create_temp_db_file("touch.db");
    let db = Database::open(&path).unwrap();
    let conn = db.connection();
    common::seed_sync(conn);
    forumdb::writer::create_forum(conn, &common::new_forum("quiet", "bob")).unwrap();
    conn.execute("UPDATE forums SET posts = 10 WHERE slug = 'quiet'", [])
        .unwrap();

    let counter = ForumPostCounter::new();
    counter.buffer_post_count(conn, "forum", 1).unwrap();
    counter.flush_if_dirty(conn).unwrap();

    assert_eq!(common::forum_posts(conn, "forum"), 1);
    assert_eq!(common::forum_posts(conn, "quiet"), 10);
}

#[tokio::test]
async fn concurrent_batches_converge_to_exact_counts() {
    let (_dir, db) = common::open_db("concurrent.db").await;
    common::seed(&db).await;
    db.create_forum(common::new_forum("second", "bob"))
        .await
        .unwrap();
    let other = NewThread {
        slug: Some("other".into()),
        ..common::new_thread("x", "bob")
    };
    db.create_thread("second", other).await.unwrap();

    let mut handles = Vec::new();
    for task in 0..16 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let slug = if task % 2 == 0 { "thread" } else { "other" };
            for round in 0..5 {
                let posts = (0..task + 1)
                    .map(|i| NewPost::new("bob", format!("{task}-{round}-{i}")))
                    .collect();
                db.create_posts(slug, posts).await.unwrap();

                // Readers flushing in the middle of writes must not lose deltas.
                if round == 2 {
                    db.flush_if_dirty().await.unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let expected = |parity: usize| -> i64 {
        (0..16usize)
            .filter(|t| t % 2 == parity)
            .map(|t| 5 * (t as i64 + 1))
            .sum()
    };
    assert_eq!(db.get_forum("forum").await.unwrap().posts, expected(0));
    assert_eq!(db.get_forum("second").await.unwrap().posts, expected(1));
    assert!(!db.counter().is_dirty());

    let status = db.status().await.unwrap();
    assert_eq!(status.post, expected(0) + expected(1));

    db.shutdown().await;
}

#[tokio::test]
async fn periodic_flush_runs_without_readers() {
    let dir = tempfile::tempdir().unwrap();
    let config = ForumConfig {
        flush_interval: Some(Duration::from_millis(20)),
        ..common::test_config(&dir.path().join("interval.db"))
    };
    let db = ForumDb::open_with_config(config).await.unwrap();
    common::seed(&db).await;

    db.create_posts("thread", vec![NewPost::new("alice", "tick")])
        .await
        .unwrap();

    let counter_db = db.clone();
    common::eventually(Duration::from_secs(5), Duration::from_millis(10), || {
        (!counter_db.counter().is_dirty()).then_some(())
    })
    .await;

    let read = common::open_read_only(&dir.path().join("interval.db"));
    assert_eq!(common::forum_posts(&read, "forum"), 1);

    db.shutdown().await;
}

#[tokio::test]
async fn shared_counter_instance_is_observable() {
    let (_dir, db) = common::open_db("shared.db").await;
    common::seed(&db).await;

    let before = db.counter().flush_count();
    db.create_posts("thread", vec![NewPost::new("alice", "x")])
        .await
        .unwrap();
    assert_eq!(db.counter().pending_updates(), 1);

    assert!(db.flush_if_dirty().await.unwrap());
    assert_eq!(db.counter().flush_count(), before + 1);

    db.shutdown().await;
}
