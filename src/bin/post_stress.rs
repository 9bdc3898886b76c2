//! ForumDB Post Stress Test Binary
//!
//! Hammers one forum with concurrent post batches and checks that the
//! buffered forum post count and the post trees come out exact.
//! Run with: `cargo run --bin post_stress -- [OPTIONS]`
//!
//! # Examples
//!
//! ```bash
//! # Default test: 4 threads, 2000 posts, 10 concurrent tasks, 25 posts per batch
//! cargo run --release --bin post_stress
//!
//! # Large batches that span several insert packets
//! cargo run --release --bin post_stress -- --posts 20000 --batch 200 --concurrency 32
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use forumdb::{
    ForumConfig, ForumDb, NewForum, NewPost, NewThread, PostPage, SortMode, User,
};

/// Stress test configuration
struct Config {
    /// Number of threads in the forum
    num_threads: usize,
    /// Total number of posts to write
    num_posts: usize,
    /// Posts per create call
    batch_size: usize,
    /// Number of concurrent writer tasks
    concurrency: usize,
    /// Path to database file (or temp if None)
    db_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: 4,
            num_posts: 2000,
            batch_size: 25,
            concurrency: 10,
            db_path: None,
        }
    }
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--threads" | "-t" => {
                i += 1;
                config.num_threads = args[i].parse().expect("Invalid --threads value");
            }
            "--posts" | "-p" => {
                i += 1;
                config.num_posts = args[i].parse().expect("Invalid --posts value");
            }
            "--batch" | "-b" => {
                i += 1;
                config.batch_size = args[i].parse().expect("Invalid --batch value");
            }
            "--concurrency" | "-c" => {
                i += 1;
                config.concurrency = args[i].parse().expect("Invalid --concurrency value");
            }
            "--db" | "-d" => {
                i += 1;
                config.db_path = Some(args[i].clone());
            }
            "--help" | "-h" => {
                println!(
                    r#"ForumDB Post Stress Test

Usage: post_stress [OPTIONS]

Options:
  -t, --threads <N>     Threads in the forum (default: 4)
  -p, --posts <N>       Total posts to write (default: 2000)
  -b, --batch <N>       Posts per create call (default: 25)
  -c, --concurrency <N> Concurrent writer tasks (default: 10)
  -d, --db <PATH>       Database path (default: temp file)
  -h, --help            Show this help
"#
                );
                std::process::exit(0);
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config.num_threads = config.num_threads.max(1);
    config.batch_size = config.batch_size.max(1);
    config.concurrency = config.concurrency.max(1);
    config
}

#[tokio::main]
async fn main() {
    let config = parse_args();

    println!("ForumDB Post Stress Test");
    println!("========================");
    println!("Threads:     {}", config.num_threads);
    println!("Posts:       {}", config.num_posts);
    println!("Batch size:  {}", config.batch_size);
    println!("Concurrency: {}", config.concurrency);
    println!();

    // Setup database
    let temp_dir = std::env::temp_dir().join(format!("forumdb-stress-{}", std::process::id()));
    std::fs::create_dir_all(&temp_dir).expect("create temp dir");
    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(|| temp_dir.join("stress.db").to_string_lossy().to_string());

    println!("Database:    {}", db_path);
    println!();

    let db = ForumDb::open_with_config(ForumConfig::with_path(&db_path))
        .await
        .unwrap();
    db.clear().await.unwrap();

    db.create_user(User {
        nickname: "stress".into(),
        fullname: "Stress Tester".into(),
        email: "stress@example.com".into(),
        about: String::new(),
    })
    .await
    .unwrap();
    db.create_forum(NewForum {
        slug: "stress".into(),
        title: "Stress".into(),
        user: "stress".into(),
    })
    .await
    .unwrap();

    let mut thread_ids = Vec::with_capacity(config.num_threads);
    for t in 0..config.num_threads {
        let thread = db
            .create_thread(
                "stress",
                NewThread {
                    slug: Some(format!("stress-{}", t)),
                    title: format!("Thread {}", t),
                    author: "stress".into(),
                    message: "stress".into(),
                    created: None,
                },
            )
            .await
            .unwrap();
        thread_ids.push(thread.id);
    }

    // Metrics
    let posts_written = Arc::new(AtomicU64::new(0));
    let batches = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));

    println!("Starting stress test...");
    let start = Instant::now();

    let mut handles = Vec::new();
    let posts_per_task = config.num_posts / config.concurrency;

    for task_id in 0..config.concurrency {
        let db = db.clone();
        let posts_written = posts_written.clone();
        let batches = batches.clone();
        let errors = errors.clone();
        let num_threads = config.num_threads;
        let batch_size = config.batch_size;

        let handle = tokio::spawn(async move {
            let mut remaining = posts_per_task;
            let mut round = 0;
            while remaining > 0 {
                let n = remaining.min(batch_size);
                let slug = format!("stress-{}", (task_id + round) % num_threads);

                // Top-level posts only: replies would need ids from this thread.
                let posts: Vec<NewPost> = (0..n)
                    .map(|i| {
                        NewPost::new("stress", format!("post-{}-{}-{}", task_id, round, i))
                    })
                    .collect();

                match db.create_posts(&slug, posts).await {
                    Ok(created) => {
                        posts_written.fetch_add(created.len() as u64, Ordering::Relaxed);
                        batches.fetch_add(1, Ordering::Relaxed);

                        // Every other batch answers its own first post.
                        if round % 2 == 0 {
                            if let Some(first) = created.first() {
                                let reply = NewPost::new("stress", "reply").reply_to(first.id);
                                match db.create_posts(&slug, vec![reply]).await {
                                    Ok(_) => {
                                        posts_written.fetch_add(1, Ordering::Relaxed);
                                        batches.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Err(_) => {
                                        errors.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                            }
                        }
                    }
                    Err(_) => {
                        errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                remaining -= n;
                round += 1;
            }
        });
        handles.push(handle);
    }

    // Wait for all tasks
    for handle in handles {
        handle.await.unwrap();
    }

    let elapsed = start.elapsed();

    // Report metrics
    let written = posts_written.load(Ordering::Relaxed);
    let batch_count = batches.load(Ordering::Relaxed);
    let error_count = errors.load(Ordering::Relaxed);

    println!();
    println!("Results");
    println!("-------");
    println!("Posts written:   {}", written);
    println!("Batches:         {}", batch_count);
    println!("Errors:          {}", error_count);
    println!("Pending updates: {}", db.counter().pending_updates());
    println!("Duration:        {:?}", elapsed);
    println!(
        "Throughput:      {:.2} posts/sec",
        written as f64 / elapsed.as_secs_f64()
    );
    println!();

    // Verify invariants
    println!("Verifying invariants...");

    let forum = db.get_forum("stress").await.unwrap();
    println!("  Forum post count: {}", forum.posts);
    assert_eq!(
        forum.posts as u64, written,
        "Forum post count mismatch: {} in forum, {} written",
        forum.posts, written
    );
    assert!(
        !db.counter().is_dirty(),
        "counter still dirty after forum read"
    );
    println!("  Buffered counts:  folded ✓");

    let mut listed = 0usize;
    for thread in &thread_ids {
        let flat = db
            .get_posts(*thread, PostPage::new(SortMode::Flat))
            .await
            .unwrap();
        let tree = db
            .get_posts(*thread, PostPage::new(SortMode::Tree))
            .await
            .unwrap();
        assert_eq!(flat.len(), tree.len());

        for post in &tree {
            assert_eq!(
                post.path.post_id(),
                Some(post.id),
                "path must end with the post id"
            );
            match post.parent {
                Some(parent) => {
                    let parent_path = post.path.parent_path().expect("reply has a parent path");
                    assert_eq!(parent_path.post_id(), Some(parent));
                }
                None => assert_eq!(post.path.len(), 1),
            }
        }
        assert!(
            tree.windows(2).all(|w| w[0].path < w[1].path),
            "tree listing out of path order"
        );
        assert!(
            flat.windows(2).all(|w| w[0].created <= w[1].created),
            "flat listing out of time order"
        );
        listed += tree.len();
    }
    assert_eq!(listed as u64, written);
    println!(
        "  Post trees:       consistent across {} threads ✓",
        thread_ids.len()
    );

    let status = db.status().await.unwrap();
    assert_eq!(status.post as u64, written);
    println!("  Status:           {} posts ✓", status.post);

    db.shutdown().await;

    println!();
    println!("Stress test PASSED ✓");
}
