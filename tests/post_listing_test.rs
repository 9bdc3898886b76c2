mod common;

use forumdb::{Error, ForumDb, NewPost, PostId, PostPage, SortMode, Thread, ThreadId};

/// Builds the reply tree
///
/// ```text
/// a            (t1)
/// ├── c        (t2)
/// │   └── e    (t3)
/// b            (t1)
/// d            (t2)
/// ```
///
/// and returns the ids `[a, b, c, d, e]`.
async fn build_tree(db: &ForumDb) -> (Thread, [PostId; 5]) {
    let thread = common::seed(db).await;

    let first = db
        .create_posts_at(
            "thread",
            vec![NewPost::new("alice", "a"), NewPost::new("bob", "b")],
            common::at(1),
        )
        .await
        .unwrap();
    let (a, b) = (first[0].id, first[1].id);

    let second = db
        .create_posts_at(
            "thread",
            vec![
                NewPost::new("bob", "c").reply_to(a),
                NewPost::new("alice", "d"),
            ],
            common::at(2),
        )
        .await
        .unwrap();
    let (c, d) = (second[0].id, second[1].id);

    let third = db
        .create_posts_at(
            "thread",
            vec![NewPost::new("alice", "e").reply_to(c)],
            common::at(3),
        )
        .await
        .unwrap();
    let e = third[0].id;

    (thread, [a, b, c, d, e])
}

async fn ids(db: &ForumDb, thread: ThreadId, page: PostPage) -> Vec<PostId> {
    db.get_posts(thread, page)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect()
}

#[tokio::test]
async fn flat_lists_by_creation_time() {
    let (_dir, db) = common::open_db("flat.db").await;
    let (thread, [a, b, c, d, e]) = build_tree(&db).await;

    let page = PostPage::new(SortMode::Flat);
    assert_eq!(ids(&db, thread.id, page).await, vec![a, b, c, d, e]);
    assert_eq!(
        ids(&db, thread.id, page.desc(true)).await,
        vec![e, d, c, b, a]
    );
    assert_eq!(
        ids(&db, thread.id, page.since(b).limit(2)).await,
        vec![c, d]
    );
    assert_eq!(
        ids(&db, thread.id, page.since(d).desc(true)).await,
        vec![c, b, a]
    );

    db.shutdown().await;
}

#[tokio::test]
async fn tree_lists_ancestors_before_descendants() {
    let (_dir, db) = common::open_db("tree.db").await;
    let (thread, [a, b, c, d, e]) = build_tree(&db).await;

    let page = PostPage::new(SortMode::Tree);
    assert_eq!(ids(&db, thread.id, page).await, vec![a, c, e, b, d]);
    assert_eq!(
        ids(&db, thread.id, page.desc(true)).await,
        vec![d, b, e, c, a]
    );

    // The cursor continues right after the cursor post's subtree position.
    assert_eq!(
        ids(&db, thread.id, page.since(c).limit(2)).await,
        vec![e, b]
    );
    assert_eq!(
        ids(&db, thread.id, page.since(b).desc(true).limit(2)).await,
        vec![e, c]
    );

    let posts = db.get_posts(thread.id, page).await.unwrap();
    for post in &posts {
        assert_eq!(post.path.post_id(), Some(post.id));
        assert_eq!(
            post.path.parent_path().and_then(|p| p.post_id()),
            post.parent
        );
    }

    db.shutdown().await;
}

#[tokio::test]
async fn parent_tree_pages_whole_reply_trees() {
    let (_dir, db) = common::open_db("parent_tree.db").await;
    let (thread, [a, b, c, d, e]) = build_tree(&db).await;

    let page = PostPage::new(SortMode::ParentTree);
    assert_eq!(ids(&db, thread.id, page).await, vec![a, c, e, b, d]);

    // The limit counts top-level posts, not rows.
    assert_eq!(ids(&db, thread.id, page.limit(1)).await, vec![a, c, e]);
    assert_eq!(ids(&db, thread.id, page.limit(2)).await, vec![a, c, e, b]);

    // A cursor inside a tree stands for the whole tree.
    assert_eq!(ids(&db, thread.id, page.since(e).limit(1)).await, vec![b]);
    assert_eq!(ids(&db, thread.id, page.since(b)).await, vec![d]);

    // Descending flips the order of trees, not the order inside a tree.
    assert_eq!(
        ids(&db, thread.id, page.desc(true)).await,
        vec![d, b, a, c, e]
    );
    assert_eq!(
        ids(&db, thread.id, page.desc(true).limit(2)).await,
        vec![d, b]
    );
    assert_eq!(
        ids(&db, thread.id, page.desc(true).since(b)).await,
        vec![a, c, e]
    );

    db.shutdown().await;
}

#[tokio::test]
async fn unknown_cursor_and_thread_give_empty_pages() {
    let (_dir, db) = common::open_db("empty.db").await;
    let (thread, _) = build_tree(&db).await;

    for sort in [SortMode::Flat, SortMode::Tree, SortMode::ParentTree] {
        let page = PostPage::new(sort).since(PostId::from_raw(9999));
        assert!(
            ids(&db, thread.id, page).await.is_empty(),
            "{sort} with unknown cursor"
        );
        let missing = ThreadId::from_raw(9999);
        assert!(ids(&db, missing, PostPage::new(sort)).await.is_empty());
    }

    // Resolving the thread first tells an unknown thread apart.
    let err = db
        .get_thread_posts("no-such-thread", PostPage::new(SortMode::Tree))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ThreadNotFound(_)));

    db.shutdown().await;
}

#[tokio::test]
async fn thread_posts_resolve_by_slug_or_id() {
    let (_dir, db) = common::open_db("resolve.db").await;
    let (thread, [a, _, c, _, e]) = build_tree(&db).await;

    let page = PostPage::parse(3, "", "tree", false).unwrap();
    let by_slug = db.get_thread_posts("THREAD", page).await.unwrap();
    let by_id = db
        .get_thread_posts(&thread.id.to_string(), page)
        .await
        .unwrap();

    assert_eq!(by_slug, by_id);
    let order: Vec<_> = by_slug.iter().map(|p| p.id).collect();
    assert_eq!(order, vec![a, c, e]);

    db.shutdown().await;
}

#[tokio::test]
async fn repeated_listing_is_stable() {
    let (_dir, db) = common::open_db("stable.db").await;
    let thread = common::seed(&db).await;

    // One batch shares a timestamp, so flat order falls back to id.
    let posts: Vec<NewPost> = (0..40)
        .map(|i| NewPost::new("alice", format!("{i}")))
        .collect();
    let created = db.create_posts("thread", posts).await.unwrap();

    for sort in [SortMode::Flat, SortMode::Tree, SortMode::ParentTree] {
        let first = db.get_posts(thread.id, PostPage::new(sort)).await.unwrap();
        let second = db.get_posts(thread.id, PostPage::new(sort)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, created, "{sort} of top-level posts follows id order");
    }

    db.shutdown().await;
}

#[test]
fn page_parsing_rejects_bad_input() {
    assert!(matches!(
        PostPage::parse(10, "", "newest", false),
        Err(Error::InvalidSort(_))
    ));
    assert!(matches!(
        PostPage::parse(10, "abc", "flat", false),
        Err(Error::InvalidCursor(_))
    ));

    let page = PostPage::parse(-5, " 42 ", "", true).unwrap();
    assert_eq!(page.limit, 0);
    assert_eq!(page.since, Some(PostId::from_raw(42)));
    assert_eq!(page.sort, SortMode::Flat);
    assert!(page.desc);
}
