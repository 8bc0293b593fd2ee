#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Content store integration tests.

mod common;

use std::time::Duration;

use chrono::Utc;
use lustra_kernel::ContentError;
use lustra_kernel::content::{ELLIPSIS, EXCERPT_LEN, is_valid_slug};
use lustra_kernel::editor::markup;
use lustra_kernel::models::{NewPost, PostStatus, UpdatePost};
use lustra_test_utils::{
    ADMIN_EMAIL, ADMIN_NAME, ADMIN_PASSWORD, SETTLE, TestApp, long_content, new_post, test_post,
};
use uuid::Uuid;

use common::assert_collections_consistent;

#[tokio::test]
async fn test_public_load_shows_only_published() {
    let app = TestApp::new();
    app.backend
        .seed(test_post("Window washing tips").published().build());
    app.backend.seed(test_post("Unfinished draft").build());
    let app = app.start().await;

    let published = app.state.content().published_posts();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].slug, "window-washing-tips");
    assert!(app.state.content().posts().is_empty());

    app.shutdown().await;
}

#[tokio::test]
async fn test_publish_flow() {
    let app = TestApp::new().start().await;
    app.sign_in().await;
    let content = app.state.content();

    let draft = content
        .create_post(new_post(
            "Spring cleaning checklist",
            "<p>Start with the <b>windows</b>.</p>",
        ))
        .await
        .unwrap();
    assert_eq!(draft.status, PostStatus::Draft);
    assert_eq!(draft.slug, "spring-cleaning-checklist");
    assert_eq!(draft.author_name, ADMIN_NAME);
    assert!(draft.published_at.is_none());
    assert_eq!(draft.excerpt, "Start with the windows.");
    assert!(content.get_post(draft.id).is_some());
    assert!(content.published_posts().iter().all(|p| p.id != draft.id));
    assert_collections_consistent(&content.snapshot());

    let published = content.publish_post(draft.id).await.unwrap();
    let first_published_at = published.published_at.expect("published_at set");
    assert!(content.published_posts().iter().any(|p| p.id == draft.id));
    assert_collections_consistent(&content.snapshot());
    assert_eq!(
        content
            .get_post_by_slug("spring-cleaning-checklist")
            .await
            .unwrap()
            .status,
        PostStatus::Published
    );

    let unpublished = content.unpublish_post(draft.id).await.unwrap();
    assert_eq!(unpublished.status, PostStatus::Draft);
    assert_eq!(unpublished.published_at, Some(first_published_at));
    assert!(content.published_posts().iter().all(|p| p.id != draft.id));
    assert_collections_consistent(&content.snapshot());

    let republished = content.publish_post(draft.id).await.unwrap();
    assert_eq!(republished.published_at, Some(first_published_at));
    assert_collections_consistent(&content.snapshot());

    app.shutdown().await;
}

#[tokio::test]
async fn test_publish_now_on_create() {
    let app = TestApp::new().start().await;
    app.sign_in().await;
    let content = app.state.content();

    let post = content
        .create_post(NewPost {
            status: PostStatus::Published,
            tags: vec![" windows ".into(), "tips".into(), "windows".into(), "".into()],
            ..new_post("Streak-free glass", "<p>Use a squeegee.</p>")
        })
        .await
        .unwrap();
    assert!(post.published_at.is_some());
    assert_eq!(post.tags, vec!["windows".to_string(), "tips".to_string()]);
    assert_eq!(content.published_posts()[0].id, post.id);
    assert_collections_consistent(&content.snapshot());

    assert_eq!(content.get_published_tags().await, vec!["windows", "tips"]);
    let tagged = content.get_published_posts_by_tag("tips").await;
    assert_eq!(tagged.len(), 1);
    assert!(content.get_published_posts_by_tag("tip").await.is_empty());

    app.shutdown().await;
}

#[tokio::test]
async fn test_unpublish_is_idempotent() {
    let app = TestApp::new().start().await;
    app.sign_in().await;
    let content = app.state.content();

    let draft = content
        .create_post(new_post("Grout guide", "<p>Baking soda works.</p>"))
        .await
        .unwrap();
    let first = content.unpublish_post(draft.id).await.unwrap();
    let second = content.unpublish_post(draft.id).await.unwrap();
    assert_eq!(first.status, PostStatus::Draft);
    assert_eq!(second.status, PostStatus::Draft);
    assert!(second.published_at.is_none());
    assert_collections_consistent(&content.snapshot());

    app.shutdown().await;
}

#[tokio::test]
async fn test_admin_operations_require_sign_in() {
    let app = TestApp::new().start().await;
    let content = app.state.content();
    let id = Uuid::now_v7();
    let before = app.backend.call_count();

    let results = vec![
        content
            .create_post(new_post("Nope", "<p>Nope</p>"))
            .await
            .map(|_| ()),
        content
            .update_post(
                id,
                UpdatePost {
                    title: Some("Nope".into()),
                    ..UpdatePost::default()
                },
            )
            .await
            .map(|_| ()),
        content.delete_post(id).await,
        content.publish_post(id).await.map(|_| ()),
        content.unpublish_post(id).await.map(|_| ()),
        content.search_all_posts("oven").await.map(|_| ()),
        content.refresh_all_posts().await,
    ];

    for result in results {
        assert!(matches!(result, Err(ContentError::Unauthorized(_))));
    }
    assert_eq!(app.backend.call_count(), before);
    assert!(content.get_post(id).is_none());

    app.shutdown().await;
}

#[tokio::test]
async fn test_drafts_hidden_from_public_slug_lookup() {
    let app = TestApp::new();
    app.backend.seed(test_post("Secret recipe").build());
    let app = app.start().await;
    let content = app.state.content();

    assert!(content.get_post_by_slug("secret-recipe").await.is_none());
    assert!(content.get_post_by_slug("missing").await.is_none());

    app.sign_in().await;
    assert!(content.get_post_by_slug("secret-recipe").await.is_some());

    app.shutdown().await;
}

#[tokio::test]
async fn test_excerpt_derived_from_long_content() {
    let app = TestApp::new().start().await;
    app.sign_in().await;

    let body = long_content(500);
    let post = app
        .state
        .content()
        .create_post(new_post("Deep clean", &body))
        .await
        .unwrap();

    let text = markup::plain_text(&body);
    let expected: String = text.chars().take(EXCERPT_LEN).collect();
    assert_eq!(post.excerpt, format!("{expected}{ELLIPSIS}"));
    assert_eq!(post.excerpt.chars().count(), EXCERPT_LEN + ELLIPSIS.len());

    app.shutdown().await;
}

#[tokio::test]
async fn test_slug_is_fixed_at_creation() {
    let app = TestApp::new().start().await;
    app.sign_in().await;
    let content = app.state.content();

    let post = content
        .create_post(new_post("Éco-Jardin: Vous!", "<p>Green tips.</p>"))
        .await
        .unwrap();
    assert_eq!(post.slug, "eco-jardin-vous");
    assert!(is_valid_slug(&post.slug));

    let renamed = content
        .update_post(
            post.id,
            UpdatePost {
                title: Some("A completely different title".into()),
                ..UpdatePost::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.title, "A completely different title");
    assert_eq!(renamed.slug, "eco-jardin-vous");

    app.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_titles_get_distinct_slugs() {
    let app = TestApp::new().start().await;
    app.sign_in().await;
    let content = app.state.content();

    let first = content
        .create_post(new_post("Oven care", "<p>One</p>"))
        .await
        .unwrap();
    let second = content
        .create_post(new_post("Oven care", "<p>Two</p>"))
        .await
        .unwrap();
    assert_eq!(first.slug, "oven-care");
    assert_eq!(second.slug, "oven-care-1");

    // Stored remotely but not in the loaded collection.
    app.backend
        .seed(test_post("Fridge care").with_slug("fridge-care").build());
    let third = content
        .create_post(new_post("Fridge care", "<p>Three</p>"))
        .await
        .unwrap();
    assert_eq!(third.slug, "fridge-care-1");

    app.shutdown().await;
}

#[tokio::test]
async fn test_validation_makes_no_remote_call() {
    let app = TestApp::new().start().await;
    app.sign_in().await;
    let content = app.state.content();
    let before = app.backend.call_count();

    let err = content
        .create_post(new_post("   ", "<p>Body</p>"))
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::Validation(ref m) if m == "Title is required."));

    let err = content
        .create_post(new_post("Title", "<p><br></p>"))
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::Validation(ref m) if m == "Content is required."));
    assert_eq!(app.backend.call_count(), before);

    app.shutdown().await;
}

#[tokio::test]
async fn test_delete_removes_from_both_collections() {
    let app = TestApp::new().start().await;
    app.sign_in().await;
    let content = app.state.content();

    let post = content
        .create_post(NewPost {
            status: PostStatus::Published,
            ..new_post("Carpet stains", "<p>Blot, don't rub.</p>")
        })
        .await
        .unwrap();
    content.delete_post(post.id).await.unwrap();

    let state = content.snapshot();
    assert!(state.posts.iter().all(|p| p.id != post.id));
    assert!(state.published_posts.iter().all(|p| p.id != post.id));
    assert!(app.backend.stored_posts().is_empty());

    app.shutdown().await;
}

#[tokio::test]
async fn test_failed_write_keeps_collections() {
    let app = TestApp::new().start().await;
    app.sign_in().await;
    let content = app.state.content();

    let post = content
        .create_post(new_post("Tile polish", "<p>Shine.</p>"))
        .await
        .unwrap();
    app.backend.fail_next("database unavailable");
    let err = content.publish_post(post.id).await.unwrap_err();
    assert!(matches!(err, ContentError::Remote(_)));

    let state = content.snapshot();
    assert!(state.admin_error.is_some());
    assert_eq!(content.get_post(post.id).unwrap().status, PostStatus::Draft);
    assert_collections_consistent(&state);

    app.shutdown().await;
}

#[tokio::test]
async fn test_reads_degrade_on_failure() {
    let app = TestApp::new().start().await;
    let content = app.state.content();

    app.backend.fail_next("boom");
    assert!(content.get_published_tags().await.is_empty());
    assert!(content.snapshot().public_error.is_some());

    app.backend.fail_next("boom");
    assert!(content.search_published_posts("oven").await.is_empty());

    app.shutdown().await;
}

#[tokio::test]
async fn test_search_scopes() {
    let app = TestApp::new();
    app.backend.seed(
        test_post("Oven degreasing")
            .with_content("<p>Vinegar and patience.</p>")
            .published()
            .build(),
    );
    app.backend.seed(
        test_post("Oven draft")
            .with_content("<p>Not yet.</p>")
            .build(),
    );
    let app = app.start().await;
    let content = app.state.content();

    assert_eq!(content.search_published_posts("OVEN").await.len(), 1);
    assert_eq!(content.search_published_posts("vinegar").await.len(), 1);
    assert_eq!(content.search_published_posts("  ").await.len(), 1);

    app.sign_in().await;
    assert_eq!(content.search_all_posts("oven").await.unwrap().len(), 2);

    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_public_load_times_out() {
    let app = TestApp::with_timeout(Duration::from_secs(15));
    app.backend.seed(test_post("Slow post").published().build());
    app.backend.set_latency(Some(Duration::from_secs(20)));
    app.state.start();

    let mut rx = app.state.content().subscribe();
    tokio::time::timeout(
        Duration::from_secs(60),
        rx.wait_for(|c| c.public_error.is_some()),
    )
    .await
    .expect("load should fail")
    .unwrap();

    let state = app.state.content().snapshot();
    assert!(!state.is_loading_published);
    assert!(state.published_posts.is_empty());
    assert!(!state.published_loaded);

    // A later refresh with a fast backend recovers.
    app.backend.set_latency(None);
    app.state.content().refresh_published_posts().await;
    let state = app.state.content().snapshot();
    assert!(state.public_error.is_none());
    assert_eq!(state.published_posts.len(), 1);

    app.shutdown().await;
}

#[tokio::test]
async fn test_admin_collection_cleared_on_sign_out() {
    let app = TestApp::new();
    app.backend.seed(test_post("Draft one").build());
    let app = app.start().await;
    app.sign_in().await;
    assert_eq!(app.state.content().posts().len(), 1);

    app.state.session().logout().await;

    let mut rx = app.state.content().subscribe();
    tokio::time::timeout(SETTLE, rx.wait_for(|c| c.posts.is_empty() && !c.admin_loaded))
        .await
        .expect("admin collection cleared")
        .unwrap();

    app.shutdown().await;
}

#[tokio::test]
async fn test_update_to_published_joins_public_collection() {
    let app = TestApp::new().start().await;
    app.sign_in().await;
    let content = app.state.content();

    let draft = content
        .create_post(new_post("Descaling kettles", "<p>Use citric acid.</p>"))
        .await
        .unwrap();
    assert!(content.published_posts().iter().all(|p| p.id != draft.id));

    let updated = content
        .update_post(
            draft.id,
            UpdatePost {
                status: Some(PostStatus::Published),
                ..UpdatePost::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, PostStatus::Published);
    assert!(updated.published_at.is_some());
    assert!(content.published_posts().iter().any(|p| p.id == draft.id));
    assert_collections_consistent(&content.snapshot());

    app.shutdown().await;
}

#[tokio::test]
async fn test_update_to_draft_leaves_public_collection() {
    let first_published = Utc::now() - chrono::Duration::days(30);
    let app = TestApp::new();
    let post = test_post("Shower glass care")
        .with_tags(&["bathroom", "glass"])
        .created_at(first_published)
        .published()
        .build();
    app.backend.seed(post.clone());
    let app = app.start().await;
    app.sign_in().await;
    let content = app.state.content();
    assert!(content.published_posts().iter().any(|p| p.id == post.id));

    let updated = content
        .update_post(
            post.id,
            UpdatePost {
                status: Some(PostStatus::Draft),
                ..UpdatePost::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, PostStatus::Draft);
    assert_eq!(updated.published_at, Some(first_published));
    assert_eq!(updated.tags, vec!["bathroom", "glass"]);
    assert!(content.published_posts().iter().all(|p| p.id != post.id));
    assert_eq!(content.get_post(post.id).unwrap().status, PostStatus::Draft);
    assert_collections_consistent(&content.snapshot());

    app.shutdown().await;
}

#[tokio::test]
async fn test_publishing_uncached_post_keeps_first_publication() {
    let first_published = Utc::now() - chrono::Duration::days(30);
    let app = TestApp::new().start().await;
    app.sign_in().await;
    let content = app.state.content();

    // Stored after the admin collection loaded, so only the remote knows them.
    let republished = test_post("Rug shampoo basics")
        .created_at(first_published)
        .published()
        .build();
    let never_published = test_post("Blind dusting").build();
    app.backend.seed(republished.clone());
    app.backend.seed(never_published.clone());
    assert!(content.get_post(republished.id).is_none());

    let updated = content
        .update_post(
            republished.id,
            UpdatePost {
                status: Some(PostStatus::Published),
                ..UpdatePost::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.published_at, Some(first_published));

    let published = content.publish_post(republished.id).await.unwrap();
    assert_eq!(published.published_at, Some(first_published));

    let fresh = content.publish_post(never_published.id).await.unwrap();
    assert!(fresh.published_at.is_some_and(|at| at > first_published));

    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_drops_in_flight_admin_load() {
    let app = TestApp::new();
    app.backend.seed(test_post("Hidden draft").build());
    let app = app.start().await;
    app.backend.set_latency(Some(Duration::from_secs(10)));

    app.state
        .session()
        .login(ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .unwrap();
    let mut rx = app.state.content().subscribe();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|c| c.is_loading_admin))
        .await
        .expect("admin load started")
        .unwrap();

    app.state.session().logout().await;
    // Well past the latency: the retired load would have landed by now.
    tokio::time::sleep(Duration::from_secs(30)).await;

    let state = app.state.content().snapshot();
    assert!(state.posts.is_empty());
    assert!(!state.admin_loaded);
    assert!(!state.is_loading_admin);
    assert!(state.admin_error.is_none());

    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_newer_refresh_wins_over_slow_load() {
    let app = TestApp::new();
    let first = test_post("Marble polish").build();
    app.backend.seed(first.clone());
    let app = app.start().await;
    app.sign_in().await;
    let content = app.state.content();

    app.backend.set_latency(Some(Duration::from_secs(10)));
    let slow = tokio::spawn({
        let content = content.clone();
        async move { content.refresh_all_posts().await }
    });
    let mut rx = content.subscribe();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|c| c.is_loading_admin))
        .await
        .expect("slow load started")
        .unwrap();

    app.backend.set_latency(None);
    let second = test_post("Granite sealing").build();
    app.backend.seed(second.clone());
    content.refresh_all_posts().await.unwrap();

    // Written after the newer load; only the slow load could pick it up.
    app.backend.seed(test_post("Late arrival").build());
    slow.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let state = content.snapshot();
    let mut ids: Vec<Uuid> = state.posts.iter().map(|p| p.id).collect();
    ids.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(ids, expected);
    assert!(!state.is_loading_admin);
    assert_collections_consistent(&state);

    app.shutdown().await;
}
