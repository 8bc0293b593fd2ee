#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common helpers for integration tests.
//!
//! Tests run the real services over the in-memory backend; see
//! `lustra_test_utils::TestApp`.

#![allow(dead_code)]

use lustra_kernel::content::ContentState;

/// A post is in the public collection exactly when it is published, and
/// public entries match their admin counterparts.
pub fn assert_collections_consistent(state: &ContentState) {
    for post in &state.posts {
        let public = state.published_posts.iter().find(|p| p.id == post.id);
        assert_eq!(
            post.is_published(),
            public.is_some(),
            "post {} ({}) has status {} but public presence {}",
            post.slug,
            post.id,
            post.status,
            public.is_some()
        );
        if let Some(public) = public {
            assert_eq!(public, post, "public copy of {} differs", post.slug);
        }
    }
    assert!(
        state.published_posts.iter().all(|p| p.is_published()),
        "draft found in public collection"
    );
}
