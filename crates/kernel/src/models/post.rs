//! Blog post model.
//!
//! Posts are the only content records in Lustra. The remote store owns
//! identity and timestamps; everything else is written by the admin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Publication status of a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    /// Visible to the administrator only.
    #[default]
    Draft,
    /// Visible to everyone.
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blog post record as stored in `blog_posts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogPost {
    /// Identifier assigned by the remote store.
    pub id: Uuid,

    pub title: String,

    /// Serialized rich-text markup.
    pub content: String,

    /// Short plain-text summary.
    pub excerpt: String,

    /// Absolute URL of the cover image.
    #[serde(default)]
    pub image_url: Option<String>,

    pub status: PostStatus,

    /// Display name snapshot taken when the post was written.
    pub author_name: String,

    #[serde(default)]
    pub author_id: Option<Uuid>,

    /// Free-text labels in insertion order.
    #[serde(default)]
    pub tags: Vec<String>,

    /// URL-safe identifier, fixed at creation.
    pub slug: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Time of first publication.
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl BlogPost {
    /// Check if this post is published.
    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }

    /// Check for exact tag membership.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Author input for creating a post.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    /// Derived from `content` when absent or blank.
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// `Published` means "publish now".
    #[serde(default)]
    pub status: PostStatus,
}

/// Full row sent to the remote store on insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostRecord {
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub image_url: Option<String>,
    pub status: PostStatus,
    pub author_name: String,
    pub author_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub slug: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Partial update. Only the fields that are `Some` go over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PostStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl UpdatePost {
    /// True when no field would be sent.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge the provided fields into `post`, leaving the rest untouched.
    pub fn apply_to(&self, post: &mut BlogPost) {
        if let Some(title) = &self.title {
            post.title = title.clone();
        }
        if let Some(content) = &self.content {
            post.content = content.clone();
        }
        if let Some(excerpt) = &self.excerpt {
            post.excerpt = excerpt.clone();
        }
        if let Some(image_url) = &self.image_url {
            post.image_url = Some(image_url.clone()).filter(|u| !u.is_empty());
        }
        if let Some(tags) = &self.tags {
            post.tags = tags.clone();
        }
        if let Some(status) = self.status {
            post.status = status;
        }
        if let Some(published_at) = self.published_at {
            post.published_at = Some(published_at);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample() -> BlogPost {
        BlogPost {
            id: Uuid::nil(),
            title: "Spring cleaning".to_string(),
            content: "<p>Open the windows.</p>".to_string(),
            excerpt: "Open the windows.".to_string(),
            image_url: None,
            status: PostStatus::Draft,
            author_name: "Admin".to_string(),
            author_id: None,
            tags: vec!["tips".to_string(), "spring".to_string()],
            slug: "spring-cleaning".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            published_at: None,
        }
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PostStatus::Published).unwrap(),
            "\"published\""
        );
        let parsed: PostStatus = serde_json::from_str("\"draft\"").unwrap();
        assert_eq!(parsed, PostStatus::Draft);
    }

    #[test]
    fn post_deserializes_from_table_row() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000000",
            "title": "Hello",
            "content": "<p>Hi</p>",
            "excerpt": "Hi",
            "image_url": null,
            "status": "published",
            "author_name": "Admin",
            "author_id": null,
            "tags": ["news"],
            "slug": "hello",
            "created_at": "2026-03-01T10:00:00Z",
            "updated_at": "2026-03-01T10:00:00Z",
            "published_at": "2026-03-01T10:00:00Z"
        }"#;
        let post: BlogPost = serde_json::from_str(json).unwrap();
        assert!(post.is_published());
        assert!(post.has_tag("news"));
        assert!(!post.has_tag("News"));
    }

    #[test]
    fn update_serializes_only_changed_fields() {
        let update = UpdatePost {
            title: Some("New title".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({ "title": "New title" }));
        assert!(UpdatePost::default().is_empty());
    }

    #[test]
    fn update_merges_into_post() {
        let mut post = sample();
        let update = UpdatePost {
            tags: Some(vec!["kitchen".to_string()]),
            status: Some(PostStatus::Published),
            ..Default::default()
        };
        update.apply_to(&mut post);
        assert_eq!(post.title, "Spring cleaning");
        assert_eq!(post.tags, vec!["kitchen".to_string()]);
        assert!(post.is_published());
    }
}
