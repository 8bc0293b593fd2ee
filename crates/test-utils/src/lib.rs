#![allow(clippy::expect_used)]
//! Lustra test utilities.
//!
//! Helpers for integration testing: post fixtures, an in-memory
//! application wired the same way the binary wires it, and a counting
//! image host.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use lustra_kernel::AppState;
use lustra_kernel::backend::MemoryBackend;
use lustra_kernel::content::{DEFAULT_LOAD_TIMEOUT, slugify};
use lustra_kernel::media::{ImageHost, ImageUpload, ImageUploader, UploadError, UploadedImage};
use lustra_kernel::models::{BlogPost, NewPost, PostStatus};

pub const ADMIN_EMAIL: &str = "admin@lustra.test";
pub const ADMIN_PASSWORD: &str = "correct horse";
pub const ADMIN_NAME: &str = "Marie Lustra";

/// Bound on waits for background state to settle.
pub const SETTLE: Duration = Duration::from_secs(5);

/// Create a draft post fixture with default values.
pub fn test_post(title: &str) -> TestPost {
    let now = Utc::now();
    TestPost {
        id: Uuid::now_v7(),
        title: title.to_string(),
        content: format!("<p>{title}</p>"),
        excerpt: title.to_string(),
        image_url: None,
        status: PostStatus::Draft,
        author_name: ADMIN_NAME.to_string(),
        tags: Vec::new(),
        slug: slugify(title),
        created_at: now,
        published_at: None,
    }
}

/// A post builder for seeding the in-memory backend.
#[derive(Debug, Clone)]
pub struct TestPost {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub image_url: Option<String>,
    pub status: PostStatus,
    pub author_name: String,
    pub tags: Vec<String>,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl TestPost {
    /// Set as published now.
    pub fn published(mut self) -> Self {
        self.status = PostStatus::Published;
        self.published_at = Some(self.created_at);
        self
    }

    pub fn with_slug(mut self, slug: &str) -> Self {
        self.slug = slug.to_string();
        self
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Shift the creation time, for ordering.
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn build(self) -> BlogPost {
        BlogPost {
            id: self.id,
            title: self.title,
            content: self.content,
            excerpt: self.excerpt,
            image_url: self.image_url,
            status: self.status,
            author_name: self.author_name,
            author_id: None,
            tags: self.tags,
            slug: self.slug,
            created_at: self.created_at,
            updated_at: self.created_at,
            published_at: self.published_at,
        }
    }
}

/// Author input for a draft.
pub fn new_post(title: &str, content: &str) -> NewPost {
    NewPost {
        title: title.to_string(),
        content: content.to_string(),
        ..NewPost::default()
    }
}

/// A single paragraph with exactly `chars` characters of text.
pub fn long_content(chars: usize) -> String {
    let mut text: String = "Spotless floors every week. "
        .chars()
        .cycle()
        .take(chars)
        .collect();
    if text.ends_with(' ') {
        text.pop();
        text.push('.');
    }
    format!("<p>{text}</p>")
}

/// In-memory application with an admin account.
pub struct TestApp {
    pub backend: Arc<MemoryBackend>,
    pub host: Arc<CountingImageHost>,
    pub state: AppState,
}

impl TestApp {
    /// Build an app without starting it.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_LOAD_TIMEOUT)
    }

    pub fn with_timeout(load_timeout: Duration) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_account(ADMIN_EMAIL, ADMIN_PASSWORD, Some(ADMIN_NAME));
        let host = Arc::new(CountingImageHost::default());
        let state = AppState::with_services(
            backend.clone(),
            backend.clone(),
            ImageUploader::new(host.clone()),
            load_timeout,
        );
        Self {
            backend,
            host,
            state,
        }
    }

    /// Start services and wait for the initial session check and the
    /// public load to settle.
    pub async fn start(self) -> Self {
        self.state.start();
        self.state.session().ready().await;
        self.wait_published().await;
        self
    }

    /// Sign in as the admin and wait for the admin collection.
    pub async fn sign_in(&self) {
        let session = self.state.session();
        session
            .login(ADMIN_EMAIL, ADMIN_PASSWORD)
            .await
            .expect("admin login");
        let mut rx = session.subscribe();
        tokio::time::timeout(SETTLE, rx.wait_for(|s| s.is_authenticated()))
            .await
            .expect("sign-in notification")
            .expect("session open");
        let mut rx = self.state.content().subscribe();
        tokio::time::timeout(SETTLE, rx.wait_for(|c| c.admin_loaded))
            .await
            .expect("admin collection")
            .expect("store open");
    }

    /// Wait until the public collection has loaded or failed.
    pub async fn wait_published(&self) {
        let mut rx = self.state.content().subscribe();
        tokio::time::timeout(
            SETTLE,
            rx.wait_for(|c| c.published_loaded || c.public_error.is_some()),
        )
        .await
        .expect("public collection")
        .expect("store open");
    }

    pub async fn shutdown(&self) {
        self.state.shutdown().await;
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Image host that records uploads and returns a fixed asset.
#[derive(Debug, Default)]
pub struct CountingImageHost {
    calls: AtomicUsize,
}

impl CountingImageHost {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageHost for CountingImageHost {
    async fn upload(
        &self,
        image: &ImageUpload,
        _mime_type: &str,
    ) -> Result<UploadedImage, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(UploadedImage {
            public_id: format!("blog/{}", image.filename),
            secure_url: format!("https://images.lustra.test/blog/{}", image.filename),
            width: None,
            height: None,
            format: None,
            bytes: Some(image.data.len() as u64),
        })
    }
}
