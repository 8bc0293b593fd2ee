//! In-memory backend.
//!
//! Implements both backend traits without a network. Used when no
//! `BACKEND_URL` is configured and by the test suite, which relies on the
//! call counter, injected failures and artificial latency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::{
    AUTH_EVENT_CAPACITY, AuthBackend, AuthChange, AuthSession, AuthUser, BackendError,
    PostBackend, SearchScope, distinct_tags,
};
use crate::models::{BlogPost, PostRecord, PostStatus, Profile, UpdatePost};

struct Account {
    password: String,
    user: AuthUser,
}

/// Backend that keeps accounts, profiles and posts in process memory.
pub struct MemoryBackend {
    accounts: RwLock<HashMap<String, Account>>,
    profiles: RwLock<HashMap<Uuid, Profile>>,
    posts: RwLock<Vec<BlogPost>>,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthChange>,
    calls: AtomicUsize,
    fail_next: Mutex<Option<String>>,
    fail_sign_out: Mutex<bool>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            accounts: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            posts: RwLock::new(Vec::new()),
            session: RwLock::new(None),
            events,
            calls: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
            fail_sign_out: Mutex::new(false),
            latency: Mutex::new(None),
        }
    }

    /// Register an account. Returns the new user id.
    pub fn add_account(&self, email: &str, password: &str, display_name: Option<&str>) -> Uuid {
        let id = Uuid::now_v7();
        let user = AuthUser {
            id,
            email: Some(email.to_string()),
            display_name: display_name.map(str::to_string),
            avatar_url: None,
        };
        self.accounts.write().insert(
            email.to_lowercase(),
            Account {
                password: password.to_string(),
                user,
            },
        );
        id
    }

    /// Store a `profiles` row.
    pub fn add_profile(&self, profile: Profile) {
        self.profiles.write().insert(profile.id, profile);
    }

    /// Insert a post as-is, bypassing the call counter.
    pub fn seed(&self, post: BlogPost) {
        self.posts.write().push(post);
    }

    /// Snapshot of stored posts.
    pub fn stored_posts(&self) -> Vec<BlogPost> {
        self.posts.read().clone()
    }

    /// Number of remote calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next remote call fail with an API error.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_string());
    }

    /// Make every sign-out fail remotely.
    pub fn fail_sign_out(&self, fail: bool) {
        *self.fail_sign_out.lock() = fail;
    }

    /// Delay every post operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Broadcast a session change as if it came from the provider.
    pub fn emit(&self, change: AuthChange) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(change);
    }

    async fn enter(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = self.fail_next.lock().take() {
            return Err(BackendError::Api {
                status: 500,
                message,
            });
        }
        Ok(())
    }

    fn with_post<F>(&self, id: Uuid, f: F) -> Result<BlogPost, BackendError>
    where
        F: FnOnce(&mut BlogPost),
    {
        let mut posts = self.posts.write();
        let post = posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(BackendError::NotFound)?;
        f(post);
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    fn newest_first(mut posts: Vec<BlogPost>) -> Vec<BlogPost> {
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn current_session(&self) -> Result<Option<AuthSession>, BackendError> {
        self.enter().await?;
        Ok(self.session.read().clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        self.enter().await?;
        let session = {
            let accounts = self.accounts.read();
            let account = accounts
                .get(&email.to_lowercase())
                .filter(|a| a.password == password)
                .ok_or(BackendError::InvalidCredentials)?;
            AuthSession {
                access_token: Uuid::now_v7().simple().to_string(),
                user: account.user.clone(),
            }
        };
        *self.session.write() = Some(session.clone());
        debug!(user_id = %session.user.id, "memory backend: signed in");
        self.emit(AuthChange::SignedIn(Some(session.clone())));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.enter().await?;
        if *self.fail_sign_out.lock() {
            return Err(BackendError::Api {
                status: 503,
                message: "auth service unavailable".to_string(),
            });
        }
        *self.session.write() = None;
        self.emit(AuthChange::SignedOut);
        Ok(())
    }

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>, BackendError> {
        self.enter().await?;
        Ok(self.profiles.read().get(&user_id).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

#[async_trait]
impl PostBackend for MemoryBackend {
    async fn fetch_all(&self) -> Result<Vec<BlogPost>, BackendError> {
        self.enter().await?;
        Ok(Self::newest_first(self.posts.read().clone()))
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<BlogPost>, BackendError> {
        self.enter().await?;
        Ok(self.posts.read().iter().find(|p| p.id == id).cloned())
    }

    async fn fetch_by_slug(&self, slug: &str) -> Result<Option<BlogPost>, BackendError> {
        self.enter().await?;
        Ok(self.posts.read().iter().find(|p| p.slug == slug).cloned())
    }

    async fn fetch_by_status(&self, status: PostStatus) -> Result<Vec<BlogPost>, BackendError> {
        self.enter().await?;
        let posts = self
            .posts
            .read()
            .iter()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        Ok(Self::newest_first(posts))
    }

    async fn fetch_by_tag(&self, tag: &str) -> Result<Vec<BlogPost>, BackendError> {
        self.enter().await?;
        let posts = self
            .posts
            .read()
            .iter()
            .filter(|p| p.is_published() && p.has_tag(tag))
            .cloned()
            .collect();
        Ok(Self::newest_first(posts))
    }

    async fn search(
        &self,
        query: &str,
        scope: SearchScope,
    ) -> Result<Vec<BlogPost>, BackendError> {
        self.enter().await?;
        let needle = query.to_lowercase();
        let posts = self
            .posts
            .read()
            .iter()
            .filter(|p| scope == SearchScope::All || p.is_published())
            .filter(|p| {
                p.title.to_lowercase().contains(&needle)
                    || p.content.to_lowercase().contains(&needle)
                    || p.excerpt.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        Ok(Self::newest_first(posts))
    }

    async fn fetch_published_tags(&self) -> Result<Vec<String>, BackendError> {
        self.enter().await?;
        let posts = Self::newest_first(self.posts.read().clone());
        Ok(distinct_tags(
            posts
                .iter()
                .filter(|p| p.is_published())
                .flat_map(|p| p.tags.iter()),
        ))
    }

    async fn insert(&self, record: &PostRecord) -> Result<BlogPost, BackendError> {
        self.enter().await?;
        let now = Utc::now();
        let post = BlogPost {
            id: Uuid::now_v7(),
            title: record.title.clone(),
            content: record.content.clone(),
            excerpt: record.excerpt.clone(),
            image_url: record.image_url.clone(),
            status: record.status,
            author_name: record.author_name.clone(),
            author_id: record.author_id,
            tags: record.tags.clone(),
            slug: record.slug.clone(),
            created_at: now,
            updated_at: now,
            published_at: record.published_at,
        };
        let mut posts = self.posts.write();
        if posts.iter().any(|p| p.slug == post.slug) {
            return Err(BackendError::Api {
                status: 409,
                message: format!("duplicate slug: {}", post.slug),
            });
        }
        posts.push(post.clone());
        Ok(post)
    }

    async fn update(&self, id: Uuid, changes: &UpdatePost) -> Result<BlogPost, BackendError> {
        self.enter().await?;
        self.with_post(id, |post| changes.apply_to(post))
    }

    async fn delete(&self, id: Uuid) -> Result<(), BackendError> {
        self.enter().await?;
        self.posts.write().retain(|p| p.id != id);
        Ok(())
    }

    async fn publish(
        &self,
        id: Uuid,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<BlogPost, BackendError> {
        self.enter().await?;
        self.with_post(id, |post| {
            post.status = PostStatus::Published;
            if published_at.is_some() {
                post.published_at = published_at;
            }
        })
    }

    async fn unpublish(&self, id: Uuid) -> Result<BlogPost, BackendError> {
        self.enter().await?;
        self.with_post(id, |post| post.status = PostStatus::Draft)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(title: &str, slug: &str, status: PostStatus) -> PostRecord {
        PostRecord {
            title: title.to_string(),
            content: format!("<p>{title}</p>"),
            excerpt: title.to_string(),
            image_url: None,
            status,
            author_name: "Admin".to_string(),
            author_id: None,
            tags: vec!["tips".to_string()],
            slug: slug.to_string(),
            published_at: None,
        }
    }

    #[tokio::test]
    async fn sign_in_rejects_wrong_password() {
        let backend = MemoryBackend::new();
        backend.add_account("admin@example.com", "secret", None);
        let err = backend
            .sign_in_with_password("admin@example.com", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidCredentials));
        assert!(backend.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_in_broadcasts_change() {
        let backend = MemoryBackend::new();
        backend.add_account("Admin@Example.com", "secret", Some("Ana"));
        let mut rx = backend.subscribe();
        backend
            .sign_in_with_password("admin@example.com", "secret")
            .await
            .unwrap();
        let change = rx.recv().await.unwrap();
        let session = change.session().unwrap();
        assert_eq!(session.user.display_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_slug() {
        let backend = MemoryBackend::new();
        backend
            .insert(&record("One", "same", PostStatus::Draft))
            .await
            .unwrap();
        let err = backend
            .insert(&record("Two", "same", PostStatus::Draft))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Api { status: 409, .. }));
    }

    #[tokio::test]
    async fn search_respects_scope() {
        let backend = MemoryBackend::new();
        backend
            .insert(&record("Oven care", "oven-care", PostStatus::Draft))
            .await
            .unwrap();
        backend
            .insert(&record("Oven myths", "oven-myths", PostStatus::Published))
            .await
            .unwrap();
        let public = backend.search("OVEN", SearchScope::Published).await.unwrap();
        assert_eq!(public.len(), 1);
        let all = backend.search("oven", SearchScope::All).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn failure_injection_is_one_shot() {
        let backend = MemoryBackend::new();
        backend.fail_next("boom");
        assert!(backend.fetch_all().await.is_err());
        assert!(backend.fetch_all().await.is_ok());
        assert_eq!(backend.call_count(), 2);
    }
}
