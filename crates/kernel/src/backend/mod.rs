//! Hosted backend abstraction.
//!
//! Authentication and row storage are delegated to an external
//! database-as-a-service. The kernel talks to it only through the two
//! traits below, so the session and content services can run against the
//! real HTTP client or the in-memory implementation.

mod memory;
mod rest;

pub use memory::MemoryBackend;
pub use rest::HostedBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{BlogPost, PostRecord, PostStatus, Profile, UpdatePost};

/// Capacity of auth change broadcast channels.
pub const AUTH_EVENT_CAPACITY: usize = 16;

/// Backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message} (status {status})")]
    Api { status: u16, message: String },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("not found")]
    NotFound,

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
}

/// Identity attached to a remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Remote session issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
}

/// Session change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChange {
    SignedIn(Option<AuthSession>),
    TokenRefreshed(Option<AuthSession>),
    UserUpdated(Option<AuthSession>),
    SignedOut,
}

impl AuthChange {
    /// Session carried by the notification, if any.
    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            AuthChange::SignedIn(s) | AuthChange::TokenRefreshed(s) | AuthChange::UserUpdated(s) => {
                s.as_ref()
            }
            AuthChange::SignedOut => None,
        }
    }
}

/// Which posts a text search covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Published,
    All,
}

/// Email/password authentication with change notifications.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Current remote session, if one is active.
    async fn current_session(&self) -> Result<Option<AuthSession>, BackendError>;

    /// Verify credentials and issue a session.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError>;

    /// Invalidate the current session.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Look up the `profiles` row for a user.
    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>, BackendError>;

    /// Subscribe to session change notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

/// Row operations against `blog_posts`.
#[async_trait]
pub trait PostBackend: Send + Sync {
    /// All posts visible to the caller, newest first.
    async fn fetch_all(&self) -> Result<Vec<BlogPost>, BackendError>;

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<BlogPost>, BackendError>;

    async fn fetch_by_slug(&self, slug: &str) -> Result<Option<BlogPost>, BackendError>;

    async fn fetch_by_status(&self, status: PostStatus) -> Result<Vec<BlogPost>, BackendError>;

    /// Published posts carrying `tag`.
    async fn fetch_by_tag(&self, tag: &str) -> Result<Vec<BlogPost>, BackendError>;

    /// Case-insensitive search over title, content and excerpt.
    async fn search(&self, query: &str, scope: SearchScope)
    -> Result<Vec<BlogPost>, BackendError>;

    /// Distinct tags across published posts, in first-seen order.
    async fn fetch_published_tags(&self) -> Result<Vec<String>, BackendError>;

    async fn insert(&self, record: &PostRecord) -> Result<BlogPost, BackendError>;

    async fn update(&self, id: Uuid, changes: &UpdatePost) -> Result<BlogPost, BackendError>;

    async fn delete(&self, id: Uuid) -> Result<(), BackendError>;

    /// Flip to published. `published_at` is written only when `Some`.
    async fn publish(
        &self,
        id: Uuid,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<BlogPost, BackendError>;

    /// Flip to draft. `published_at` is left as is.
    async fn unpublish(&self, id: Uuid) -> Result<BlogPost, BackendError>;
}

/// Deduplicate tags keeping first-seen order.
pub fn distinct_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}
