//! HTTP client for the hosted backend.
//!
//! Speaks the PostgREST dialect for rows (`/rest/v1/<table>`) and the
//! GoTrue dialect for authentication (`/auth/v1/...`). The issued session
//! is kept in memory and session changes are broadcast locally, the same
//! way the provider's own client library behaves.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::{
    AUTH_EVENT_CAPACITY, AuthBackend, AuthChange, AuthSession, AuthUser, BackendError,
    PostBackend, SearchScope, distinct_tags,
};
use crate::models::{BlogPost, PostRecord, PostStatus, Profile, UpdatePost};

const POSTS_TABLE: &str = "blog_posts";
const PROFILES_TABLE: &str = "profiles";

/// Client for the hosted database-as-a-service.
pub struct HostedBackend {
    client: Client,
    base_url: Url,
    anon_key: String,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthChange>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl From<UserResponse> for AuthUser {
    fn from(user: UserResponse) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.user_metadata.name.or(user.user_metadata.full_name),
            avatar_url: user.user_metadata.avatar_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsRow {
    #[serde(default)]
    tags: Vec<String>,
}

impl HostedBackend {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, BackendError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(anon_key) {
            headers.insert("apikey", value);
        } else {
            warn!("backend anon key is not a valid header value; requests will be anonymous");
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            client,
            base_url,
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
            events,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base_url.join(path)?)
    }

    fn table(&self, table: &str) -> Result<Url, BackendError> {
        self.endpoint(&format!("rest/v1/{table}"))
    }

    /// Bearer token: the session's access token, or the anon key.
    fn bearer(&self) -> String {
        let token = self
            .session
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        format!("Bearer {token}")
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, self.bearer())
    }

    fn select_posts(&self) -> Result<RequestBuilder, BackendError> {
        Ok(self
            .authorized(self.client.get(self.table(POSTS_TABLE)?))
            .query(&[("select", "*"), ("order", "created_at.desc")]))
    }

    async fn rows<T: DeserializeOwned>(request: RequestBuilder) -> Result<Vec<T>, BackendError> {
        let response = check(request.send().await?).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn single(request: RequestBuilder) -> Result<BlogPost, BackendError> {
        Self::rows::<BlogPost>(request)
            .await?
            .into_iter()
            .next()
            .ok_or(BackendError::NotFound)
    }

    fn patch_post(&self, id: Uuid) -> Result<RequestBuilder, BackendError> {
        Ok(self
            .authorized(self.client.patch(self.table(POSTS_TABLE)?))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation"))
    }

    fn emit(&self, change: AuthChange) {
        let _ = self.events.send(change);
    }
}

/// Map non-success responses to `BackendError`.
async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = api_error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    });
    Err(BackendError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Pull a human-readable message out of an error body.
///
/// PostgREST uses `message`, GoTrue uses `error_description` or `msg`.
fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error_description", "msg", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Build the `or=(...)` filter for a text search.
///
/// PostgREST treats `,`, `(`, `)` and `*` as syntax inside the filter, so
/// they are stripped from the user's query.
fn search_filter(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"' | '\\'))
        .collect();
    let term = cleaned.trim();
    format!("(title.ilike.*{term}*,content.ilike.*{term}*,excerpt.ilike.*{term}*)")
}

/// Array containment filter for one tag.
fn tag_filter(tag: &str) -> String {
    let escaped = tag.replace('\\', "\\\\").replace('"', "\\\"");
    format!("cs.{{\"{escaped}\"}}")
}

#[async_trait]
impl AuthBackend for HostedBackend {
    async fn current_session(&self) -> Result<Option<AuthSession>, BackendError> {
        let Some(session) = self.session.read().clone() else {
            return Ok(None);
        };

        let response = self
            .authorized(self.client.get(self.endpoint("auth/v1/user")?))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("stored session rejected by auth service");
            *self.session.write() = None;
            return Ok(None);
        }

        let body = check(response).await?.bytes().await?;
        let user: UserResponse = serde_json::from_slice(&body)?;
        Ok(Some(AuthSession {
            access_token: session.access_token,
            user: user.into(),
        }))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        let response = self
            .client
            .post(self.endpoint("auth/v1/token")?)
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
        ) {
            return Err(BackendError::InvalidCredentials);
        }

        let body = check(response).await?.bytes().await?;
        let token: TokenResponse = serde_json::from_slice(&body)?;
        let session = AuthSession {
            access_token: token.access_token,
            user: token.user.into(),
        };

        *self.session.write() = Some(session.clone());
        self.emit(AuthChange::SignedIn(Some(session.clone())));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let bearer = self.bearer();
        // The local session goes first so a failed remote call never
        // leaves the client signed in.
        *self.session.write() = None;
        self.emit(AuthChange::SignedOut);

        let response = self
            .client
            .post(self.endpoint("auth/v1/logout")?)
            .header(AUTHORIZATION, bearer)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>, BackendError> {
        let request = self
            .authorized(self.client.get(self.table(PROFILES_TABLE)?))
            .query(&[("select", "*".to_string()), ("id", format!("eq.{user_id}"))]);
        Ok(Self::rows::<Profile>(request).await?.into_iter().next())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

#[async_trait]
impl PostBackend for HostedBackend {
    async fn fetch_all(&self) -> Result<Vec<BlogPost>, BackendError> {
        Self::rows(self.select_posts()?).await
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<BlogPost>, BackendError> {
        let request = self.select_posts()?.query(&[("id", format!("eq.{id}"))]);
        Ok(Self::rows(request).await?.into_iter().next())
    }

    async fn fetch_by_slug(&self, slug: &str) -> Result<Option<BlogPost>, BackendError> {
        let request = self.select_posts()?.query(&[("slug", format!("eq.{slug}"))]);
        Ok(Self::rows(request).await?.into_iter().next())
    }

    async fn fetch_by_status(&self, status: PostStatus) -> Result<Vec<BlogPost>, BackendError> {
        let request = self
            .select_posts()?
            .query(&[("status", format!("eq.{status}"))]);
        Self::rows(request).await
    }

    async fn fetch_by_tag(&self, tag: &str) -> Result<Vec<BlogPost>, BackendError> {
        let request = self.select_posts()?.query(&[
            ("status", format!("eq.{}", PostStatus::Published)),
            ("tags", tag_filter(tag)),
        ]);
        Self::rows(request).await
    }

    async fn search(
        &self,
        query: &str,
        scope: SearchScope,
    ) -> Result<Vec<BlogPost>, BackendError> {
        let mut request = self.select_posts()?.query(&[("or", search_filter(query))]);
        if scope == SearchScope::Published {
            request = request.query(&[("status", format!("eq.{}", PostStatus::Published))]);
        }
        Self::rows(request).await
    }

    async fn fetch_published_tags(&self) -> Result<Vec<String>, BackendError> {
        let request = self
            .authorized(self.client.get(self.table(POSTS_TABLE)?))
            .query(&[
                ("select", "tags".to_string()),
                ("status", format!("eq.{}", PostStatus::Published)),
                ("order", "created_at.desc".to_string()),
            ]);
        let rows: Vec<TagsRow> = Self::rows(request).await?;
        Ok(distinct_tags(rows.iter().flat_map(|r| r.tags.iter())))
    }

    async fn insert(&self, record: &PostRecord) -> Result<BlogPost, BackendError> {
        let request = self
            .authorized(self.client.post(self.table(POSTS_TABLE)?))
            .header("Prefer", "return=representation")
            .json(&[record]);
        Self::single(request).await
    }

    async fn update(&self, id: Uuid, changes: &UpdatePost) -> Result<BlogPost, BackendError> {
        Self::single(self.patch_post(id)?.json(changes)).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), BackendError> {
        let request = self
            .authorized(self.client.delete(self.table(POSTS_TABLE)?))
            .query(&[("id", format!("eq.{id}"))]);
        check(request.send().await?).await?;
        Ok(())
    }

    async fn publish(
        &self,
        id: Uuid,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<BlogPost, BackendError> {
        let changes = UpdatePost {
            status: Some(PostStatus::Published),
            published_at,
            ..Default::default()
        };
        Self::single(self.patch_post(id)?.json(&changes)).await
    }

    async fn unpublish(&self, id: Uuid) -> Result<BlogPost, BackendError> {
        let changes = UpdatePost {
            status: Some(PostStatus::Draft),
            ..Default::default()
        };
        Self::single(self.patch_post(id)?.json(&changes)).await
    }
}
