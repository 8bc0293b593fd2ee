//! Content store.
//!
//! Holds the public collection (published posts, loaded for everyone) and
//! the admin collection (every post, loaded only while someone is signed
//! in) and keeps both in step with the remote store.
//!
//! Reads degrade to empty results and record the failure in
//! `public_error`/`admin_error`. Writes record the failure in
//! `admin_error` and return it. Local collections change only after the
//! remote call succeeds, and writes run one at a time in issue order.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::excerpt::excerpt_for;
use super::load::{LoadGuard, LoadTicket, run_bounded};
use super::slug::{slugify, unique_slug};
use crate::backend::{BackendError, PostBackend, SearchScope, distinct_tags};
use crate::editor::markup;
use crate::error::{ContentError, ContentResult};
use crate::models::{BlogPost, NewPost, PostRecord, PostStatus, SessionUser, UpdatePost};
use crate::policy::Operation;
use crate::session::{SessionService, SessionState};

/// Default bound on collection loads.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Remote slug lookups attempted before accepting a candidate unchecked.
const MAX_SLUG_PROBES: usize = 8;

/// Observable store state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentState {
    pub published_posts: Vec<BlogPost>,
    pub is_loading_published: bool,
    pub public_error: Option<String>,
    pub published_loaded: bool,
    pub posts: Vec<BlogPost>,
    pub is_loading_admin: bool,
    pub admin_error: Option<String>,
    pub admin_loaded: bool,
}

/// Blog post store shared by public pages and the admin area.
#[derive(Clone)]
pub struct ContentStore {
    inner: Arc<ContentStoreInner>,
}

struct ContentStoreInner {
    backend: Arc<dyn PostBackend>,
    session: SessionService,
    state: watch::Sender<ContentState>,
    load_timeout: Duration,
    public_load: LoadGuard,
    admin_load: LoadGuard,
    /// FIFO: writes are applied in the order they were issued.
    writes: tokio::sync::Mutex<()>,
    alive: AtomicBool,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ContentStore {
    pub fn new(backend: Arc<dyn PostBackend>, session: SessionService, load_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ContentState::default());
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContentStoreInner {
                backend,
                session,
                state,
                load_timeout,
                public_load: LoadGuard::new(),
                admin_load: LoadGuard::new(),
                writes: tokio::sync::Mutex::new(()),
                alive: AtomicBool::new(true),
                stop,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn snapshot(&self) -> ContentState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ContentState> {
        self.inner.state.subscribe()
    }

    pub fn published_posts(&self) -> Vec<BlogPost> {
        self.inner.state.borrow().published_posts.clone()
    }

    pub fn posts(&self) -> Vec<BlogPost> {
        self.inner.state.borrow().posts.clone()
    }

    /// Load the public collection and follow the session: load the admin
    /// collection on sign-in, clear it on sign-out.
    pub fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() || !self.inner.alive.load(Ordering::SeqCst) {
            return;
        }

        let store = self.clone();
        tokio::spawn(async move {
            store.load_published().await;
        });

        let session_rx = self.inner.session.subscribe();
        let stop_rx = self.inner.stop.subscribe();
        let store = self.clone();
        *task = Some(tokio::spawn(async move {
            store.follow_session(session_rx, stop_rx).await;
        }));
    }

    /// Stop following the session and drop in-flight loads.
    pub async fn shutdown(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        self.inner.public_load.cancel();
        self.inner.admin_load.cancel();
        let _ = self.inner.stop.send(true);
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "session follower ended abnormally");
        }
    }

    async fn follow_session(
        &self,
        mut session_rx: watch::Receiver<SessionState>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut current: Option<Uuid> = None;
        loop {
            let user = session_rx.borrow_and_update().user.as_ref().map(|u| u.id);
            if user != current {
                match user {
                    Some(user_id) => {
                        debug!(%user_id, "session active; loading admin collection");
                        let store = self.clone();
                        tokio::spawn(async move {
                            store.load_admin().await;
                        });
                    }
                    None => self.clear_admin(),
                }
                current = user;
            }

            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                res = session_rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Collection loads
    // ------------------------------------------------------------------

    async fn load_published(&self) {
        let ticket = self.inner.public_load.begin();
        self.update(|s| {
            s.is_loading_published = true;
            s.public_error = None;
        });

        let backend = Arc::clone(&self.inner.backend);
        let res = run_bounded(
            &ticket,
            self.inner.load_timeout,
            backend.fetch_by_status(PostStatus::Published),
        )
        .await;

        match res {
            None => debug!("published load superseded"),
            Some(Ok(posts)) => {
                debug!(count = posts.len(), "published posts loaded");
                self.update_if_current(&self.inner.public_load, &ticket, |s| {
                    s.published_posts = posts;
                    s.published_loaded = true;
                    s.is_loading_published = false;
                });
            }
            Some(Err(e)) => {
                warn!(error = %e, "failed to load published posts");
                let message = e.user_message();
                self.update_if_current(&self.inner.public_load, &ticket, |s| {
                    s.public_error = Some(message);
                    s.is_loading_published = false;
                });
            }
        }
    }

    async fn load_admin(&self) {
        if !self.inner.session.is_authenticated() {
            return;
        }
        let ticket = self.inner.admin_load.begin();
        self.update(|s| {
            s.is_loading_admin = true;
            s.admin_error = None;
        });

        let backend = Arc::clone(&self.inner.backend);
        let res = run_bounded(&ticket, self.inner.load_timeout, backend.fetch_all()).await;

        match res {
            None => debug!("admin load superseded"),
            Some(Ok(posts)) => {
                debug!(count = posts.len(), "admin posts loaded");
                self.update_if_current(&self.inner.admin_load, &ticket, |s| {
                    s.posts = posts;
                    s.admin_loaded = true;
                    s.is_loading_admin = false;
                });
            }
            Some(Err(e)) => {
                warn!(error = %e, "failed to load admin posts");
                let message = e.user_message();
                self.update_if_current(&self.inner.admin_load, &ticket, |s| {
                    s.admin_error = Some(message);
                    s.is_loading_admin = false;
                });
            }
        }
    }

    fn clear_admin(&self) {
        self.inner.admin_load.cancel();
        self.update(|s| {
            s.posts.clear();
            s.admin_error = None;
            s.is_loading_admin = false;
            s.admin_loaded = false;
        });
    }

    /// Force a reload of the public collection.
    pub async fn refresh_published_posts(&self) {
        self.load_published().await;
    }

    /// Force a reload of the admin collection.
    pub async fn refresh_all_posts(&self) -> ContentResult<()> {
        self.authorize(Operation::RefreshAllPosts)?;
        self.load_admin().await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Post by slug, or `None`. Drafts are visible only when signed in.
    pub async fn get_post_by_slug(&self, slug: &str) -> Option<BlogPost> {
        match self.inner.backend.fetch_by_slug(slug).await {
            Ok(Some(post)) if post.is_published() || self.inner.session.is_authenticated() => {
                Some(post)
            }
            Ok(_) => None,
            Err(e) => {
                self.read_failed(Operation::GetPostBySlug, e, false);
                None
            }
        }
    }

    /// Text search over published posts.
    pub async fn search_published_posts(&self, query: &str) -> Vec<BlogPost> {
        let query = query.trim();
        if query.is_empty() {
            return self.published_posts();
        }
        match self.inner.backend.search(query, SearchScope::Published).await {
            Ok(posts) => posts,
            Err(e) => {
                self.read_failed(Operation::SearchPublishedPosts, e, false);
                Vec::new()
            }
        }
    }

    /// Text search over every post. Requires a signed-in admin.
    pub async fn search_all_posts(&self, query: &str) -> ContentResult<Vec<BlogPost>> {
        self.authorize(Operation::SearchAllPosts)?;
        let query = query.trim();
        if query.is_empty() {
            return Ok(self.posts());
        }
        match self.inner.backend.search(query, SearchScope::All).await {
            Ok(posts) => Ok(posts),
            Err(e) => {
                self.read_failed(Operation::SearchAllPosts, e, true);
                Ok(Vec::new())
            }
        }
    }

    /// Published posts carrying exactly `tag`.
    pub async fn get_published_posts_by_tag(&self, tag: &str) -> Vec<BlogPost> {
        match self.inner.backend.fetch_by_tag(tag).await {
            Ok(posts) => posts.into_iter().filter(|p| p.has_tag(tag)).collect(),
            Err(e) => {
                self.read_failed(Operation::GetPublishedPostsByTag, e, false);
                Vec::new()
            }
        }
    }

    /// Distinct tags across published posts.
    pub async fn get_published_tags(&self) -> Vec<String> {
        match self.inner.backend.fetch_published_tags().await {
            Ok(tags) => tags,
            Err(e) => {
                self.read_failed(Operation::GetPublishedTags, e, false);
                Vec::new()
            }
        }
    }

    /// Post from the loaded admin collection. No remote call.
    pub fn get_post(&self, id: Uuid) -> Option<BlogPost> {
        self.inner
            .state
            .borrow()
            .posts
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create a post. The slug is derived from the title and made unique.
    pub async fn create_post(&self, new: NewPost) -> ContentResult<BlogPost> {
        let author = self.author(Operation::CreatePost)?;
        validate_title(&new.title)?;
        validate_content(&new.content)?;

        let _write = self.inner.writes.lock().await;

        let slug = match self.pick_slug(&new.title).await {
            Ok(slug) => slug,
            Err(e) => return Err(self.write_failed(Operation::CreatePost, e)),
        };

        let record = PostRecord {
            title: new.title.trim().to_string(),
            excerpt: excerpt_for(new.excerpt.as_deref(), &new.content),
            content: new.content,
            image_url: new.image_url.filter(|u| !u.trim().is_empty()),
            status: new.status,
            author_name: author.name,
            author_id: Some(author.id),
            tags: normalize_tags(&new.tags),
            slug,
            published_at: (new.status == PostStatus::Published).then(Utc::now),
        };

        match self.inner.backend.insert(&record).await {
            Ok(post) => {
                info!(post_id = %post.id, slug = %post.slug, status = %post.status, "post created");
                self.update(|s| {
                    s.posts.insert(0, post.clone());
                    if post.is_published() {
                        s.published_posts.insert(0, post.clone());
                    }
                });
                Ok(post)
            }
            Err(e) => Err(self.write_failed(Operation::CreatePost, e)),
        }
    }

    /// Update the given fields of a post.
    pub async fn update_post(&self, id: Uuid, mut changes: UpdatePost) -> ContentResult<BlogPost> {
        self.authorize(Operation::UpdatePost)?;
        if let Some(title) = changes.title.take() {
            validate_title(&title)?;
            changes.title = Some(title.trim().to_string());
        }
        if let Some(content) = &changes.content {
            validate_content(content)?;
        }
        if let Some(tags) = changes.tags.take() {
            changes.tags = Some(normalize_tags(&tags));
        }

        let cached = self.get_post(id);
        if changes.excerpt.as_deref().is_some_and(|e| e.trim().is_empty()) {
            // A cleared excerpt is derived again from the content.
            changes.excerpt = changes
                .content
                .as_deref()
                .or(cached.as_ref().map(|p| p.content.as_str()))
                .map(|content| excerpt_for(None, content));
        }
        if changes.is_empty() {
            return cached.ok_or(ContentError::NotFound(id));
        }

        let _write = self.inner.writes.lock().await;
        if changes.status == Some(PostStatus::Published) && changes.published_at.is_none() {
            changes.published_at = match self.publication_time(id).await {
                Ok(at) => at,
                Err(e) => return Err(self.write_failed(Operation::UpdatePost, e)),
            };
        }
        match self.inner.backend.update(id, &changes).await {
            Ok(post) => {
                info!(post_id = %post.id, status = %post.status, "post updated");
                self.reconcile(post.clone());
                Ok(post)
            }
            Err(e) => Err(self.write_failed(Operation::UpdatePost, e)),
        }
    }

    /// Delete a post from the remote store and both collections.
    pub async fn delete_post(&self, id: Uuid) -> ContentResult<()> {
        self.authorize(Operation::DeletePost)?;

        let _write = self.inner.writes.lock().await;
        match self.inner.backend.delete(id).await {
            Ok(()) => {
                info!(post_id = %id, "post deleted");
                self.update(|s| {
                    s.posts.retain(|p| p.id != id);
                    s.published_posts.retain(|p| p.id != id);
                });
                Ok(())
            }
            Err(e) => Err(self.write_failed(Operation::DeletePost, e)),
        }
    }

    /// Publish a post. The first publication time is kept on republish.
    pub async fn publish_post(&self, id: Uuid) -> ContentResult<BlogPost> {
        self.authorize(Operation::PublishPost)?;

        let _write = self.inner.writes.lock().await;
        let published_at = match self.publication_time(id).await {
            Ok(at) => at,
            Err(e) => return Err(self.write_failed(Operation::PublishPost, e)),
        };
        match self.inner.backend.publish(id, published_at).await {
            Ok(post) => {
                info!(post_id = %post.id, slug = %post.slug, "post published");
                self.reconcile(post.clone());
                Ok(post)
            }
            Err(e) => Err(self.write_failed(Operation::PublishPost, e)),
        }
    }

    /// Return a post to draft. `published_at` is left untouched.
    pub async fn unpublish_post(&self, id: Uuid) -> ContentResult<BlogPost> {
        self.authorize(Operation::UnpublishPost)?;

        let _write = self.inner.writes.lock().await;
        match self.inner.backend.unpublish(id).await {
            Ok(post) => {
                info!(post_id = %post.id, "post unpublished");
                self.reconcile(post.clone());
                Ok(post)
            }
            Err(e) => Err(self.write_failed(Operation::UnpublishPost, e)),
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn authorize(&self, op: Operation) -> ContentResult<()> {
        let res = op.authorize(self.inner.session.is_authenticated());
        if res.is_err() {
            debug!(operation = %op, "rejected: not authenticated");
        }
        res
    }

    fn author(&self, op: Operation) -> ContentResult<SessionUser> {
        self.authorize(op)?;
        self.inner
            .session
            .user()
            .ok_or(ContentError::Unauthorized(op.capability()))
    }

    /// Unique slug for `title`, checked against the admin collection and
    /// the remote store.
    async fn pick_slug(&self, title: &str) -> Result<String, BackendError> {
        let base = slugify(title);
        let mut taken: HashSet<String> = self
            .inner
            .state
            .borrow()
            .posts
            .iter()
            .map(|p| p.slug.clone())
            .collect();

        let mut candidate = unique_slug(&base, |s| taken.contains(s));
        for _ in 0..MAX_SLUG_PROBES {
            if self.inner.backend.fetch_by_slug(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            taken.insert(candidate);
            candidate = unique_slug(&base, |s| taken.contains(s));
        }
        Ok(candidate)
    }

    /// `published_at` to send when publishing `id`. Posts missing from the
    /// admin collection are looked up remotely.
    async fn publication_time(
        &self,
        id: Uuid,
    ) -> Result<Option<chrono::DateTime<Utc>>, BackendError> {
        let known = match self.get_post(id) {
            Some(post) => Some(post),
            None => self.inner.backend.fetch_by_id(id).await?,
        };
        Ok(first_publication(known.as_ref()))
    }

    /// Replace `post` in both collections following its status.
    fn reconcile(&self, post: BlogPost) {
        self.update(|s| {
            if let Some(slot) = s.posts.iter_mut().find(|p| p.id == post.id) {
                *slot = post.clone();
            }
            let public = s.published_posts.iter().position(|p| p.id == post.id);
            match (post.is_published(), public) {
                (true, Some(i)) => s.published_posts[i] = post,
                (true, None) => s.published_posts.insert(0, post),
                (false, Some(i)) => {
                    s.published_posts.remove(i);
                }
                (false, None) => {}
            }
        });
    }

    fn read_failed(&self, op: Operation, e: BackendError, admin: bool) {
        let err = ContentError::Remote(e);
        warn!(operation = %op, error = %err, "read failed");
        let message = err.user_message();
        self.update(|s| {
            if admin {
                s.admin_error = Some(message);
            } else {
                s.public_error = Some(message);
            }
        });
    }

    fn write_failed(&self, op: Operation, e: BackendError) -> ContentError {
        let err = ContentError::Remote(e);
        warn!(operation = %op, error = %err, "write failed");
        let message = err.user_message();
        self.update(|s| s.admin_error = Some(message));
        err
    }

    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ContentState),
    {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return;
        }
        self.inner.state.send_modify(f);
    }

    fn update_if_current<F>(&self, guard: &LoadGuard, ticket: &LoadTicket, f: F)
    where
        F: FnOnce(&mut ContentState),
    {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return;
        }
        self.inner.state.send_if_modified(|s| {
            if !guard.is_current(ticket) {
                return false;
            }
            f(s);
            true
        });
    }
}

/// `Some(now)` unless the post is known to have been published before.
fn first_publication(cached: Option<&BlogPost>) -> Option<chrono::DateTime<Utc>> {
    match cached {
        Some(post) if post.published_at.is_some() => None,
        _ => Some(Utc::now()),
    }
}

fn validate_title(title: &str) -> ContentResult<()> {
    if title.trim().is_empty() {
        return Err(ContentError::Validation("Title is required.".to_string()));
    }
    Ok(())
}

fn validate_content(content: &str) -> ContentResult<()> {
    if markup::plain_text(content).is_empty() {
        return Err(ContentError::Validation("Content is required.".to_string()));
    }
    Ok(())
}

/// Trim tags, drop empty ones and duplicates, keep insertion order.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let trimmed: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    distinct_tags(&trimmed)
}
