//! Application state shared by every command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::backend::{AuthBackend, HostedBackend, MemoryBackend, PostBackend};
use crate::config::Config;
use crate::content::ContentStore;
use crate::media::{CloudinaryHost, ImageUploader};
use crate::session::SessionService;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Session manager.
    session: SessionService,

    /// Blog content store.
    content: ContentStore,

    /// Cover-image uploader (disabled when no image host is configured).
    uploader: ImageUploader,
}

impl AppState {
    /// Build services from configuration.
    ///
    /// Uses the hosted backend when `BACKEND_URL` is set and the in-memory
    /// backend otherwise.
    pub fn new(config: &Config) -> Result<Self> {
        let (auth, posts): (Arc<dyn AuthBackend>, Arc<dyn PostBackend>) =
            match &config.backend_url {
                Some(url) => {
                    let backend = Arc::new(
                        HostedBackend::new(url, &config.backend_anon_key, config.http_timeout)
                            .context("failed to create hosted backend client")?,
                    );
                    info!(url = %url, "using hosted backend");
                    let auth: Arc<dyn AuthBackend> = backend.clone();
                    let posts: Arc<dyn PostBackend> = backend;
                    (auth, posts)
                }
                None => {
                    let backend = Arc::new(MemoryBackend::new());
                    if let (Some(email), Some(password)) =
                        (&config.admin_email, &config.admin_password)
                    {
                        backend.add_account(email, password, config.admin_name.as_deref());
                    }
                    info!("BACKEND_URL not set; using in-memory backend");
                    let auth: Arc<dyn AuthBackend> = backend.clone();
                    let posts: Arc<dyn PostBackend> = backend;
                    (auth, posts)
                }
            };

        let uploader = match &config.image_host {
            Some(host) => {
                let host = CloudinaryHost::new(host.clone(), config.http_timeout)
                    .context("failed to create image host client")?;
                ImageUploader::new(Arc::new(host))
            }
            None => ImageUploader::disabled(),
        };

        Ok(Self::with_services(
            auth,
            posts,
            uploader,
            config.content_load_timeout,
        ))
    }

    /// Build services over explicit backends.
    pub fn with_services(
        auth: Arc<dyn AuthBackend>,
        posts: Arc<dyn PostBackend>,
        uploader: ImageUploader,
        load_timeout: Duration,
    ) -> Self {
        let session = SessionService::new(auth);
        let content = ContentStore::new(posts, session.clone(), load_timeout);
        Self {
            inner: Arc::new(AppStateInner {
                session,
                content,
                uploader,
            }),
        }
    }

    /// Start the session watcher and the content store.
    pub fn start(&self) {
        self.inner.session.start();
        self.inner.content.start();
    }

    /// Stop background tasks.
    pub async fn shutdown(&self) {
        self.inner.content.shutdown().await;
        self.inner.session.shutdown().await;
    }

    /// Get the session manager.
    pub fn session(&self) -> &SessionService {
        &self.inner.session
    }

    /// Get the content store.
    pub fn content(&self) -> &ContentStore {
        &self.inner.content
    }

    /// Get the image uploader.
    pub fn uploader(&self) -> &ImageUploader {
        &self.inner.uploader
    }
}
