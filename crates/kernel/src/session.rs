//! Session manager.
//!
//! Tracks the single authenticated identity as a projection of the auth
//! provider's session. State is published on a watch channel so the
//! content store and the CLI can react to sign-in and sign-out.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{AuthBackend, AuthChange, AuthSession, BackendError};
use crate::error::SessionError;
use crate::models::user::email_local_part;
use crate::models::{Role, SessionUser};

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<SessionUser>,
    /// True until the startup session check settles.
    pub is_loading: bool,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            user: None,
            is_loading: true,
        }
    }
}

/// Service exposing the current identity plus login and logout.
#[derive(Clone)]
pub struct SessionService {
    inner: Arc<SessionServiceInner>,
}

struct SessionServiceInner {
    auth: Arc<dyn AuthBackend>,
    state: watch::Sender<SessionState>,
    /// Cleared on shutdown; checked before every state update.
    alive: AtomicBool,
    /// Bumped on logout so an in-flight projection is discarded.
    epoch: AtomicU64,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionService {
    /// Create a session service. Call [`start`](Self::start) to begin
    /// tracking the remote session.
    pub fn new(auth: Arc<dyn AuthBackend>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionServiceInner {
                auth,
                state,
                alive: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
                stop,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.inner.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to change notifications, then check the current session
    /// once. Both run on a background task until [`shutdown`](Self::shutdown).
    pub fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() || !self.inner.alive.load(Ordering::SeqCst) {
            return;
        }

        // Subscribe before the check so no notification is missed.
        let changes = self.inner.auth.subscribe();
        let stop_rx = self.inner.stop.subscribe();
        let service = self.clone();
        *task = Some(tokio::spawn(async move {
            service.run(changes, stop_rx).await;
        }));
    }

    /// Wait until the startup check has settled.
    pub async fn ready(&self) {
        let mut rx = self.subscribe();
        // Err only if the sender is gone, which cannot happen while `self`
        // holds it.
        let _ = rx.wait_for(|s| !s.is_loading).await;
    }

    async fn run(
        &self,
        mut changes: broadcast::Receiver<AuthChange>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        tokio::select! {
            _ = stop_rx.changed() => return,
            res = self.inner.auth.current_session() => {
                let user = match res {
                    Ok(Some(session)) => self.project(&session).await,
                    Ok(None) => None,
                    Err(e) => {
                        warn!(error = %e, "session check failed");
                        None
                    }
                };
                // Loading ends even when a logout made the result stale.
                let current = self.inner.epoch.load(Ordering::SeqCst) == epoch;
                self.update(|state| {
                    if current {
                        state.user = user;
                    }
                    state.is_loading = false;
                });
            }
        }

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        debug!("session watcher stopping");
                        break;
                    }
                }
                change = changes.recv() => match change {
                    Ok(change) => self.handle_change(change).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session notifications lagged; rechecking");
                        self.recheck().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    async fn handle_change(&self, change: AuthChange) {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let user = match change.session() {
            Some(session) => self.project(session).await,
            None => None,
        };
        match &user {
            Some(user) => info!(user_id = %user.id, "session established"),
            None => debug!("session cleared"),
        }
        self.apply(epoch, |state| {
            state.user = user;
            state.is_loading = false;
        });
    }

    async fn recheck(&self) {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let user = match self.inner.auth.current_session().await {
            Ok(Some(session)) => self.project(&session).await,
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "session recheck failed");
                return;
            }
        };
        self.apply(epoch, |state| state.user = user);
    }

    /// Project a remote session into a [`SessionUser`].
    ///
    /// A session without an email is invalid. The display name comes from
    /// the profile row, then auth metadata, then the email local-part.
    async fn project(&self, session: &AuthSession) -> Option<SessionUser> {
        let auth_user = &session.user;
        let email = auth_user.email.as_deref().filter(|e| !e.is_empty())?;

        let profile = match self.inner.auth.fetch_profile(auth_user.id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id = %auth_user.id, error = %e, "profile lookup failed");
                None
            }
        };
        let profile_name = profile
            .as_ref()
            .and_then(|p| p.name.as_deref())
            .filter(|n| !n.trim().is_empty());
        let name = profile_name
            .or(auth_user.display_name.as_deref().filter(|n| !n.trim().is_empty()))
            .unwrap_or_else(|| email_local_part(email))
            .to_string();
        let avatar_url = profile
            .and_then(|p| p.avatar_url)
            .or_else(|| auth_user.avatar_url.clone());

        Some(SessionUser {
            id: auth_user.id,
            email: email.to_string(),
            name,
            avatar_url,
            role: Role::Admin,
        })
    }

    /// Apply a state update unless the service is shut down or a logout
    /// happened since `epoch` was read.
    fn apply<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce(&mut SessionState),
    {
        self.update(|state| {
            if self.inner.epoch.load(Ordering::SeqCst) == epoch {
                f(state);
            }
        });
    }

    /// Apply a state update unless the service is shut down. Watchers are
    /// notified only when the state actually changed.
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionState),
    {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return;
        }
        self.inner.state.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            *state != before
        });
    }

    /// Sign in with email and password.
    ///
    /// Does not set the user; the sign-in notification does.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), SessionError> {
        match self.inner.auth.sign_in_with_password(email, password).await {
            Ok(session) => {
                info!(user_id = %session.user.id, "login succeeded");
                Ok(())
            }
            Err(BackendError::InvalidCredentials) => {
                debug!("login rejected: invalid credentials");
                Err(SessionError::InvalidCredentials)
            }
            Err(e) => {
                warn!(error = %e, "login failed");
                Err(e.into())
            }
        }
    }

    /// Sign out.
    ///
    /// The user is cleared before this returns; the returned future
    /// performs the remote invalidation, whose failure is only logged.
    pub fn logout(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.update(|state| state.user = None);
        debug!("local session cleared");

        let auth = Arc::clone(&self.inner.auth);
        async move {
            if let Err(e) = auth.sign_out().await {
                warn!(error = %e, "remote sign-out failed");
            }
        }
    }

    /// Stop the watcher. No state is applied afterwards.
    pub async fn shutdown(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        let _ = self.inner.stop.send(true);
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "session watcher ended abnormally");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backend::{AuthUser, MemoryBackend};
    use crate::models::Profile;
    use uuid::Uuid;

    fn session_for(id: Uuid, email: Option<&str>, display: Option<&str>) -> AuthSession {
        AuthSession {
            access_token: "t".into(),
            user: AuthUser {
                id,
                email: email.map(str::to_string),
                display_name: display.map(str::to_string),
                avatar_url: None,
            },
        }
    }

    #[tokio::test]
    async fn name_falls_back_to_local_part() {
        let backend = Arc::new(MemoryBackend::new());
        let service = SessionService::new(backend);
        let user = service
            .project(&session_for(Uuid::now_v7(), Some("jo@shine.test"), None))
            .await
            .unwrap();
        assert_eq!(user.name, "jo");
        assert_eq!(user.role, Role::Admin);
    }

    #[tokio::test]
    async fn profile_name_wins() {
        let backend = Arc::new(MemoryBackend::new());
        let id = Uuid::now_v7();
        backend.add_profile(Profile {
            id,
            email: None,
            name: Some("Jo Brightwell".into()),
            avatar_url: Some("https://img.test/jo.png".into()),
            role: Some("admin".into()),
        });
        let service = SessionService::new(backend);
        let user = service
            .project(&session_for(id, Some("jo@shine.test"), Some("Jo B")))
            .await
            .unwrap();
        assert_eq!(user.name, "Jo Brightwell");
        assert_eq!(user.avatar_url.as_deref(), Some("https://img.test/jo.png"));
    }

    #[tokio::test]
    async fn session_without_email_is_invalid() {
        let service = SessionService::new(Arc::new(MemoryBackend::new()));
        assert!(service.project(&session_for(Uuid::now_v7(), None, None)).await.is_none());
    }

    #[tokio::test]
    async fn starts_loading_then_settles() {
        let service = SessionService::new(Arc::new(MemoryBackend::new()));
        assert!(service.is_loading());
        service.start();
        service.ready().await;
        assert!(!service.is_loading());
        assert!(!service.is_authenticated());
        service.shutdown().await;
    }
}
