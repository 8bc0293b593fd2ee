#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Session manager integration tests.

use lustra_kernel::SessionError;
use lustra_kernel::backend::{AuthBackend, AuthChange, AuthSession, AuthUser};
use lustra_kernel::models::{Profile, Role, SessionUser};
use lustra_test_utils::{ADMIN_EMAIL, ADMIN_NAME, ADMIN_PASSWORD, SETTLE, TestApp};
use uuid::Uuid;

async fn wait_for_user<F>(app: &TestApp, f: F) -> Option<SessionUser>
where
    F: Fn(Option<&SessionUser>) -> bool,
{
    let mut rx = app.state.session().subscribe();
    let state = tokio::time::timeout(SETTLE, rx.wait_for(|s| f(s.user.as_ref())))
        .await
        .expect("session settled")
        .unwrap()
        .clone();
    state.user
}

fn auth_session(id: Uuid, email: Option<&str>) -> AuthSession {
    AuthSession {
        access_token: "token".to_string(),
        user: AuthUser {
            id,
            email: email.map(str::to_string),
            display_name: None,
            avatar_url: None,
        },
    }
}

#[tokio::test]
async fn test_loading_until_initial_check() {
    let app = TestApp::new();
    assert!(app.state.session().is_loading());
    assert!(!app.state.session().is_authenticated());

    app.state.start();
    app.state.session().ready().await;
    assert!(!app.state.session().is_loading());
    assert!(app.state.session().user().is_none());

    app.shutdown().await;
}

#[tokio::test]
async fn test_existing_session_is_restored_on_start() {
    let app = TestApp::new();
    app.backend
        .sign_in_with_password(ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .unwrap();

    let app = app.start().await;
    let user = app.state.session().user().expect("restored user");
    assert_eq!(user.email, ADMIN_EMAIL);

    app.shutdown().await;
}

#[tokio::test]
async fn test_login_converges_through_notification() {
    let app = TestApp::new().start().await;
    app.sign_in().await;

    let user = app.state.session().user().unwrap();
    assert_eq!(user.email, ADMIN_EMAIL);
    assert_eq!(user.name, ADMIN_NAME);
    assert_eq!(user.role, Role::Admin);
    assert!(user.avatar_url.is_none());

    app.shutdown().await;
}

#[tokio::test]
async fn test_invalid_credentials_are_typed() {
    let app = TestApp::new().start().await;

    let err = app
        .state
        .session()
        .login(ADMIN_EMAIL, "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidCredentials));
    assert!(!app.state.session().is_authenticated());

    app.shutdown().await;
}

#[tokio::test]
async fn test_name_falls_back_to_email_local_part() {
    let app = TestApp::new().start().await;
    app.backend.add_account("ines@lustra.test", "pw", None);

    app.state
        .session()
        .login("ines@lustra.test", "pw")
        .await
        .unwrap();
    let user = wait_for_user(&app, |u| u.is_some()).await.unwrap();
    assert_eq!(user.name, "ines");

    app.shutdown().await;
}

#[tokio::test]
async fn test_profile_row_supplies_name_and_avatar() {
    let app = TestApp::new().start().await;
    let id = app.backend.add_account("ana@lustra.test", "pw", Some("ana"));
    app.backend.add_profile(Profile {
        id,
        email: Some("ana@lustra.test".into()),
        name: Some("Ana Costa".into()),
        avatar_url: Some("https://images.lustra.test/ana.png".into()),
        role: Some("admin".into()),
    });

    app.state
        .session()
        .login("ana@lustra.test", "pw")
        .await
        .unwrap();
    let user = wait_for_user(&app, |u| u.is_some()).await.unwrap();
    assert_eq!(user.id, id);
    assert_eq!(user.name, "Ana Costa");
    assert_eq!(
        user.avatar_url.as_deref(),
        Some("https://images.lustra.test/ana.png")
    );

    app.shutdown().await;
}

#[tokio::test]
async fn test_follows_provider_notifications() {
    let app = TestApp::new().start().await;
    let id = Uuid::now_v7();

    app.backend
        .emit(AuthChange::SignedIn(Some(auth_session(id, Some("jo@lustra.test")))));
    let user = wait_for_user(&app, |u| u.is_some()).await.unwrap();
    assert_eq!(user.id, id);
    assert_eq!(user.name, "jo");

    app.backend.emit(AuthChange::SignedOut);
    assert!(wait_for_user(&app, |u| u.is_none()).await.is_none());

    // A session without an email is not a valid identity.
    app.backend
        .emit(AuthChange::SignedIn(Some(auth_session(id, Some("jo@lustra.test")))));
    wait_for_user(&app, |u| u.is_some()).await;
    app.backend
        .emit(AuthChange::UserUpdated(Some(auth_session(id, None))));
    assert!(wait_for_user(&app, |u| u.is_none()).await.is_none());

    app.shutdown().await;
}

#[tokio::test]
async fn test_logout_clears_user_before_remote_call() {
    let app = TestApp::new().start().await;
    app.sign_in().await;
    app.backend.fail_sign_out(true);

    let pending = app.state.session().logout();
    assert!(app.state.session().user().is_none());
    assert!(!app.state.session().is_authenticated());

    // Remote failure does not restore the user.
    pending.await;
    assert!(app.state.session().user().is_none());

    app.shutdown().await;
}

#[tokio::test]
async fn test_no_updates_after_shutdown() {
    let app = TestApp::new().start().await;
    app.shutdown().await;

    app.backend.emit(AuthChange::SignedIn(Some(auth_session(
        Uuid::now_v7(),
        Some("late@lustra.test"),
    ))));
    tokio::task::yield_now().await;
    assert!(app.state.session().user().is_none());
}
