//! End-to-end coverage of the OAuth callback flow: code exchange, user
//! upsert, session promotion, JWT mint, and redirect-origin validation.

use std::sync::Arc;

use async_trait::async_trait;
use aya_core::audit::AuditLog;
use aya_core::auth::jwt::JwtCodec;
use aya_core::auth::oauth::{OAuthIdentity, Provider};
use aya_core::auth::AuthCore;
use aya_core::error::Result;
use mockable::DefaultClock;
use zeroize::Zeroizing;

struct StubProvider;

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn authorization_url(&self, state: &str, callback_url: &str) -> String {
        format!("https://provider.example/authorize?state={state}&callback={callback_url}")
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthIdentity> {
        Ok(OAuthIdentity {
            provider: "stub".to_owned(),
            remote_id: format!("remote-{code}"),
            username: "new.user".to_owned(),
            name: "New User".to_owned(),
            email: "new.user@example.com".to_owned(),
            uri: None,
            access_token: "access-token".to_owned(),
            refresh_token: Some("refresh-token".to_owned()),
            scope: "profile email".to_owned(),
            expires_at: None,
        })
    }
}

fn auth_core(cors_allowed_origins: Vec<String>) -> AuthCore {
    AuthCore::new(
        JwtCodec::new(Zeroizing::new("integration-test-secret-value".to_owned())),
        Arc::new(AuditLog::new(Arc::new(DefaultClock))),
        Arc::new(DefaultClock),
        cors_allowed_origins,
        chrono::Duration::days(365),
        1000,
    )
}

#[tokio::test]
async fn callback_mints_a_session_jwt_and_appends_it_to_an_allowed_redirect() {
    let core = auth_core(vec!["https://aya.is".to_owned()]);
    let pending = core.sessions.create_oauth_pending(
        "state-token".to_owned(),
        None,
        "https://aya.is/dashboard".to_owned(),
    );

    let result = core.handle_callback(&StubProvider, "auth-code-1", pending.id).await.unwrap();

    assert!(result.redirect_uri.starts_with("https://aya.is/dashboard?auth_token="));
    assert_eq!(result.user.email, "new.user@example.com");

    let session = core.sessions.get_active(result.session_id).expect("session should be active");
    assert_eq!(session.logged_in_user_id, Some(result.user.id));
}

#[tokio::test]
async fn callback_rejects_a_redirect_whose_origin_is_not_cors_allowed() {
    let core = auth_core(vec!["https://aya.is".to_owned()]);
    let pending = core.sessions.create_oauth_pending(
        "state-token".to_owned(),
        None,
        "https://attacker.example/phish".to_owned(),
    );

    let result = core.handle_callback(&StubProvider, "auth-code-2", pending.id).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn second_login_with_same_remote_identity_updates_rather_than_duplicates_the_user() {
    let core = auth_core(vec!["https://aya.is".to_owned()]);

    let first_pending = core.sessions.create_oauth_pending(
        "state-1".to_owned(),
        None,
        "https://aya.is/dashboard".to_owned(),
    );
    let first = core.handle_callback(&StubProvider, "same-code", first_pending.id).await.unwrap();

    let second_pending = core.sessions.create_oauth_pending(
        "state-2".to_owned(),
        None,
        "https://aya.is/dashboard".to_owned(),
    );
    let second = core.handle_callback(&StubProvider, "same-code", second_pending.id).await.unwrap();

    assert_eq!(first.user.id, second.user.id);
    assert_ne!(first.session_id, second.session_id);
}
