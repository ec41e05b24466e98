//! OAuth callback handling: exchange code, upsert user, create session,
//! mint JWT, validate redirect origin, append token to redirect.
//! `spec.md` §4.7 steps 1-5.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::oauth::Provider;
use super::{AuthCore, User};
use crate::audit::{ActorKind, RecordParams};
use crate::error::Result;

/// Outcome of a successful callback.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub user: User,
    pub session_id: Uuid,
    pub jwt: String,
    pub expires_at: DateTime<Utc>,
    pub redirect_uri: String,
}

impl AuthCore {
    /// Runs the full callback sequence for a pending session created by
    /// `oauth::initiate`. `pending_session_id` must be the session that
    /// carried the original `state`.
    pub async fn handle_callback(
        &self,
        provider: &dyn Provider,
        code: &str,
        pending_session_id: Uuid,
    ) -> Result<AuthResult> {
        let pending = self
            .sessions
            .get(pending_session_id)
            .ok_or_else(|| crate::error::Error::auth("unknown oauth session"))?;
        let redirect_uri = pending
            .redirect_uri
            .clone()
            .ok_or_else(|| crate::error::Error::auth("oauth session has no redirect_uri"))?;

        let identity = provider.exchange_code(code).await?;
        let (user, created) = self.users.upsert(&identity, &self.clock);

        self.audit.record(
            RecordParams::new(
                if created { "user:created" } else { "user:updated" },
                "user",
                user.id.to_string(),
                ActorKind::System,
                serde_json::json!({ "provider": identity.provider }),
            )
            .with_session(pending_session_id.to_string()),
        );

        let session = self
            .sessions
            .promote_to_logged_in(pending_session_id, user.id, self.token_ttl)
            .ok_or_else(|| crate::error::Error::auth("oauth session disappeared during callback"))?;

        let expires_at = session.expires_at.ok_or_else(|| crate::error::Error::internal("session missing expiry after promotion"))?;
        let jwt = self.jwt.mint(session.id, expires_at)?;

        self.validate_redirect_origin(&redirect_uri)?;
        let separator = if redirect_uri.contains('?') { '&' } else { '?' };
        let final_redirect = format!("{redirect_uri}{separator}auth_token={jwt}");

        Ok(AuthResult { user, session_id: session.id, jwt, expires_at, redirect_uri: final_redirect })
    }

    /// Parses the JWT, loads the session, mints a fresh JWT with extended
    /// expiry, and bumps `logged_in_at` best-effort.
    pub fn refresh(&self, token: &str) -> Result<AuthResult> {
        let (session_id, _old_exp) = self.jwt.parse(token)?;
        let session = self
            .sessions
            .get_active(session_id)
            .ok_or_else(|| crate::error::Error::auth("session is not active"))?;
        let user_id = session
            .logged_in_user_id
            .ok_or_else(|| crate::error::Error::auth("session is not logged in"))?;
        let user = self.users.get(user_id).ok_or_else(|| crate::error::Error::auth("user no longer exists"))?;

        let new_expiry = self.clock.utc() + self.token_ttl;
        let jwt = self.jwt.mint(session_id, new_expiry)?;

        // Best-effort activity bump: failures here must never fail a refresh.
        self.sessions.bump_activity(session_id);

        Ok(AuthResult { user, session_id, jwt, expires_at: new_expiry, redirect_uri: String::new() })
    }
}
