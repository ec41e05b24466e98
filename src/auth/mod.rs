//! C7 — Auth / Session Core: OAuth login, JWT minting, cookie-based session
//! checks, logout, session preferences, and anonymous-session rate limiting.
//!
//! The user/session identity types below are the minimum C7 needs to issue
//! and validate tokens; they are not a business-domain user-profile CRUD
//! surface.

pub mod callback;
pub mod jwt;
pub mod oauth;
pub mod preferences;
pub mod rate_limit;
pub mod session;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mockable::Clock;
use uuid::Uuid;

pub use callback::AuthResult;
pub use oauth::{OAuthIdentity, Provider};
pub use session::{Session, SessionStatus};

use crate::audit::AuditLog;
use crate::error::Result;
use jwt::JwtCodec;
use rate_limit::RateLimiter;
use session::SessionStore;

/// A user identity as seen by the auth core. Looked up by `(provider,
/// remote_id)`, then by email, before a new row is created.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub provider: String,
    pub remote_id: String,
    pub username: String,
    pub name: String,
    pub email: String,
    pub uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory user store, keyed by internal id with secondary indices by
/// `(provider, remote_id)` and by email.
#[derive(Default)]
pub struct UserStore {
    by_id: DashMap<Uuid, User>,
}

impl UserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn find_by_provider(&self, provider: &str, remote_id: &str) -> Option<User> {
        self.by_id
            .iter()
            .find(|entry| entry.value().provider == provider && entry.value().remote_id == remote_id)
            .map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn find_by_email(&self, email: &str) -> Option<User> {
        self.by_id
            .iter()
            .find(|entry| entry.value().email == email)
            .map(|entry| entry.value().clone())
    }

    pub fn upsert(&self, identity: &OAuthIdentity, clock: &Arc<dyn Clock>) -> (User, bool) {
        if let Some(mut existing) = self.find_by_provider(&identity.provider, &identity.remote_id) {
            existing.username = identity.username.clone();
            existing.name = identity.name.clone();
            existing.email = identity.email.clone();
            existing.uri = identity.uri.clone();
            existing.updated_at = clock.utc();
            self.by_id.insert(existing.id, existing.clone());
            return (existing, false);
        }

        if let Some(mut existing) = self.find_by_email(&identity.email) {
            existing.provider = identity.provider.clone();
            existing.remote_id = identity.remote_id.clone();
            existing.username = identity.username.clone();
            existing.name = identity.name.clone();
            existing.uri = identity.uri.clone();
            existing.updated_at = clock.utc();
            self.by_id.insert(existing.id, existing.clone());
            return (existing, false);
        }

        let now = clock.utc();
        let user = User {
            id: Uuid::new_v4(),
            provider: identity.provider.clone(),
            remote_id: identity.remote_id.clone(),
            username: identity.username.clone(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            uri: identity.uri.clone(),
            created_at: now,
            updated_at: now,
        };
        self.by_id.insert(user.id, user.clone());
        (user, true)
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<User> {
        self.by_id.get(&id).map(|entry| entry.value().clone())
    }
}

/// Wires the OAuth provider, session store, user store, JWT codec, audit
/// log, and rate limiter into the five C7 operations.
pub struct AuthCore {
    pub users: UserStore,
    pub sessions: SessionStore,
    pub rate_limiter: RateLimiter,
    pub jwt: JwtCodec,
    pub audit: Arc<AuditLog>,
    pub clock: Arc<dyn Clock>,
    pub cors_allowed_origins: Vec<String>,
    pub token_ttl: chrono::Duration,
}

impl AuthCore {
    #[must_use]
    pub fn new(
        jwt: JwtCodec,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        cors_allowed_origins: Vec<String>,
        token_ttl: chrono::Duration,
        rate_limit_per_hour: u32,
    ) -> Self {
        Self {
            users: UserStore::new(),
            sessions: SessionStore::with_clock(clock.clone()),
            rate_limiter: RateLimiter::new(rate_limit_per_hour, clock.clone()),
            jwt,
            audit,
            clock,
            cors_allowed_origins,
            token_ttl,
        }
    }

    /// Validates `redirect_uri`'s origin against the configured allow-list.
    pub fn validate_redirect_origin(&self, redirect_uri: &str) -> Result<()> {
        let parsed = url::Url::parse(redirect_uri)
            .map_err(|err| crate::error::Error::auth(format!("invalid redirect_uri: {err}")))?;
        let origin = parsed.origin().ascii_serialization();
        if self.cors_allowed_origins.iter().any(|allowed| allowed == &origin) {
            Ok(())
        } else {
            Err(crate::error::Error::auth(format!("redirect_uri origin not allowed: {origin}")))
        }
    }
}
