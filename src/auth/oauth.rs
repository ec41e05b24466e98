//! OAuth initiation and the provider adapter contract. `spec.md` §4.7.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;

use crate::error::Result;

/// The canonical identity an OAuth provider hands back after a code
/// exchange.
#[derive(Debug, Clone)]
pub struct OAuthIdentity {
    pub provider: String,
    pub remote_id: String,
    pub username: String,
    pub name: String,
    pub email: String,
    pub uri: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scope: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Adapter boundary to a specific OAuth provider. Implementations live
/// outside this crate (provider-specific HTTP calls, token formats); this
/// crate only defines the contract and drives it.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Builds the provider's authorization URL. `callback_url` already
    /// embeds the final user redirect as a query parameter.
    fn authorization_url(&self, state: &str, callback_url: &str) -> String;

    /// Exchanges an authorization code for the canonical identity.
    async fn exchange_code(&self, code: &str) -> Result<OAuthIdentity>;
}

/// Generates a 256-bit random state token, hex-encoded.
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Builds the callback URL the provider will redirect back to, embedding
/// the caller's final destination as `redirect_uri`.
#[must_use]
pub fn build_callback_url(callback_base: &str, final_redirect_uri: &str) -> String {
    let encoded = url::form_urlencoded::byte_serialize(final_redirect_uri.as_bytes()).collect::<String>();
    format!("{callback_base}?redirect_uri={encoded}")
}

/// Initiates an OAuth login: generates state and returns the provider's
/// authorization URL. The caller is responsible for persisting `state` on
/// a pending session (see `session::SessionStore::create_oauth_pending`).
#[must_use]
pub fn initiate(provider: &dyn Provider, callback_base: &str, final_redirect_uri: &str) -> (String, String) {
    let state = generate_state();
    let callback_url = build_callback_url(callback_base, final_redirect_uri);
    let url = provider.authorization_url(&state, &callback_url);
    (state, url)
}
