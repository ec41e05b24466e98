//! JWT minting/parsing. Claims are `{session_id, exp}` only — the user is
//! never embedded, so revocation is immediate via the session store.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    session_id: Uuid,
    exp: i64,
}

/// Encodes and decodes session JWTs with a single symmetric secret.
pub struct JwtCodec {
    secret: Zeroizing<String>,
}

impl JwtCodec {
    #[must_use]
    pub fn new(secret: Zeroizing<String>) -> Self {
        Self { secret }
    }

    pub fn mint(&self, session_id: Uuid, expires_at: DateTime<Utc>) -> Result<String> {
        let claims = Claims { session_id, exp: expires_at.timestamp() };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|err| Error::auth(format!("failed to mint jwt: {err}")))
    }

    pub fn parse(&self, token: &str) -> Result<(Uuid, DateTime<Utc>)> {
        let data = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|err| Error::auth(format!("invalid jwt: {err}")))?;

        let expires_at = DateTime::from_timestamp(data.claims.exp, 0)
            .ok_or_else(|| Error::auth("jwt exp claim out of range"))?;
        Ok((data.claims.session_id, expires_at))
    }
}
