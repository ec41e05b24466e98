//! Environment-driven configuration, per `SPEC_FULL.md` §4.11.
//!
//! Required secrets (the JWT signing key) have no default and fail startup
//! fast if missing; everything else ships a documented default.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

fn default_delimiter() -> String {
    "__".to_owned()
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_session_cookie_name() -> String {
    "aya_session".to_owned()
}

fn default_session_cookie_domain() -> String {
    ".aya.is".to_owned()
}

fn default_session_ttl_secs() -> i64 {
    60 * 60 * 24 * 365
}

fn default_pow_difficulty() -> u32 {
    16
}

fn default_pow_ttl_secs() -> i64 {
    120
}

fn default_rate_limit_per_hour() -> u32 {
    30
}

fn default_queue_visibility_timeout_secs() -> i64 {
    300
}

fn default_queue_max_retries() -> u32 {
    3
}

fn default_queue_retry_base_secs() -> u64 {
    4
}

fn default_connection_ceiling() -> usize {
    0
}

fn default_shutdown_deadline_secs() -> u64 {
    30
}

fn default_cors_allowed_origins() -> Vec<String> {
    Vec::new()
}

/// Top-level application configuration, assembled from environment
/// variables with keys separated by `delimiter` (default `__`), e.g.
/// `AYA__SESSION__COOKIE_NAME`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connection_ceiling")]
    pub connection_ceiling: usize,
    #[serde(default = "default_shutdown_deadline_secs")]
    pub shutdown_deadline_secs: u64,

    pub jwt_secret: String,
    #[serde(default = "default_session_cookie_name")]
    pub session_cookie_name: String,
    #[serde(default = "default_session_cookie_domain")]
    pub session_cookie_domain: String,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: i64,
    #[serde(default)]
    pub session_cookie_secure: bool,

    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: Vec<String>,

    #[serde(default = "default_pow_difficulty")]
    pub pow_difficulty: u32,
    #[serde(default = "default_pow_ttl_secs")]
    pub pow_ttl_secs: i64,

    #[serde(default = "default_rate_limit_per_hour")]
    pub anonymous_session_rate_limit_per_hour: u32,

    #[serde(default = "default_queue_visibility_timeout_secs")]
    pub queue_visibility_timeout_secs: i64,
    #[serde(default = "default_queue_max_retries")]
    pub queue_max_retries: u32,
    #[serde(default = "default_queue_retry_base_secs")]
    pub queue_retry_base_secs: u64,
}

impl AppConfig {
    /// Loads configuration from the process environment, prefixed `AYA` and
    /// nested with `delimiter` (default `__`).
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_delimiter(&default_delimiter())
    }

    pub fn from_env_with_delimiter(delimiter: &str) -> Result<Self> {
        let source = Environment::with_prefix("AYA")
            .separator(delimiter)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cors_allowed_origins");
        let built = Config::builder()
            .add_source(source)
            .build()
            .map_err(config_error)?;
        built.try_deserialize().map_err(config_error)
    }

    /// Returns the JWT signing secret, zeroized on drop.
    #[must_use]
    pub fn jwt_signing_key(&self) -> Zeroizing<String> {
        Zeroizing::new(self.jwt_secret.clone())
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn config_error(err: ConfigError) -> Error {
    Error::configuration(err.to_string())
}
