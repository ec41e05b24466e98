//! Shared error taxonomy used across every component in this crate.
//!
//! Components return `Error` (or a component-scoped error that carries one)
//! rather than `anyhow`/`String`, so callers can branch on `ErrorKind`
//! instead of matching message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, machine-readable error classification.
///
/// See `spec.md` §7 for the policy behind each variant: `Configuration` and
/// `ProgrammerError` fail fast / halt at registration time; `Auth` and
/// `ResourceLimit` are surfaced to clients; `Transient` and `Worker` drive
/// retry/restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ProgrammerError,
    Auth,
    ResourceLimit,
    Transient,
    Worker,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::ProgrammerError => "programmer_error",
            ErrorKind::Auth => "auth",
            ErrorKind::ResourceLimit => "resource_limit",
            ErrorKind::Transient => "transient",
            ErrorKind::Worker => "worker",
            ErrorKind::Internal => "internal",
        }
    }
}

/// The crate-wide error type.
///
/// Carries a `kind`, a human message, and an optional trace id so an HTTP
/// adapter can echo the id a client already saw in the `Trace-Id` response
/// header back inside the error body.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    trace_id: Option<String>,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace_id: None,
        }
    }

    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    #[must_use]
    pub fn programmer_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProgrammerError, message)
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    #[must_use]
    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceLimit, message)
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    #[must_use]
    pub fn worker(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Worker, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Strips internal detail before handing the error to an HTTP client.
    ///
    /// Only `Internal` errors are redacted; every other kind's message is
    /// already written to be client-safe.
    #[must_use]
    pub fn redacted_for_clients(&self) -> Self {
        if self.kind == ErrorKind::Internal {
            Self {
                kind: self.kind,
                message: "internal server error".to_owned(),
                trace_id: self.trace_id.clone(),
            }
        } else {
            self.clone()
        }
    }

    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.kind {
            ErrorKind::Configuration | ErrorKind::ProgrammerError | ErrorKind::Internal => 500,
            ErrorKind::Auth => 401,
            ErrorKind::ResourceLimit => 429,
            ErrorKind::Transient => 503,
            ErrorKind::Worker => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
