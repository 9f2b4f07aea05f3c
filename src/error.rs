// src/error.rs
//! Failure taxonomy shared by sources, the state store, sinks and the scheduler.
//!
//! Adapters and sinks are free to use `anyhow` internally; the capability
//! boundary converts into these types so the scheduler can pick a policy
//! (skip the cycle, disable the source, abort the commit, give up on a sink).

use thiserror::Error;

/// Errors a source adapter may return from `fetch()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Network or tracker-side trouble. Skip the cycle and retry next interval.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Credentials rejected. The source stays disabled until reconfigured.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Feed fetched but could not be understood.
    #[error("parse error: {0}")]
    Parse(String),
}

impl SourceError {
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable(message.to_string())
    }

    pub fn auth(message: impl std::fmt::Display) -> Self {
        Self::Auth(message.to_string())
    }

    pub fn parse(message: impl std::fmt::Display) -> Self {
        Self::Parse(message.to_string())
    }

    /// Short label used for metrics and status output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Auth(_) => "auth",
            Self::Parse(_) => "parse",
        }
    }

    /// Classify a `reqwest` failure: 401/403 are credential problems, the rest
    /// is treated as transient.
    pub fn from_http(err: &reqwest::Error) -> Self {
        match err.status() {
            Some(s) if s == reqwest::StatusCode::UNAUTHORIZED || s == reqwest::StatusCode::FORBIDDEN => {
                Self::auth(format!("HTTP {s}"))
            }
            _ => Self::unavailable(err),
        }
    }
}

/// State store failures. All of them abort the current cycle's commit.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable(message.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::unavailable(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::unavailable(format!("corrupt state document: {e}"))
    }
}

/// Terminal delivery failure for one event on one sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery to `{sink}` failed permanently after {attempts} attempts: {last_error}")]
pub struct DeliveryError {
    pub sink: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Configuration problems. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("missing environment variable `{0}`")]
    MissingEnv(String),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Why a single poll cycle ended without committing.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Shutdown grace expired before the cycle reached its commit.
    #[error("cycle aborted by shutdown")]
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_kinds_are_stable() {
        assert_eq!(SourceError::unavailable("x").kind(), "unavailable");
        assert_eq!(SourceError::auth("x").kind(), "auth");
        assert_eq!(SourceError::parse("x").kind(), "parse");
    }

    #[test]
    fn delivery_error_message_names_sink() {
        let e = DeliveryError {
            sink: "tg".into(),
            attempts: 4,
            last_error: "boom".into(),
        };
        assert_eq!(
            e.to_string(),
            "delivery to `tg` failed permanently after 4 attempts: boom"
        );
    }
}
