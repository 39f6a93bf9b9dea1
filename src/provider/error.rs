//! Errors a provider turn can end with
//!
//! `Display` is the text the panel shows on the failed message, so HTTP
//! failures are worded for the user when they are built.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP response.
    ///
    /// `retry_after` comes from the response's `Retry-After` header and only
    /// shows up in rate-limit messages.
    pub fn from_status(status: u16, detail: &str, retry_after: Option<Duration>) -> Self {
        let kind = ProviderErrorKind::from_status(status);
        let message = match kind {
            ProviderErrorKind::Auth => format!("Authentication failed: {detail}"),
            ProviderErrorKind::RateLimit => match retry_after {
                Some(delay) => format!("Rate limited, retry in {}s: {detail}", delay.as_secs()),
                None => format!("Rate limited: {detail}"),
            },
            ProviderErrorKind::InvalidRequest => format!("Invalid request: {detail}"),
            ProviderErrorKind::ServerError => format!("Server error: {detail}"),
            _ => format!("HTTP {status}: {detail}"),
        };
        Self::new(kind, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Auth, message)
    }

    /// The turn was aborted locally; never shown to the user
    pub fn cancelled() -> Self {
        Self::new(ProviderErrorKind::Cancelled, "Request cancelled")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unknown, message)
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == ProviderErrorKind::Cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Timeouts, refused connections, dropped or idle streams
    Network,
    RateLimit,
    ServerError,
    /// Missing or rejected API key
    Auth,
    InvalidRequest,
    Cancelled,
    Unknown,
}

impl ProviderErrorKind {
    fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            429 => Self::RateLimit,
            400 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::Auth => "auth",
            Self::InvalidRequest => "invalid_request",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}
