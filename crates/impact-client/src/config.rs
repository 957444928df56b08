//! Client configuration.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::environment::CookieMode;

/// How the client obtains its Impact session.
///
/// The two modes are mutually exclusive.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    /// Exchange this secret key for a session token on first use.
    SecretKey(String),
    /// Use an already issued session token and skip the login exchange.
    SessionToken(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecretKey(_) => f.write_str("SecretKey(<redacted>)"),
            Self::SessionToken(_) => f.write_str("SessionToken(<redacted>)"),
        }
    }
}

/// Configuration for an [`ImpactClient`](crate::ImpactClient).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base address of the JupyterHub deployment (e.g. `https://impact.example.com`).
    pub server_address: String,

    /// JupyterHub API token. Required.
    #[serde(default)]
    pub jupyterhub_token: Option<String>,

    /// Secret key or pre-issued session token.
    pub credential: Credential,

    /// Known routing path (e.g. `/user/alice/`); skips the hub lookup when set.
    #[serde(default)]
    pub routing_path: Option<String>,

    /// Override the detected cookie mode.
    #[serde(default)]
    pub cookie_mode: Option<CookieMode>,

    /// Per-request timeout in seconds.
    #[serde(default = "ClientConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ClientConfig {
    const fn default_request_timeout() -> u64 {
        30
    }

    /// Create a configuration with default optional fields.
    #[must_use]
    pub fn new(
        server_address: impl Into<String>,
        jupyterhub_token: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            jupyterhub_token: Some(jupyterhub_token.into()),
            credential,
            routing_path: None,
            cookie_mode: None,
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }

    /// Set a known routing path.
    #[must_use]
    pub fn with_routing_path(mut self, routing_path: impl Into<String>) -> Self {
        self.routing_path = Some(routing_path.into());
        self
    }

    /// Force a cookie mode instead of detecting it.
    #[must_use]
    pub const fn with_cookie_mode(mut self, mode: CookieMode) -> Self {
        self.cookie_mode = Some(mode);
        self
    }

    /// The effective cookie mode.
    #[must_use]
    pub fn cookie_mode(&self) -> CookieMode {
        self.cookie_mode.unwrap_or_else(CookieMode::detect)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
