//! Session bootstrap.
//!
//! Before any call to the Impact API the session must know two things: the
//! routing path JupyterHub assigned to the token's server, and an Impact
//! session token. Both are resolved at most once per session:
//!
//! ```text
//! NO_PATH ──hub lookup──▶ PATH_RESOLVED ──login exchange──▶ TOKEN_ACQUIRED
//! ```
//!
//! Each step runs behind a [`OnceCell`], so concurrent callers wait on the
//! request already in flight instead of issuing their own. A failed step
//! leaves its cell empty and is retried by the next caller.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::config::{ClientConfig, Credential};
use crate::cookies::{BrowserDocument, DocumentCookies, ACCESS_TOKEN_COOKIE};
use crate::error::{ImpactError, Result};
use crate::transport::{Credentials, TransportManager};

/// JupyterHub's answer to a token lookup.
#[derive(Debug, Deserialize)]
struct TokenAuthorization {
    #[serde(default)]
    server: Option<String>,
}

/// Body of the login exchange.
#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "secretKey")]
    secret_key: &'a str,
}

/// One authenticated session against an Impact server.
pub struct Session {
    server_address: String,
    gateway_token: String,
    secret_key: Option<String>,
    routing_path: OnceCell<String>,
    login: OnceCell<()>,
    session_token: RwLock<Option<String>>,
    transport: TransportManager,
}

impl Session {
    /// Create a session, reading ambient cookies from the browser document.
    ///
    /// # Errors
    ///
    /// Returns `MissingJupyterHubToken` if no hub token is configured, or an
    /// error if the server address is not a URL or the transport cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_document_cookies(config, Arc::new(BrowserDocument))
    }

    /// Create a session reading ambient cookies from `document`.
    ///
    /// # Errors
    ///
    /// Same as [`Session::new`].
    pub fn with_document_cookies(
        config: ClientConfig,
        document: Arc<dyn DocumentCookies>,
    ) -> Result<Self> {
        let gateway_token = config
            .jupyterhub_token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or(ImpactError::MissingJupyterHubToken)?;

        let server_address = config.server_address.trim_end_matches('/').to_string();
        if parse_url(&server_address)?.cannot_be_a_base() {
            return Err(ImpactError::InvalidUrl(server_address));
        }

        let (secret_key, session_token, login) = match config.credential.clone() {
            Credential::SecretKey(key) => (Some(key), None, OnceCell::new()),
            Credential::SessionToken(token) => (None, Some(token), OnceCell::new_with(Some(()))),
        };

        let credentials = Credentials {
            gateway_token: gateway_token.clone(),
            session_token: session_token.clone(),
        };
        let transport = TransportManager::new(
            &credentials,
            config.cookie_mode(),
            config.request_timeout(),
            document,
        )?;

        Ok(Self {
            server_address,
            gateway_token,
            secret_key,
            routing_path: OnceCell::new_with(config.routing_path),
            login,
            session_token: RwLock::new(session_token),
            transport,
        })
    }

    /// Make sure the routing path and session token are known and the
    /// transport reflects them. Returns the routing path.
    ///
    /// # Errors
    ///
    /// - `JhTokenError` if the hub rejects the token lookup
    /// - `ServerNotStarted` if the hub has no server for the token
    /// - `MissingAccessTokenCookie` if login succeeded but left no cookie in the jar
    /// - a classified API error if the login exchange fails
    pub async fn bootstrap(&self) -> Result<&str> {
        self.transport.rebuild_if_stale(&self.credentials())?;

        let routing_path = self
            .routing_path
            .get_or_try_init(|| self.resolve_routing_path())
            .await?;

        self.login
            .get_or_try_init(|| self.acquire_session_token(routing_path))
            .await?;

        self.transport.rebuild_if_stale(&self.credentials())?;
        Ok(routing_path.as_str())
    }

    async fn resolve_routing_path(&self) -> Result<String> {
        let url = join_segments(
            &self.server_address,
            ["hub", "api", "authorizations", "token", self.gateway_token.as_str()],
        )?;
        tracing::debug!(server = %self.server_address, "Resolving routing path");

        let response = self.transport.client().get(url).send().await.map_err(|e| {
            // The URL embeds the hub token.
            let e = e.without_url();
            let status = e.status().map(|s| s.as_u16());
            tracing::warn!(status = ?status, error = %e, "JupyterHub token lookup failed");
            ImpactError::JhTokenError { status }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "JupyterHub rejected token lookup");
            return Err(ImpactError::JhTokenError {
                status: Some(status.as_u16()),
            });
        }

        let authorization: TokenAuthorization =
            response.json().await.map_err(ImpactError::Request)?;

        match authorization.server.filter(|path| !path.is_empty()) {
            Some(path) => {
                tracing::debug!(routing_path = %path, "Resolved routing path");
                Ok(path)
            }
            None => {
                tracing::warn!("JupyterHub has no server running for this token");
                Err(ImpactError::ServerNotStarted)
            }
        }
    }

    async fn acquire_session_token(&self, routing_path: &str) -> Result<()> {
        if self.session_token.read().is_some() {
            return Ok(());
        }
        let secret_key = self
            .secret_key
            .as_deref()
            .ok_or(ImpactError::MissingCredential)?;

        let url = self.service_url(routing_path, &["login"])?;
        tracing::debug!(url = %url, "Exchanging secret key for a session token");

        let response = self
            .transport
            .client()
            .post(url.clone())
            .json(&LoginRequest { secret_key })
            .send()
            .await
            .map_err(ImpactError::from_transport)?;
        ImpactError::check(response).await?;

        let storage = self.transport.cookie_storage();
        let scopes = [parse_url(&self.routing_url(routing_path))?, url];

        match storage.read_token(ACCESS_TOKEN_COOKIE, &scopes) {
            Some(token) => {
                // A token set while the exchange was in flight is newer.
                let mut slot = self.session_token.write();
                if slot.is_none() {
                    *slot = Some(token);
                    tracing::info!("Acquired Impact session token");
                } else {
                    tracing::debug!("Session token was set during login, keeping it");
                }
            }
            None if self.session_token.read().is_some() => {
                tracing::debug!("Session token was set during login, keeping it");
            }
            None if storage.tolerates_missing() => {
                tracing::debug!("No access_token in document cookies, relying on the browser");
            }
            None => {
                tracing::warn!("Login succeeded but the cookie jar holds no access_token");
                return Err(ImpactError::MissingAccessTokenCookie);
            }
        }
        Ok(())
    }

    /// Replace the session token with one obtained elsewhere.
    ///
    /// The transport is rebuilt right away; no login exchange is issued
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the new transport cannot be built.
    pub fn set_session_token(&self, token: impl Into<String>) -> Result<()> {
        *self.session_token.write() = Some(token.into());
        self.transport.force_rebuild(&self.credentials())
    }

    /// The current session token, if known.
    #[must_use]
    pub fn session_token(&self) -> Option<String> {
        self.session_token.read().clone()
    }

    /// The routing path, if resolved or configured.
    #[must_use]
    pub fn routing_path(&self) -> Option<&str> {
        self.routing_path.get().map(String::as_str)
    }

    /// The server address with no trailing slash.
    #[must_use]
    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    /// The transport this session sends requests through.
    #[must_use]
    pub const fn transport(&self) -> &TransportManager {
        &self.transport
    }

    /// The URL of the server behind `routing_path`, with a trailing slash.
    #[must_use]
    pub fn routing_url(&self, routing_path: &str) -> String {
        match routing_path.trim_matches('/') {
            "" => format!("{}/", self.server_address),
            path => format!("{}/{path}/", self.server_address),
        }
    }

    /// The URL of an endpoint under the Impact API behind `routing_path`.
    ///
    /// Each of `segments` is percent-encoded as a single path segment, so IDs
    /// containing `/`, `?` or `#` stay inside their segment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` if the routing URL cannot be parsed.
    pub fn service_url(&self, routing_path: &str, segments: &[&str]) -> Result<Url> {
        let mut url = join_segments(&self.routing_url(routing_path), ["service", "api"])?;
        extend_path(&mut url, segments)?;
        Ok(url)
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            gateway_token: self.gateway_token.clone(),
            session_token: self.session_token(),
        }
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| ImpactError::InvalidUrl(e.to_string()))
}

/// Parse `base` and append `segments`, each percent-encoded.
fn join_segments<I>(base: &str, segments: I) -> Result<Url>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut url = parse_url(base)?;
    extend_path(&mut url, segments)?;
    Ok(url)
}

fn extend_path<I>(url: &mut Url, segments: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    url.path_segments_mut()
        .map_err(|()| ImpactError::InvalidUrl("not a hierarchical URL".to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(())
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("server_address", &self.server_address)
            .field("routing_path", &self.routing_path.get())
            .field("has_session_token", &self.session_token.read().is_some())
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(credential: Credential) -> ClientConfig {
        ClientConfig::new("https://host/", "tok123", credential)
    }

    #[test]
    fn missing_hub_token_fails_before_io() {
        let mut cfg = config(Credential::SecretKey("sk".into()));
        cfg.jupyterhub_token = None;
        assert!(matches!(
            Session::new(cfg).unwrap_err(),
            ImpactError::MissingJupyterHubToken
        ));

        let mut cfg = config(Credential::SecretKey("sk".into()));
        cfg.jupyterhub_token = Some(String::new());
        assert!(matches!(
            Session::new(cfg).unwrap_err(),
            ImpactError::MissingJupyterHubToken
        ));
    }

    #[test]
    fn invalid_server_address() {
        let cfg = ClientConfig::new("not a url", "tok", Credential::SecretKey("sk".into()));
        assert!(matches!(
            Session::new(cfg).unwrap_err(),
            ImpactError::InvalidUrl(_)
        ));
    }

    #[test]
    fn builds_service_urls() {
        let session = Session::new(config(Credential::SecretKey("sk".into()))).unwrap();
        assert_eq!(session.server_address(), "https://host");
        assert_eq!(
            session.service_url("/user/alice/", &["login"]).unwrap().as_str(),
            "https://host/user/alice/service/api/login"
        );
        assert_eq!(
            session
                .service_url("user/alice", &["workspaces", "ws1"])
                .unwrap()
                .as_str(),
            "https://host/user/alice/service/api/workspaces/ws1"
        );
        assert_eq!(
            session.service_url("/", &["workspaces"]).unwrap().as_str(),
            "https://host/service/api/workspaces"
        );
        assert_eq!(session.routing_url("/"), "https://host/");
    }

    #[test]
    fn path_segments_are_encoded() {
        let session = Session::new(config(Credential::SecretKey("sk".into()))).unwrap();
        assert_eq!(
            session
                .service_url("/user/alice/", &["workspaces", "a/b?c#d"])
                .unwrap()
                .as_str(),
            "https://host/user/alice/service/api/workspaces/a%2Fb%3Fc%23d"
        );

        let lookup = join_segments("https://host/prefix", ["token", "t/k?x"]).unwrap();
        assert_eq!(lookup.as_str(), "https://host/prefix/token/t%2Fk%3Fx");
    }

    #[test]
    fn rejects_non_hierarchical_address() {
        let cfg = ClientConfig::new("mailto:hub@host", "tok", Credential::SecretKey("sk".into()));
        assert!(matches!(
            Session::new(cfg).unwrap_err(),
            ImpactError::InvalidUrl(_)
        ));
    }

    #[test]
    fn preconfigured_state() {
        let session = Session::new(
            config(Credential::SessionToken("sess".into())).with_routing_path("/user/alice/"),
        )
        .unwrap();
        assert_eq!(session.routing_path(), Some("/user/alice/"));
        assert_eq!(session.session_token().as_deref(), Some("sess"));
        assert!(session.transport().config().has_service_auth());
    }

    #[test]
    fn set_session_token_rebuilds_transport() {
        let session = Session::new(config(Credential::SecretKey("sk".into()))).unwrap();
        assert!(!session.transport().config().has_service_auth());

        session.set_session_token("newtok").unwrap();
        assert_eq!(session.session_token().as_deref(), Some("newtok"));
        assert_eq!(
            session
                .transport()
                .config()
                .credentials()
                .session_token
                .as_deref(),
            Some("newtok")
        );
    }

    #[test]
    fn login_request_uses_camel_case_key() {
        let json = serde_json::to_string(&LoginRequest { secret_key: "sk_abc" }).unwrap();
        assert_eq!(json, r#"{"secretKey":"sk_abc"}"#);
    }

    #[test]
    fn debug_hides_tokens() {
        let session = Session::new(config(Credential::SessionToken("sess-secret".into()))).unwrap();
        let debug = format!("{session:?}");
        assert!(!debug.contains("sess-secret"));
        assert!(!debug.contains("tok123"));
    }
}
