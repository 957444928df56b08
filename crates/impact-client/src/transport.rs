//! Transport configuration.
//!
//! The HTTP client carries the bearer headers as defaults, so it has to be
//! rebuilt whenever the credentials it was built with change. [`reconcile`]
//! decides whether that is needed; [`TransportManager`] owns the live client.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
#[cfg(not(target_arch = "wasm32"))]
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use crate::cookies::{CookieStorage, DocumentCookies};
use crate::environment::CookieMode;
use crate::error::{ImpactError, Result};

/// Header carrying the JupyterHub token.
pub const GATEWAY_AUTH_HEADER: HeaderName = AUTHORIZATION;

/// Header carrying the Impact session token.
pub const SERVICE_AUTH_HEADER: HeaderName = HeaderName::from_static("impact-authorization");

/// The credentials a client is built with.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// JupyterHub token.
    pub gateway_token: String,
    /// Impact session token, once known.
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("gateway_token", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Build the default headers for these credentials.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeader` if a token is not a valid header value.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(GATEWAY_AUTH_HEADER, bearer(&self.gateway_token)?);
        if let Some(token) = &self.session_token {
            headers.insert(SERVICE_AUTH_HEADER, bearer(token)?);
        }
        Ok(headers)
    }
}

fn bearer(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

/// What the active client was built with.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    credentials: Credentials,
    #[cfg(not(target_arch = "wasm32"))]
    jar: Option<Arc<Jar>>,
}

impl TransportConfig {
    /// The configuration a fresh client is built with.
    #[must_use]
    #[cfg_attr(target_arch = "wasm32", allow(unused_variables))]
    pub fn initial(credentials: &Credentials, mode: CookieMode) -> Self {
        Self {
            credentials: credentials.clone(),
            #[cfg(not(target_arch = "wasm32"))]
            jar: mode.needs_jar().then(Arc::default),
        }
    }

    /// Credentials baked into the client's default headers.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns `true` if the client sends the service auth header.
    #[must_use]
    pub const fn has_service_auth(&self) -> bool {
        self.credentials.session_token.is_some()
    }

    /// Returns `true` if a cookie jar is bound to the client.
    #[cfg(not(target_arch = "wasm32"))]
    #[must_use]
    pub const fn has_jar(&self) -> bool {
        self.jar.is_some()
    }

    /// Always `false`: the browser owns the cookie store.
    #[cfg(target_arch = "wasm32")]
    #[must_use]
    pub const fn has_jar(&self) -> bool {
        false
    }

    /// The cookie jar bound to the client, if any.
    #[cfg(not(target_arch = "wasm32"))]
    #[must_use]
    pub fn jar(&self) -> Option<&Arc<Jar>> {
        self.jar.as_ref()
    }
}

/// Decide whether the transport must be rebuilt.
///
/// Returns the configuration to build when `current` was built with other
/// credentials or lacks a jar that `mode` requires, and `None` when it is up
/// to date. An already bound jar is carried over so cookies set by earlier
/// responses survive the rebuild.
#[must_use]
pub fn reconcile(
    current: &TransportConfig,
    credentials: &Credentials,
    mode: CookieMode,
) -> Option<TransportConfig> {
    let jar_ok = !mode.needs_jar() || current.has_jar();
    if current.credentials == *credentials && jar_ok {
        return None;
    }

    Some(TransportConfig {
        credentials: credentials.clone(),
        #[cfg(not(target_arch = "wasm32"))]
        jar: mode
            .needs_jar()
            .then(|| current.jar.clone().unwrap_or_default()),
    })
}

struct Transport {
    config: TransportConfig,
    client: reqwest::Client,
}

/// Owns the single HTTP client used by a session.
pub struct TransportManager {
    mode: CookieMode,
    timeout: Duration,
    document: Arc<dyn DocumentCookies>,
    active: RwLock<Transport>,
}

impl TransportManager {
    /// Create a manager and build its first client.
    ///
    /// # Errors
    ///
    /// Returns an error if the headers or the client cannot be built.
    pub fn new(
        credentials: &Credentials,
        mode: CookieMode,
        timeout: Duration,
        document: Arc<dyn DocumentCookies>,
    ) -> Result<Self> {
        let transport = build(TransportConfig::initial(credentials, mode), timeout)?;
        Ok(Self {
            mode,
            timeout,
            document,
            active: RwLock::new(transport),
        })
    }

    /// The cookie mode this manager builds clients for.
    #[must_use]
    pub const fn mode(&self) -> CookieMode {
        self.mode
    }

    /// Rebuild the client if it does not reflect `credentials`.
    ///
    /// Returns `true` if a new client was built.
    ///
    /// # Errors
    ///
    /// Returns an error if the headers or the client cannot be built.
    pub fn rebuild_if_stale(&self, credentials: &Credentials) -> Result<bool> {
        let mut active = self.active.write();
        let Some(config) = reconcile(&active.config, credentials, self.mode) else {
            return Ok(false);
        };

        *active = build(config, self.timeout)?;
        Ok(true)
    }

    /// Rebuild the client unconditionally, keeping whatever jar is bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the headers or the client cannot be built.
    pub fn force_rebuild(&self, credentials: &Credentials) -> Result<()> {
        let mut active = self.active.write();
        let config = TransportConfig {
            credentials: credentials.clone(),
            #[cfg(not(target_arch = "wasm32"))]
            jar: active.config.jar.clone(),
        };

        *active = build(config, self.timeout)?;
        Ok(())
    }

    /// The active client.
    #[must_use]
    pub fn client(&self) -> reqwest::Client {
        self.active.read().client.clone()
    }

    /// A snapshot of the active configuration.
    #[must_use]
    pub fn config(&self) -> TransportConfig {
        self.active.read().config.clone()
    }

    /// The bound cookie jar. Always `None` in ambient mode.
    #[cfg(not(target_arch = "wasm32"))]
    #[must_use]
    pub fn cookie_jar(&self) -> Option<Arc<Jar>> {
        self.active.read().config.jar.clone()
    }

    /// Where the session cookie should be read from.
    #[must_use]
    pub fn cookie_storage(&self) -> CookieStorage {
        #[cfg(not(target_arch = "wasm32"))]
        if let Some(jar) = self.cookie_jar() {
            return CookieStorage::ExplicitCookieJar(jar);
        }
        CookieStorage::AmbientDocumentCookies(Arc::clone(&self.document))
    }
}

fn build(config: TransportConfig, timeout: Duration) -> Result<Transport> {
    let builder = reqwest::Client::builder().default_headers(config.credentials.headers()?);

    #[cfg(not(target_arch = "wasm32"))]
    let builder = {
        let builder = builder.timeout(timeout);
        match &config.jar {
            Some(jar) => builder.cookie_provider(Arc::clone(jar)),
            None => builder,
        }
    };
    #[cfg(target_arch = "wasm32")]
    let _ = timeout;

    let client = builder.build().map_err(ImpactError::Request)?;

    tracing::debug!(
        service_auth = config.has_service_auth(),
        cookie_jar = config.has_jar(),
        "Built HTTP transport"
    );

    Ok(Transport { config, client })
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportManager")
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::cookies::BrowserDocument;

    fn credentials(session: Option<&str>) -> Credentials {
        Credentials {
            gateway_token: "hub-token".to_string(),
            session_token: session.map(str::to_string),
        }
    }

    fn manager(mode: CookieMode) -> TransportManager {
        TransportManager::new(
            &credentials(None),
            mode,
            Duration::from_secs(5),
            Arc::new(BrowserDocument),
        )
        .unwrap()
    }

    #[test]
    fn headers_carry_bearer_tokens() {
        let headers = credentials(Some("sess")).headers().unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer hub-token");
        assert_eq!(headers[SERVICE_AUTH_HEADER], "Bearer sess");

        let headers = credentials(None).headers().unwrap();
        assert!(!headers.contains_key(SERVICE_AUTH_HEADER));
    }

    #[test]
    fn invalid_token_is_rejected() {
        let creds = Credentials {
            gateway_token: "bad\ntoken".to_string(),
            session_token: None,
        };
        assert!(matches!(creds.headers(), Err(ImpactError::InvalidHeader(_))));
    }

    #[test]
    fn initial_config_follows_mode() {
        let config = TransportConfig::initial(&credentials(None), CookieMode::ExplicitJar);
        assert!(config.jar().is_some());
        assert!(config.has_jar());
        assert!(!config.has_service_auth());

        let config = TransportConfig::initial(&credentials(None), CookieMode::AmbientCookie);
        assert!(config.jar().is_none());
        assert!(!config.has_jar());
    }

    #[test]
    fn reconcile_is_noop_when_current() {
        let creds = credentials(Some("sess"));
        let config = TransportConfig::initial(&creds, CookieMode::ExplicitJar);
        assert!(reconcile(&config, &creds, CookieMode::ExplicitJar).is_none());
    }

    #[test]
    fn reconcile_rebuilds_on_token_change_and_keeps_jar() {
        let config = TransportConfig::initial(&credentials(None), CookieMode::ExplicitJar);
        let next =
            reconcile(&config, &credentials(Some("sess")), CookieMode::ExplicitJar).unwrap();

        assert!(next.has_service_auth());
        assert!(Arc::ptr_eq(config.jar().unwrap(), next.jar().unwrap()));
    }

    #[test]
    fn reconcile_binds_missing_jar() {
        let creds = credentials(Some("sess"));
        let without_jar = TransportConfig::initial(&creds, CookieMode::AmbientCookie);
        let next = reconcile(&without_jar, &creds, CookieMode::ExplicitJar).unwrap();
        assert!(next.jar().is_some());
        assert!(reconcile(&without_jar, &creds, CookieMode::AmbientCookie).is_none());
    }

    #[test]
    fn rebuild_if_stale_is_idempotent() {
        let transport = manager(CookieMode::ExplicitJar);
        let jar = transport.cookie_jar().unwrap();

        assert!(!transport.rebuild_if_stale(&credentials(None)).unwrap());
        assert!(transport.rebuild_if_stale(&credentials(Some("sess"))).unwrap());
        assert!(!transport.rebuild_if_stale(&credentials(Some("sess"))).unwrap());
        assert!(transport.config().has_service_auth());
        assert!(Arc::ptr_eq(&jar, &transport.cookie_jar().unwrap()));
    }

    #[test]
    fn force_rebuild_keeps_jar_state() {
        let ambient = manager(CookieMode::AmbientCookie);
        ambient.force_rebuild(&credentials(Some("sess"))).unwrap();
        assert!(ambient.cookie_jar().is_none());
        assert!(ambient.config().has_service_auth());

        let headless = manager(CookieMode::ExplicitJar);
        let jar = headless.cookie_jar().unwrap();
        headless.force_rebuild(&credentials(Some("sess"))).unwrap();
        assert!(Arc::ptr_eq(&jar, &headless.cookie_jar().unwrap()));
        // Forced rebuilds always build, even when nothing changed.
        headless.force_rebuild(&credentials(Some("sess"))).unwrap();
        assert!(!headless.rebuild_if_stale(&credentials(Some("sess"))).unwrap());
    }

    #[test]
    fn cookie_storage_follows_mode() {
        let ambient = manager(CookieMode::AmbientCookie);
        assert!(ambient.cookie_jar().is_none());
        assert!(ambient.cookie_storage().tolerates_missing());

        let headless = manager(CookieMode::ExplicitJar);
        assert!(!headless.cookie_storage().tolerates_missing());
    }
}
