//! Cookie storage for the session token.
//!
//! The login exchange does not return the session token in its body; the
//! service sets it as a cookie. Where that cookie ends up depends on the
//! runtime: an explicit jar bound to the HTTP client in headless processes,
//! or the browser's own cookie store in ambient mode.

use std::fmt;
use std::sync::Arc;

#[cfg(not(target_arch = "wasm32"))]
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;

/// Name of the cookie holding the session token.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Source of the raw `document.cookie` string in ambient mode.
pub trait DocumentCookies: Send + Sync {
    /// Returns the `name=value; name=value` string visible to the document.
    fn cookie_string(&self) -> String;
}

impl<F> DocumentCookies for F
where
    F: Fn() -> String + Send + Sync,
{
    fn cookie_string(&self) -> String {
        self()
    }
}

/// Reads `document.cookie` from the browser window.
///
/// Outside `wasm32` there is no document and the string is always empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserDocument;

impl DocumentCookies for BrowserDocument {
    #[cfg(target_arch = "wasm32")]
    fn cookie_string(&self) -> String {
        use wasm_bindgen::JsCast;

        web_sys::window()
            .and_then(|window| window.document())
            .and_then(|document| document.dyn_into::<web_sys::HtmlDocument>().ok())
            .and_then(|document| document.cookie().ok())
            .unwrap_or_default()
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn cookie_string(&self) -> String {
        String::new()
    }
}

/// Where the session cookie can be read back from.
#[derive(Clone)]
pub enum CookieStorage {
    /// Cookies managed by the platform, read through the document.
    AmbientDocumentCookies(Arc<dyn DocumentCookies>),
    /// In-memory jar bound to the HTTP client.
    #[cfg(not(target_arch = "wasm32"))]
    ExplicitCookieJar(Arc<Jar>),
}

impl CookieStorage {
    /// Read the value of cookie `key`.
    ///
    /// For the explicit jar, each URL in `scopes` is queried in order and the
    /// first match wins. Ambient cookies are not URL-scoped.
    #[must_use]
    #[cfg_attr(target_arch = "wasm32", allow(unused_variables))]
    pub fn read_token(&self, key: &str, scopes: &[Url]) -> Option<String> {
        match self {
            Self::AmbientDocumentCookies(document) => find_cookie(&document.cookie_string(), key),
            #[cfg(not(target_arch = "wasm32"))]
            Self::ExplicitCookieJar(jar) => scopes.iter().find_map(|url| {
                let header = jar.cookies(url)?;
                find_cookie(header.to_str().ok()?, key)
            }),
        }
    }

    /// Returns `true` if an absent token is acceptable after login.
    ///
    /// In ambient mode the platform may still attach the cookie on later requests.
    #[must_use]
    pub const fn tolerates_missing(&self) -> bool {
        matches!(self, Self::AmbientDocumentCookies(_))
    }
}

impl fmt::Debug for CookieStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbientDocumentCookies(_) => f.write_str("AmbientDocumentCookies"),
            #[cfg(not(target_arch = "wasm32"))]
            Self::ExplicitCookieJar(_) => f.write_str("ExplicitCookieJar"),
        }
    }
}

/// Find `key` in a `name=value; name=value` cookie string.
fn find_cookie(cookies: &str, key: &str) -> Option<String> {
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
