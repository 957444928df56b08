//! Runtime environment detection.

use serde::Deserialize;

/// How session cookies are stored in the current runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CookieMode {
    /// Browser-like context: the platform attaches cookies itself and they are
    /// read back through `document.cookie`.
    AmbientCookie,
    /// Headless context: an in-memory cookie jar is bound to the HTTP client.
    ExplicitJar,
}

impl CookieMode {
    /// Detect the mode for the running process.
    #[must_use]
    pub const fn detect() -> Self {
        if cfg!(target_arch = "wasm32") {
            Self::AmbientCookie
        } else {
            Self::ExplicitJar
        }
    }

    /// Returns `true` if an explicit cookie jar must be bound to the transport.
    ///
    /// Always `false` on `wasm32`, where the browser owns the cookie store and
    /// no jar can be bound.
    #[must_use]
    pub const fn needs_jar(self) -> bool {
        matches!(self, Self::ExplicitJar) && !cfg!(target_arch = "wasm32")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_is_headless() {
        assert_eq!(CookieMode::detect(), CookieMode::ExplicitJar);
        assert!(CookieMode::detect().needs_jar());
    }

    #[test]
    fn ambient_needs_no_jar() {
        assert!(!CookieMode::AmbientCookie.needs_jar());
    }

    #[test]
    fn deserializes_kebab_case() {
        let mode: CookieMode = serde_json::from_str("\"ambient-cookie\"").unwrap();
        assert_eq!(mode, CookieMode::AmbientCookie);
        let mode: CookieMode = serde_json::from_str("\"explicit-jar\"").unwrap();
        assert_eq!(mode, CookieMode::ExplicitJar);
    }
}
