//! Error types and transport failure classification.
//!
//! Every network-facing operation in this crate fails with an [`ImpactError`].
//! Transport failures are folded into a small, closed set of kinds; anything
//! that is not a transport failure is passed through unchanged.

use serde::Deserialize;
use thiserror::Error;

/// A result type using `ImpactError`.
pub type Result<T> = std::result::Result<T, ImpactError>;

/// Errors that can occur while bootstrapping a session or calling the service.
#[derive(Debug, Error)]
pub enum ImpactError {
    /// No JupyterHub token was supplied when the client was constructed.
    #[error("JupyterHub token is missing")]
    MissingJupyterHubToken,

    /// Neither a secret key nor a session token was supplied.
    #[error("either a secret key or a session token is required")]
    MissingCredential,

    /// The hub accepted the token but has no server assigned to it.
    #[error("server not started for this JupyterHub token")]
    ServerNotStarted,

    /// The hub rejected the token lookup.
    #[error("JupyterHub token lookup failed{}", status_suffix(*status))]
    JhTokenError {
        /// HTTP status returned by the hub, if a response was received.
        status: Option<u16>,
    },

    /// Login succeeded but no `access_token` cookie was stored.
    #[error("access_token cookie missing after login")]
    MissingAccessTokenCookie,

    /// The service answered with a structured error body.
    #[error("API error {code} ({status}): {message}")]
    Api {
        /// HTTP status of the response.
        status: u16,
        /// Error code reported by the service.
        code: String,
        /// Human-readable message reported by the service.
        message: String,
    },

    /// A service call failed without a structured error body.
    #[error("unknown API error{}", status_suffix(*status))]
    UnknownApiError {
        /// HTTP status of the response, if one was received.
        status: Option<u16>,
        /// Underlying transport error, if any.
        #[source]
        source: Option<reqwest::Error>,
    },

    /// A request error that is not a transport failure (body decoding, request building).
    #[error("request error: {0}")]
    Request(#[source] reqwest::Error),

    /// A credential contains characters that cannot be sent in a header.
    #[error("credential is not a valid header value")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// The server address or routing path does not form a valid URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A successful response did not contain the expected field.
    #[error("unexpected payload: missing {0}")]
    UnexpectedPayload(&'static str),
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Structured error body returned by the service.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

impl ImpactError {
    /// Classify a `reqwest` error raised while sending a request.
    ///
    /// Connection, timeout and status failures become `UnknownApiError`.
    /// Decode and builder errors are not transport failures and are kept as-is.
    #[must_use]
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_builder() {
            return Self::Request(err);
        }

        let status = err.status().map(|s| s.as_u16());
        tracing::warn!(status = ?status, error = %err, "Transport failure");
        Self::UnknownApiError {
            status,
            source: Some(err),
        }
    }

    /// Classify a non-success response.
    ///
    /// A body of the form `{"error": {"code": ..., "message": ...}}` yields `Api`;
    /// anything else yields `UnknownApiError` carrying the status.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let envelope = match response.bytes().await {
            Ok(body) => serde_json::from_slice::<ErrorEnvelope>(&body).ok(),
            Err(_) => None,
        };

        match envelope {
            Some(ErrorEnvelope { error }) => {
                let code = error.code.unwrap_or_else(|| "UnknownApiError".to_string());
                tracing::warn!(status, code = %code, "Service returned an error");
                Self::Api {
                    status,
                    code,
                    message: error.message,
                }
            }
            None => {
                tracing::warn!(status, "Service returned an error without a body");
                Self::UnknownApiError {
                    status: Some(status),
                    source: None,
                }
            }
        }
    }

    /// Pass a response through if it succeeded, classify it otherwise.
    ///
    /// # Errors
    ///
    /// Returns the classified error for any non-2xx status.
    pub async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::from_response(response).await)
        }
    }

    /// Returns the stable code for this error.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::MissingJupyterHubToken => "MissingJupyterHubToken",
            Self::MissingCredential => "MissingCredential",
            Self::ServerNotStarted => "ServerNotStarted",
            Self::JhTokenError { .. } => "JhTokenError",
            Self::MissingAccessTokenCookie => "MissingAccessTokenCookie",
            Self::Api { code, .. } => code,
            Self::UnknownApiError { .. } => "UnknownApiError",
            Self::Request(_) => "RequestError",
            Self::InvalidHeader(_) => "InvalidHeader",
            Self::InvalidUrl(_) => "InvalidUrl",
            Self::UnexpectedPayload(_) => "UnexpectedPayload",
        }
    }

    /// Returns the HTTP status attached to this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::JhTokenError { status } | Self::UnknownApiError { status, .. } => *status,
            Self::Api { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_codes() {
        assert_eq!(
            ImpactError::MissingJupyterHubToken.code(),
            "MissingJupyterHubToken"
        );
        assert_eq!(ImpactError::ServerNotStarted.code(), "ServerNotStarted");
        assert_eq!(
            ImpactError::JhTokenError { status: Some(401) }.code(),
            "JhTokenError"
        );
        assert_eq!(
            ImpactError::MissingAccessTokenCookie.code(),
            "MissingAccessTokenCookie"
        );
        assert_eq!(
            ImpactError::UnknownApiError {
                status: None,
                source: None
            }
            .code(),
            "UnknownApiError"
        );
    }

    #[test]
    fn api_error_uses_server_code() {
        let err = ImpactError::Api {
            status: 404,
            code: "E_NOT_FOUND".to_string(),
            message: "workspace not found".to_string(),
        };
        assert_eq!(err.code(), "E_NOT_FOUND");
        assert_eq!(err.status(), Some(404));
        assert_eq!(
            err.to_string(),
            "API error E_NOT_FOUND (404): workspace not found"
        );
    }

    #[test]
    fn status_is_attached() {
        assert_eq!(ImpactError::JhTokenError { status: Some(401) }.status(), Some(401));
        assert_eq!(ImpactError::JhTokenError { status: None }.status(), None);
        assert_eq!(ImpactError::ServerNotStarted.status(), None);
        assert_eq!(
            ImpactError::UnknownApiError {
                status: Some(502),
                source: None
            }
            .status(),
            Some(502)
        );
    }

    #[test]
    fn display_includes_status() {
        assert_eq!(
            ImpactError::JhTokenError { status: Some(403) }.to_string(),
            "JupyterHub token lookup failed (HTTP 403)"
        );
        assert_eq!(
            ImpactError::JhTokenError { status: None }.to_string(),
            "JupyterHub token lookup failed"
        );
    }

    #[test]
    fn parses_error_envelope() {
        let body = br#"{"error": {"code": "E1", "message": "boom"}}"#;
        let envelope: ErrorEnvelope = serde_json::from_slice(body).unwrap();
        assert_eq!(envelope.error.code.as_deref(), Some("E1"));
        assert_eq!(envelope.error.message, "boom");

        assert!(serde_json::from_slice::<ErrorEnvelope>(b"Internal Server Error").is_err());
    }
}
