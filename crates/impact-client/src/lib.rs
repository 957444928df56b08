//! Client for the Impact simulation service running behind JupyterHub.
//!
//! Impact is only reachable through a JupyterHub deployment, so every session
//! needs two credentials: a JupyterHub API token for the hub itself, and an
//! Impact session token obtained by exchanging a secret key.
//!
//! - **Session bootstrap**: resolves the routing path of the user's server and
//!   runs the login exchange, once per session
//! - **Transport**: one `reqwest` client whose bearer headers and cookie jar
//!   track the credentials known so far
//! - **Cookie storage**: the session token arrives as an `access_token` cookie,
//!   read from an explicit jar in headless processes or from `document.cookie`
//!   in the browser
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   ImpactClient   │────▶│     Session      │── GET /hub/api/authorizations/token/…
//! │   (API calls)    │     │   (bootstrap)    │── POST <path>/service/api/login
//! └──────────────────┘     └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │ TransportManager │
//!                          │ (reqwest client) │
//!                          └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │  CookieStorage   │
//!                          │ (jar | document) │
//!                          └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use impact_client::{ClientConfig, Credential, ImpactClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new(
//!     "https://impact.example.com",
//!     "jupyterhub-api-token",
//!     Credential::SecretKey("impact-secret-key".to_string()),
//! );
//!
//! let client = ImpactClient::new(config)?;
//! for workspace in client.workspaces().await? {
//!     println!("{}", workspace["id"]);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod config;
pub mod cookies;
pub mod environment;
pub mod error;
pub mod session;
pub mod transport;

pub use api::{ImpactClient, TRAJECTORIES_V2};
pub use config::{ClientConfig, Credential};
pub use cookies::{BrowserDocument, CookieStorage, DocumentCookies, ACCESS_TOKEN_COOKIE};
pub use environment::CookieMode;
pub use error::{ImpactError, Result};
pub use session::Session;
pub use transport::{
    reconcile, Credentials, TransportConfig, TransportManager, GATEWAY_AUTH_HEADER,
    SERVICE_AUTH_HEADER,
};
