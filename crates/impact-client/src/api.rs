//! Session-bound calls to the Impact REST API.
//!
//! Every operation bootstraps the session, issues exactly one request under
//! `<routing path>/service/api/`, and extracts its payload. Responses are
//! returned as untyped JSON.

use std::sync::Arc;

use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::cookies::DocumentCookies;
use crate::error::{ImpactError, Result};
use crate::session::Session;

/// Media type selecting the v2 trajectory response shape.
pub const TRAJECTORIES_V2: &str = "application/vnd.impact.trajectories.v2+json";

/// Client for the Impact API behind JupyterHub.
///
/// Cloning is cheap; clones share one session.
#[derive(Debug, Clone)]
pub struct ImpactClient {
    session: Arc<Session>,
}

impl ImpactClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `MissingJupyterHubToken` if no hub token is configured, before
    /// any request is made.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            session: Arc::new(Session::new(config)?),
        })
    }

    /// Create a client reading ambient cookies from `document`.
    ///
    /// # Errors
    ///
    /// Same as [`ImpactClient::new`].
    pub fn with_document_cookies(
        config: ClientConfig,
        document: Arc<dyn DocumentCookies>,
    ) -> Result<Self> {
        Ok(Self {
            session: Arc::new(Session::with_document_cookies(config, document)?),
        })
    }

    /// The underlying session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Use a session token obtained elsewhere.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value.
    pub fn set_session_token(&self, token: impl Into<String>) -> Result<()> {
        self.session.set_session_token(token)
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &[&str],
        configure: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response> {
        let routing_path = self.session.bootstrap().await?;
        let url = self.session.service_url(routing_path, endpoint)?;

        let request = self.session.transport().client().request(method, url);
        let response = configure(request)
            .send()
            .await
            .map_err(ImpactError::from_transport)?;

        ImpactError::check(response).await
    }

    async fn get_json(&self, endpoint: &[&str]) -> Result<Value> {
        self.send(Method::GET, endpoint, |request| request)
            .await?
            .json()
            .await
            .map_err(ImpactError::Request)
    }

    // =========================================================================
    // Workspaces
    // =========================================================================

    /// List workspaces.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn workspaces(&self) -> Result<Vec<Value>> {
        items(self.get_json(&["workspaces"]).await?)
    }

    /// Get one workspace.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn workspace(&self, workspace_id: &str) -> Result<Value> {
        self.get_json(&["workspaces", workspace_id]).await
    }

    // =========================================================================
    // Experiments
    // =========================================================================

    /// List experiments in a workspace.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn experiments(&self, workspace_id: &str) -> Result<Vec<Value>> {
        items(
            self.get_json(&["workspaces", workspace_id, "experiments"])
                .await?,
        )
    }

    /// Create an experiment from a definition and return its ID.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error, or `UnexpectedPayload` if the
    /// response has no `experiment_id`.
    pub async fn create_experiment(&self, workspace_id: &str, definition: &Value) -> Result<String> {
        let body: Value = self
            .send(
                Method::POST,
                &["workspaces", workspace_id, "experiments"],
                |request| request.json(definition),
            )
            .await?
            .json()
            .await
            .map_err(ImpactError::Request)?;

        body.get("experiment_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ImpactError::UnexpectedPayload("experiment_id"))
    }

    /// Start executing an experiment, optionally restricted to some cases.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn run_experiment(
        &self,
        workspace_id: &str,
        experiment_id: &str,
        case_ids: Option<&[String]>,
    ) -> Result<()> {
        let body = case_ids.map_or_else(
            || json!({}),
            |ids| json!({ "includeCases": { "ids": ids } }),
        );

        self.send(
            Method::POST,
            &["workspaces", workspace_id, "experiments", experiment_id, "execution"],
            |request| request.json(&body),
        )
        .await?;
        Ok(())
    }

    /// Get the execution progress of an experiment.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn execution_status(&self, workspace_id: &str, experiment_id: &str) -> Result<Value> {
        self.get_json(&["workspaces", workspace_id, "experiments", experiment_id, "execution"])
            .await
    }

    /// Cancel a running experiment.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn cancel_execution(&self, workspace_id: &str, experiment_id: &str) -> Result<()> {
        self.send(
            Method::DELETE,
            &["workspaces", workspace_id, "experiments", experiment_id, "execution"],
            |request| request,
        )
        .await?;
        Ok(())
    }

    /// Delete an experiment.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn delete_experiment(&self, workspace_id: &str, experiment_id: &str) -> Result<()> {
        self.send(
            Method::DELETE,
            &["workspaces", workspace_id, "experiments", experiment_id],
            |request| request,
        )
        .await?;
        Ok(())
    }

    /// Get the variables available in an experiment's results.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn experiment_variables(
        &self,
        workspace_id: &str,
        experiment_id: &str,
    ) -> Result<Value> {
        self.get_json(&["workspaces", workspace_id, "experiments", experiment_id, "variables"])
            .await
    }

    /// Get trajectories for `variable_names` across all cases.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn trajectories(
        &self,
        workspace_id: &str,
        experiment_id: &str,
        variable_names: &[String],
    ) -> Result<Value> {
        self.send(
            Method::POST,
            &["workspaces", workspace_id, "experiments", experiment_id, "trajectories"],
            |request| {
                request
                    .header(ACCEPT, TRAJECTORIES_V2)
                    .json(&json!({ "variable_names": variable_names }))
            },
        )
        .await?
        .json()
        .await
        .map_err(ImpactError::Request)
    }

    // =========================================================================
    // Cases
    // =========================================================================

    /// List the cases of an experiment.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn cases(&self, workspace_id: &str, experiment_id: &str) -> Result<Vec<Value>> {
        items(
            self.get_json(&["workspaces", workspace_id, "experiments", experiment_id, "cases"])
                .await?,
        )
    }

    /// Get one case.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn case(&self, workspace_id: &str, experiment_id: &str, case_id: &str) -> Result<Value> {
        self.get_json(&["workspaces", workspace_id, "experiments", experiment_id, "cases", case_id])
            .await
    }

    /// Get the simulation log of a case.
    ///
    /// # Errors
    ///
    /// Returns a bootstrap or API error.
    pub async fn case_log(
        &self,
        workspace_id: &str,
        experiment_id: &str,
        case_id: &str,
    ) -> Result<String> {
        self.send(
            Method::GET,
            &["workspaces", workspace_id, "experiments", experiment_id, "cases", case_id, "log"],
            |request| request,
        )
        .await?
        .text()
        .await
        .map_err(ImpactError::Request)
    }
}

/// Unwrap `data.items` from a list response.
fn items(mut body: Value) -> Result<Vec<Value>> {
    match body.pointer_mut("/data/items").map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(ImpactError::UnexpectedPayload("data.items")),
    }
}
