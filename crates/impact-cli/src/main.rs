//! Impact CLI - browse workspaces and experiments from a terminal.
//!
//! This is the entry point for the `impact` binary.

use clap::{Parser, Subcommand};
use impact_client::{ClientConfig, Credential, ImpactClient};
use serde_json::Value;

/// Impact CLI - browse workspaces and experiments.
#[derive(Parser, Debug)]
#[command(name = "impact")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JupyterHub address.
    #[arg(long, env = "IMPACT_SERVER_ADDRESS", default_value = "http://localhost:8000")]
    server: String,

    /// JupyterHub API token.
    #[arg(long, env = "JUPYTERHUB_API_TOKEN", hide_env_values = true)]
    jupyterhub_token: Option<String>,

    /// Impact secret key, exchanged for a session token.
    #[arg(long, env = "IMPACT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Already issued Impact session token.
    #[arg(
        long,
        env = "IMPACT_SESSION_TOKEN",
        hide_env_values = true,
        conflicts_with = "api_key"
    )]
    session_token: Option<String>,

    /// Routing path of the user's server (e.g. `/user/alice/`).
    #[arg(long, env = "JUPYTERHUB_SERVICE_PREFIX")]
    routing_path: Option<String>,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List workspaces.
    Workspaces,
    /// List experiments in a workspace.
    Experiments {
        /// Workspace ID.
        workspace: String,
    },
    /// List the cases of an experiment.
    Cases {
        /// Workspace ID.
        workspace: String,
        /// Experiment ID.
        experiment: String,
    },
    /// Show the execution status of an experiment.
    Status {
        /// Workspace ID.
        workspace: String,
        /// Experiment ID.
        experiment: String,
    },
    /// Print the log of a case.
    Log {
        /// Workspace ID.
        workspace: String,
        /// Experiment ID.
        experiment: String,
        /// Case ID.
        case: String,
    },
}

impl Args {
    fn config(&self) -> anyhow::Result<ClientConfig> {
        let credential = match (&self.session_token, &self.api_key) {
            (Some(token), _) => Credential::SessionToken(token.clone()),
            (None, Some(key)) => Credential::SecretKey(key.clone()),
            (None, None) => anyhow::bail!("either --api-key or --session-token is required"),
        };

        // An empty token is rejected by the client as missing.
        let hub_token = self.jupyterhub_token.clone().unwrap_or_default();
        let mut config = ClientConfig::new(&self.server, hub_token, credential);
        config.routing_path.clone_from(&self.routing_path);
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_env_filter("impact_client=debug,impact_cli=debug,warn")
            .with_writer(std::io::stderr)
            .init();
    }

    let client = ImpactClient::new(args.config()?)?;
    tracing::debug!(server = %client.session().server_address(), "Created Impact client");

    match &args.command {
        Command::Workspaces => print_json(&Value::Array(client.workspaces().await?))?,
        Command::Experiments { workspace } => {
            print_json(&Value::Array(client.experiments(workspace).await?))?;
        }
        Command::Cases {
            workspace,
            experiment,
        } => print_json(&Value::Array(client.cases(workspace, experiment).await?))?,
        Command::Status {
            workspace,
            experiment,
        } => print_json(&client.execution_status(workspace, experiment).await?)?,
        Command::Log {
            workspace,
            experiment,
            case,
        } => println!("{}", client.case_log(workspace, experiment, case).await?),
    }

    Ok(())
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_token_args() {
        let args = Args::try_parse_from([
            "impact",
            "--jupyterhub-token",
            "tok",
            "--session-token",
            "sess",
            "--routing-path",
            "/user/alice/",
            "experiments",
            "ws1",
        ])
        .unwrap();

        let config = args.config().unwrap();
        assert_eq!(config.jupyterhub_token.as_deref(), Some("tok"));
        assert_eq!(config.credential, Credential::SessionToken("sess".to_string()));
        assert_eq!(config.routing_path.as_deref(), Some("/user/alice/"));
        assert!(matches!(args.command, Command::Experiments { ref workspace } if workspace == "ws1"));
    }

    #[test]
    fn rejects_both_credentials() {
        let result = Args::try_parse_from([
            "impact",
            "--api-key",
            "sk",
            "--session-token",
            "sess",
            "workspaces",
        ]);
        assert!(result.is_err());
    }
}
