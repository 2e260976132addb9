//! Command-line access to the Umsatz.io GraphQL API.
//!
//! - `umsatzio ping` checks the credential
//! - `umsatzio call` sends a raw GraphQL document
//! - `umsatzio run` executes a connector operation with JSON parameters
//!
//! The credential comes from `UMSATZIO__CREDENTIAL__*` environment variables
//! and may be overridden by flags. Results are printed to stdout as JSON;
//! logs go to stderr.

use clap::{Parser, Subcommand};
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use umsatzio_graphql::{
    AuthMode, ClientConfig, Credential, CredentialStore, GraphqlClient, GraphqlRequest,
    InMemoryCredentialStore,
};
use umsatzio_integration::{Connector, Operation, UmsatzConnector};

#[derive(Parser)]
#[command(name = "umsatzio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// GraphQL endpoint.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Tenant API token; selects token authentication.
    #[arg(long, global = true, conflicts_with = "email")]
    token: Option<String>,

    /// Login e-mail; selects email/password authentication.
    #[arg(long, global = true, requires = "password")]
    email: Option<String>,

    #[arg(long, global = true, env = "UMSATZIO_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the credential can reach the API.
    Ping,

    /// Send a GraphQL document and print its `data`.
    Call {
        #[arg(long)]
        query: String,
        /// Variables as a JSON object.
        #[arg(long)]
        variables: Option<String>,
        #[arg(long)]
        operation_name: Option<String>,
    },

    /// Execute a connector operation, e.g. `contact.getByEmail`.
    Run {
        operation: String,
        /// Parameters as a JSON object.
        params: Option<String>,
    },

    /// List the connector operations.
    Operations,
}

#[derive(Debug)]
enum CliError {
    Config { reason: String },
    InvalidJson { argument: &'static str, reason: String },
    Failed { reason: String },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "configuration error: {reason}"),
            Self::InvalidJson { argument, reason } => {
                write!(f, "{argument} is not valid JSON: {reason}")
            }
            Self::Failed { reason } => f.write_str(reason),
        }
    }
}

impl std::error::Error for CliError {}

#[derive(Debug, Default, Deserialize)]
struct CredentialEnv {
    #[serde(default)]
    credential: Option<Credential>,
}

impl CredentialEnv {
    fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("UMSATZIO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Cli {
    fn credential(&self, base: Credential) -> Credential {
        let mut credential = base;
        if let Some(endpoint) = &self.endpoint {
            credential.endpoint.clone_from(endpoint);
        }
        if let Some(token) = &self.token {
            credential.auth_mode = AuthMode::BasicToken;
            credential.token.clone_from(token);
        }
        if let (Some(email), Some(password)) = (&self.email, &self.password) {
            credential.auth_mode = AuthMode::EmailPassword;
            credential.email.clone_from(email);
            credential.password.clone_from(password);
        }
        credential
    }
}

fn parse_json(argument: &'static str, raw: Option<&str>) -> Result<Option<Value>, Report<CliError>> {
    raw.map(|raw| {
        serde_json::from_str(raw).map_err(|e| {
            CliError::InvalidJson {
                argument,
                reason: e.to_string(),
            }
            .into()
        })
    })
    .transpose()
}

fn config_error(err: config::ConfigError) -> Report<CliError> {
    CliError::Config {
        reason: err.to_string(),
    }
    .into()
}

fn failed(err: &impl fmt::Display) -> Report<CliError> {
    CliError::Failed {
        reason: err.to_string(),
    }
    .into()
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Report<CliError>> {
    let out = serde_json::to_string_pretty(value).map_err(|e| failed(&e))?;
    println!("{out}");
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Report<CliError>> {
    let config = ClientConfig::from_env().map_err(config_error)?;
    let env = CredentialEnv::from_env().map_err(config_error)?;
    let credential = cli.credential(env.credential.unwrap_or_default());
    tracing::debug!(?credential, "resolved credential");

    let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new(credential));
    let client =
        GraphqlClient::with_config(store, config).map_err(|e| failed(e.current_context()))?;
    let connector = UmsatzConnector::new(client.clone());

    match cli.command {
        Commands::Ping => {
            client.ping().await.map_err(|e| failed(e.current_context()))?;
            print_json(&serde_json::json!({ "ok": true }))
        }
        Commands::Call {
            query,
            variables,
            operation_name,
        } => {
            let mut request = GraphqlRequest::new(query);
            if let Some(variables) = parse_json("--variables", variables.as_deref())? {
                request = request.with_variables(&variables);
            }
            if let Some(name) = operation_name {
                request = request.with_operation_name(name);
            }
            let data = client
                .call(&request)
                .await
                .map_err(|e| failed(e.current_context()))?;
            print_json(&data)
        }
        Commands::Run { operation, params } => {
            let mut op = Operation::new(operation);
            if let Some(params) = parse_json("params", params.as_deref())? {
                op = op.with_parameters(params);
            }
            let result = connector
                .execute(op)
                .await
                .map_err(|e| failed(e.current_context()))?;
            print_json(&result)
        }
        Commands::Operations => print_json(&connector.info().operations),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.current_context());
            ExitCode::FAILURE
        }
    }
}
