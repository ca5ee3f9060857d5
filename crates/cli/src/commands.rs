//! CLI commands

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use crm_frontend_common::services::with_auth_error_handling;
use crm_frontend_common::{AuthApiService, AuthProvider};
use crm_http::client::{ListQuery, Resource};
use crm_http::{AuthClient, ClientConfig, Navigator, RefreshOutcome};
use serde_json::{Value, json};
use std::io::{BufRead, Read, Write};
use std::sync::Arc;
use tracing::debug;

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: String,

        /// Password; prompted on stdin when absent
        #[arg(long, env = "CRM_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Sign out and clear the stored session
    Logout,

    /// Print the signed-in user
    Whoami,

    /// Show the stored session state
    Status,

    /// Refresh the access token now
    Refresh,

    /// Work with a pipeline collection (leads, opportunities, invoices, ...)
    Resource {
        kind: Resource,

        #[command(subcommand)]
        action: ResourceAction,
    },

    /// Fetch an analytics report
    Analytics {
        /// Report name, e.g. pipeline-summary
        name: String,

        /// Query parameter as key=value, repeatable
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ResourceAction {
    /// List records
    List {
        #[arg(long)]
        page: Option<u32>,

        #[arg(long)]
        page_size: Option<u32>,

        #[arg(long)]
        search: Option<String>,
    },

    /// Fetch one record
    Get { id: String },

    /// Create a record from JSON (`-` reads stdin)
    Create {
        #[arg(long)]
        data: String,
    },

    /// Update a record from JSON (`-` reads stdin)
    Update {
        id: String,

        #[arg(long)]
        data: String,
    },

    /// Delete a record
    Delete { id: String },
}

/// Tells the user to sign in again when the session ends
struct HintNavigator;

impl Navigator for HintNavigator {
    fn redirect_to_sign_in(&self) {
        eprintln!("Session expired, run `crm login` to sign in again");
    }
}

impl Commands {
    pub async fn execute(self, config: &ClientConfig) -> Result<()> {
        let client = AuthClient::from_config(config, Arc::new(HintNavigator))
            .context("Failed to create API client")?;
        debug!(session = %config.data_dir().display(), "Using stored session");
        let provider = AuthProvider::with_interval(client.clone(), config.expiry_check_interval());

        match self {
            Self::Login { email, password } => {
                let password = match password {
                    Some(password) => password,
                    None => prompt_password()?,
                };
                let user = provider.login(&email, &password).await?;
                println!("Signed in as {} <{}>", user.display_name(), user.email);
                Ok(())
            }
            Self::Logout => {
                provider.logout().await?;
                println!("Signed out");
                Ok(())
            }
            Self::Whoami => {
                provider.init().await;
                let user = provider.require_user()?;
                print_json(&serde_json::to_value(user)?)
            }
            Self::Status => {
                let state = provider.init().await;
                let store = client.token_store();
                print_json(&json!({
                    "authenticated": state.is_authenticated,
                    "user": state.user,
                    "expiresAt": store.expires_at().map(|at| at.to_rfc3339()),
                    "error": state.error,
                    "baseUrl": config.base_url,
                }))
            }
            Self::Refresh => {
                let service = AuthApiService::new(client);
                match service.refresh().await.map_err(anyhow::Error::msg)? {
                    RefreshOutcome::Retained(_) => {
                        println!("Refresh endpoint unavailable, current token kept");
                    }
                    _ => println!("Access token refreshed"),
                }
                Ok(())
            }
            Self::Resource { kind, action } => {
                let action = action.with_stdin_data(std::io::stdin().lock())?;
                let value = with_auth_error_handling(&provider, action.run(&client, kind)).await?;
                print_json(&value)
            }
            Self::Analytics { name, params } => {
                let value =
                    with_auth_error_handling(&provider, client.analytics(&name, &params)).await?;
                print_json(&value)
            }
        }
    }
}

impl ResourceAction {
    /// Replace `-` data with the JSON read from `stdin`
    fn with_stdin_data(self, stdin: impl Read) -> Result<Self> {
        Ok(match self {
            Self::Create { data } => Self::Create {
                data: read_data(data, stdin)?,
            },
            Self::Update { id, data } => Self::Update {
                id,
                data: read_data(data, stdin)?,
            },
            other => other,
        })
    }

    async fn run(self, client: &AuthClient, kind: Resource) -> Result<Value, crm_http::ClientError> {
        let resource = client.resource(kind);
        match self {
            Self::List {
                page,
                page_size,
                search,
            } => {
                resource
                    .list(&ListQuery {
                        page,
                        page_size,
                        search,
                    })
                    .await
            }
            Self::Get { id } => resource.get(&id).await,
            Self::Create { data } => resource.create(serde_json::from_str(&data)?).await,
            Self::Update { id, data } => resource.update(&id, serde_json::from_str(&data)?).await,
            Self::Delete { id } => {
                resource.delete(&id).await?;
                Ok(json!({ "deleted": id }))
            }
        }
    }
}

fn prompt_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("A password is required");
    }
    Ok(password)
}

fn read_data(data: String, mut stdin: impl Read) -> Result<String> {
    if data != "-" {
        return Ok(data);
    }
    let mut buffer = String::new();
    stdin
        .read_to_string(&mut buffer)
        .context("Failed to read JSON from stdin")?;
    Ok(buffer)
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
