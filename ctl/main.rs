#![forbid(unsafe_code)]

//! `persona-mcp-ctl`: admin client for a running `persona-mcp` server.
//!
//! Talks to the authenticated `/admin` routes of an SSE or http-stream
//! server. Reads the bearer token from `--token` or `MCP_ADMIN_TOKEN`.

use clap::{Parser, Subcommand};
use reqwest::{Method, StatusCode};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(
    name = "persona-mcp-ctl",
    about = "Admin client for persona-mcp",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the server.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    url: String,

    /// Admin bearer token (must match `server.admin_token`).
    #[arg(long, env = "MCP_ADMIN_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the server is up.
    Health,

    /// Reload the configuration file.
    Reload,

    /// Show the active (redacted) configuration.
    Config,

    /// List every tool, including disabled ones.
    Tools,

    /// Enable a tool.
    Enable {
        /// Tool name.
        name: String,
    },

    /// Disable a tool.
    Disable {
        /// Tool name.
        name: String,
    },

    /// Enable every tool in a category.
    EnableCategory {
        /// Category name.
        category: String,
    },

    /// Disable every tool in a category.
    DisableCategory {
        /// Category name.
        category: String,
    },
}

impl Command {
    fn route(&self) -> (Method, String) {
        match self {
            Self::Health => (Method::GET, "/health".into()),
            Self::Reload => (Method::POST, "/admin/reload".into()),
            Self::Config => (Method::GET, "/admin/config".into()),
            Self::Tools => (Method::GET, "/admin/tools".into()),
            Self::Enable { name } => (Method::POST, format!("/admin/tools/{name}/enable")),
            Self::Disable { name } => (Method::POST, format!("/admin/tools/{name}/disable")),
            Self::EnableCategory { category } => {
                (Method::POST, format!("/admin/categories/{category}/enable"))
            }
            Self::DisableCategory { category } => {
                (Method::POST, format!("/admin/categories/{category}/disable"))
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Cli::parse();
    let (method, path) = args.command.route();
    let url = format!("{}{path}", args.url.trim_end_matches('/'));

    match send(method, &url, args.token.as_deref()).await {
        Ok((status, body)) if status.is_success() => {
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
        Ok((status, body)) => {
            let err_msg = body
                .get("error")
                .and_then(Value::as_str)
                .map_or_else(|| status.to_string(), str::to_owned);
            eprintln!("Error ({status}): {err_msg}");
            if status == StatusCode::NOT_FOUND && path.starts_with("/admin") {
                eprintln!("Is server.admin_token configured on the server?");
            }
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to reach server at {url}: {err}");
            std::process::exit(1);
        }
    }
}

/// Send one admin request and decode its JSON body (`null` when empty).
async fn send(
    method: Method,
    url: &str,
    token: Option<&str>,
) -> std::result::Result<(StatusCode, Value), reqwest::Error> {
    let mut request = reqwest::Client::new().request(method, url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    let body = serde_json::from_str(&text).unwrap_or(Value::Null);
    Ok((status, body))
}
