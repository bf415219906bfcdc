//! Rune CLI — command-line client for the Rune vault server.
//!
//! A standalone HTTP client with no internal crate dependencies — it talks
//! exclusively via the REST API. Exit code 0 on success, 1 on any failure
//! with a one-line diagnostic on standard error.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::io::Write as _;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

/// Rune — sealed secrets, envelope-encrypted.
#[derive(Parser)]
#[command(
    name = "rune-cli",
    version,
    about = "Command-line interface to the Rune secrets vault"
)]
struct Cli {
    /// Rune server address.
    #[arg(long, env = "RUNE_ADDR", default_value = "http://127.0.0.1:8200")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get a secret at a given path.
    Get {
        /// Secret path, e.g. `secrets/db/pass`.
        path: String,
    },
    /// Put a secret at a given path.
    Put {
        /// Secret path, e.g. `secrets/db/pass`.
        path: String,
        /// Secret value.
        value: String,
    },
    /// Delete the secret at a given path.
    Delete {
        /// Secret path.
        path: String,
    },
    /// List secret paths under a prefix.
    List {
        /// Path prefix, e.g. `secrets/db/`.
        prefix: String,
    },
    /// Show the seal status of the server.
    Status,
    /// Submit one unseal key share.
    Unseal {
        /// Base64-encoded key share.
        share: String,
    },
}

// ── HTTP client ──────────────────────────────────────────────────────

struct Client {
    http: reqwest::Client,
    addr: String,
}

impl Client {
    fn new(addr: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            addr: addr.trim_end_matches('/').to_owned(),
        }
    }

    async fn get_secret(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{}/v1/secret/data/{path}", self.addr))
            .send()
            .await
            .context("failed to reach server")?;
        handle_response(resp).await
    }

    async fn put_secret(&self, path: &str, value: &[u8]) -> Result<Value> {
        let resp = self
            .http
            .put(format!("{}/v1/secret/data/{path}", self.addr))
            .json(&json!({ "value": BASE64.encode(value) }))
            .send()
            .await
            .context("failed to reach server")?;
        handle_response(resp).await
    }

    async fn delete_secret(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .delete(format!("{}/v1/secret/data/{path}", self.addr))
            .send()
            .await
            .context("failed to reach server")?;
        handle_response(resp).await
    }

    async fn list_secrets(&self, prefix: &str) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{}/v1/secret/list/{prefix}", self.addr))
            .send()
            .await
            .context("failed to reach server")?;
        handle_response(resp).await
    }

    async fn seal_status(&self) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{}/v1/sys/seal-status", self.addr))
            .send()
            .await
            .context("failed to reach server")?;
        handle_response(resp).await
    }

    async fn unseal(&self, share: &str) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}/v1/sys/unseal", self.addr))
            .json(&json!({ "share": share }))
            .send()
            .await
            .context("failed to reach server")?;
        handle_response(resp).await
    }
}

/// Turn an HTTP response into JSON, surfacing server error bodies as a
/// one-line message.
async fn handle_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }

    let body: Value = resp
        .json()
        .await
        .with_context(|| format!("invalid response from server (status {status})"))?;

    if !status.is_success() {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("server returned {status}: {message}");
    }
    Ok(body)
}

// ── Entry point ──────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = Client::new(cli.addr);

    match run(client, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rune-cli: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(client: Client, command: Commands) -> Result<()> {
    match command {
        Commands::Get { path } => {
            let resp = client.get_secret(&path).await?;
            let encoded = resp
                .get("value")
                .and_then(Value::as_str)
                .context("server response is missing the secret value")?;
            let value = BASE64
                .decode(encoded)
                .context("server returned an undecodable value")?;
            // Raw bytes to stdout; the value need not be UTF-8.
            let mut stdout = std::io::stdout();
            stdout.write_all(&value).context("failed to write value")?;
            if !value.ends_with(b"\n") {
                println!();
            }
        }
        Commands::Put { path, value } => {
            client.put_secret(&path, value.as_bytes()).await?;
            println!("Secret stored at {path:?}");
        }
        Commands::Delete { path } => {
            client.delete_secret(&path).await?;
            println!("Secret deleted at {path:?}");
        }
        Commands::List { prefix } => {
            let resp = client.list_secrets(&prefix).await?;
            if let Some(keys) = resp.get("keys").and_then(Value::as_array) {
                for key in keys {
                    if let Some(k) = key.as_str() {
                        println!("{k}");
                    }
                }
            }
        }
        Commands::Status => {
            let resp = client.seal_status().await?;
            let sealed = resp.get("sealed").and_then(Value::as_bool).unwrap_or(true);
            let threshold = resp.get("threshold").and_then(Value::as_u64).unwrap_or(0);
            let shares = resp.get("shares").and_then(Value::as_u64).unwrap_or(0);
            let progress = resp.get("progress").and_then(Value::as_u64).unwrap_or(0);

            println!("Sealed:    {sealed}");
            println!("Shares:    {shares}");
            println!("Threshold: {threshold}");
            if sealed {
                println!("Progress:  {progress}/{threshold}");
            }
        }
        Commands::Unseal { share } => {
            let resp = client.unseal(&share).await?;
            let sealed = resp.get("sealed").and_then(Value::as_bool).unwrap_or(true);
            if sealed {
                let threshold = resp.get("threshold").and_then(Value::as_u64).unwrap_or(0);
                let progress = resp.get("progress").and_then(Value::as_u64).unwrap_or(0);
                println!("Share accepted: {progress}/{threshold}");
            } else {
                println!("Vault is unsealed");
            }
        }
    }
    Ok(())
}
