use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::health::Metrics;
use crate::telegram::TelegramApi;
use crate::transport::ReliableClient;

/// Quizforge - Telegram quiz bot built to survive sleepy free-tier hosting.
#[derive(Parser, Debug)]
#[command(name = "quizforge")]
#[command(version)]
#[command(about = "Turns quiz JSON into Telegram quiz polls.", long_about = None)]
pub struct Cli {
    /// Config file path (default: ./quizforge.toml, then ~/.quizforge/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the webhook service
    Serve,

    /// Print the health snapshot of the locally running service
    Status,

    /// Manage the Telegram webhook registration
    Webhook {
        #[command(subcommand)]
        webhook_command: WebhookCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum WebhookCommands {
    /// Point Telegram at this deployment's webhook endpoint
    Set {
        /// Public base URL; overrides config/WEBHOOK_URL
        #[arg(long)]
        url: Option<String>,
    },

    /// Show what Telegram currently has registered
    Info,
}

pub async fn run_status(config: &Config) -> Result<()> {
    let url = format!("http://127.0.0.1:{}/health", config.server.port);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("failed to build status client")?;
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("no service answering at {url}"))?;
    let body: serde_json::Value = response
        .json()
        .await
        .context("health response was not JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub async fn run_webhook(config: &Config, command: WebhookCommands) -> Result<()> {
    let token = config
        .bot_token()
        .context("bot token is not configured; set TELEGRAM_BOT_TOKEN")?
        .to_string();
    let metrics = Arc::new(Metrics::new());
    let client = Arc::new(ReliableClient::new(&config.http, metrics));
    let api = TelegramApi::new(client, token.clone());

    match command {
        WebhookCommands::Set { url } => {
            let base = url
                .as_deref()
                .or_else(|| config.public_url())
                .context("no public url; pass --url or set WEBHOOK_URL")?
                .trim_end_matches('/')
                .to_string();
            let endpoint = format!("{base}/webhook/{token}");
            api.set_webhook(&endpoint).await?;
            println!("webhook set to {endpoint}");
        }
        WebhookCommands::Info => {
            let info = api.webhook_info().await?;
            if info.url.is_empty() {
                println!("url: (none registered)");
            } else {
                println!("url: {}", info.url);
            }
            println!("pending updates: {}", info.pending_update_count);
            if let Some(error) = info.last_error_message {
                println!("last error: {error}");
            }
        }
    }
    Ok(())
}
