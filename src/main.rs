#![warn(clippy::all, clippy::pedantic)]

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use quizforge::cli::{self, Cli, Commands};
use quizforge::{Config, daemon};

#[tokio::main]
async fn main() -> Result<()> {
    // Rustls will not pick a process-level CryptoProvider on its own when more
    // than one implementation is compiled in, so select ring explicitly before
    // any client is built.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let args = Cli::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Commands::Serve => daemon::run(config).await,
        Commands::Status => cli::run_status(&config).await,
        Commands::Webhook { webhook_command } => cli::run_webhook(&config, webhook_command).await,
    }
}
