mod cli;
mod errors;
mod models;
mod prompts;
mod rewrite_service;

use clap::Parser;
use std::error::Error;
use tracing::{debug, info};

use crate::cli::{handle_cli, Cli};
use crate::models::config::EnvSettings;
use crate::prompts::PromptManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    // Logs go to stderr so rewritten text on stdout can be piped.
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting rewriter");

    let prompts = match &cli.prompts {
        Some(path) => PromptManager::from_file(path).await?,
        None => PromptManager::default(),
    };

    let env = EnvSettings::from_env();
    debug!(config = ?cli.config, "Dispatching command");

    handle_cli(cli, &env, prompts).await
}
