// src/cli.rs
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::{error::Error, path::PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::models::config::{ConfigStore, Configuration, EnvSettings};
use crate::models::providers::AvailabilityProber;
use crate::models::{ProviderAvailability, ProviderKind};
use crate::prompts::PromptManager;
use crate::rewrite_service::RewriteService;

#[derive(Parser, Debug)]
#[command(author, version, about = "Rewrite text with OpenAI, Gemini or Ollama", long_about = None)]
pub struct Cli {
    /// Configuration file (.json, .yaml or .yml)
    #[arg(long, global = true, env = "REWRITER_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// YAML file overriding the built-in prompts
    #[arg(long, global = true, value_name = "PATH")]
    pub prompts: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rewrite text read from the argument, a file or stdin
    Rewrite(RewriteArgs),
    /// Show which providers are reachable right now
    Providers,
    /// Make PROVIDER the active provider
    Switch { provider: String },
    /// Set one configuration entry of a provider
    Set {
        provider: String,
        key: String,
        /// JSON value; anything that is not valid JSON is taken as a string
        value: String,
    },
    /// Print the configuration with API keys hidden
    Config,
    /// Print the model currently in use
    Info,
}

#[derive(Args, Debug)]
pub struct RewriteArgs {
    /// Text to rewrite
    pub text: Option<String>,

    /// Read the text from a file instead
    #[arg(long, value_name = "PATH", conflicts_with = "text")]
    pub file: Option<PathBuf>,

    /// Custom prompt; `{content}` marks where the text goes
    #[arg(long)]
    pub prompt: Option<String>,

    /// Switch to this provider before rewriting
    #[arg(long, value_enum, value_name = "TYPE")]
    pub provider: Option<ProviderKind>,

    /// Model to use for the active provider
    #[arg(long)]
    pub model: Option<String>,

    /// Sampling temperature for the active provider
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Also report provider, length and duration on stderr
    #[arg(long)]
    pub stats: bool,
}

/// `0.5` and `true` keep their JSON types, `gpt-4o` becomes a string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn format_availability(availability: &ProviderAvailability) -> String {
    ProviderKind::ALL
        .into_iter()
        .map(|provider| {
            let status = if availability.is_available(provider) {
                "available"
            } else {
                "unavailable"
            };
            format!("{:<8} {}", provider.as_str(), status)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn read_input(
    text: Option<String>,
    file: Option<PathBuf>,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = file {
        debug!("Reading content from {}", path.display());
        return Ok(tokio::fs::read_to_string(&path).await?);
    }

    let mut content = String::new();
    tokio::io::stdin().read_to_string(&mut content).await?;
    Ok(content)
}

fn failed(what: &str) -> Box<dyn Error + Send + Sync> {
    format!("{} failed, see the log for details", what).into()
}

/// Runs one command. `providers`, `config` and `set` only touch the
/// configuration file and the network probes, so they keep working while
/// no provider is reachable; the others need a bound model.
pub async fn handle_cli(
    cli: Cli,
    env: &EnvSettings,
    prompts: PromptManager,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let defaults = Configuration::defaults(env);

    match cli.command {
        Command::Providers => {
            let store = ConfigStore::open(cli.config, &defaults).await;
            let prober = AvailabilityProber::new(reqwest::Client::new());
            println!("{}", format_availability(&prober.probe(store.config()).await));
        }
        Command::Config => {
            let store = ConfigStore::open(cli.config, &defaults).await;
            println!("{}", serde_json::to_string_pretty(&store.config().redacted())?);
        }
        Command::Set {
            provider,
            key,
            value,
        } => {
            let mut store = ConfigStore::open(cli.config, &defaults).await;
            store.update(&provider, &key, parse_value(&value)).await?;
            println!("Updated {}.{}", provider, key);
        }
        Command::Rewrite(args) => {
            let service = RewriteService::new(cli.config, env, prompts).await?;
            rewrite(&service, args).await?;
        }
        Command::Switch { provider } => {
            let service = RewriteService::new(cli.config, env, prompts).await?;
            if !service.switch_provider(&provider).await {
                return Err(failed("Switching provider"));
            }
            if let Some(info) = service.get_model_info().await {
                println!("Using {} ({})", info.provider, info.model_name);
            }
        }
        Command::Info => {
            let service = RewriteService::new(cli.config, env, prompts).await?;
            match service.get_model_info().await {
                Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                None => println!("No model bound"),
            }
        }
    }
    Ok(())
}

async fn rewrite(
    service: &RewriteService,
    args: RewriteArgs,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if let Some(provider) = args.provider {
        if !service.switch_provider(provider.as_str()).await {
            return Err(failed("Switching provider"));
        }
    }

    let active = service.get_config().await.active_provider;
    if let Some(model) = args.model {
        if !service
            .update_config(active.as_str(), "model_name", Value::String(model))
            .await
        {
            return Err(failed("Setting the model"));
        }
    }
    if let Some(temperature) = args.temperature {
        if !service
            .update_config(active.as_str(), "temperature", Value::from(temperature))
            .await
        {
            return Err(failed("Setting the temperature"));
        }
    }

    let content = read_input(args.text, args.file).await?;

    if args.stats {
        let result = service
            .rewrite_detailed(&content, args.prompt.as_deref())
            .await?;
        eprintln!(
            "{}: {} chars, {} words in {:.2}s",
            result.provider,
            result.char_count,
            result.word_count,
            result.elapsed.as_secs_f64()
        );
        println!("{}", result.text);
        return Ok(());
    }

    let text = service.rewrite(&content, args.prompt.as_deref()).await?;
    if text.is_empty() {
        return Err(failed("Rewriting"));
    }
    info!("Rewrite finished");
    println!("{}", text);
    Ok(())
}
