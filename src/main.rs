use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod conversation;
mod events;
mod llm;
mod prompts;
mod session;
mod tui;
mod ui;

use config::Config;
use llm::{HttpProvider, InferenceProvider, LoggingProvider, ScriptedProvider};
use session::{APOLOGY, LoadOutcome, SendOutcome, SessionController};

#[derive(Parser)]
#[command(name = "parley")]
#[command(version)]
#[command(about = "Chat with a small text-generation model from the terminal", long_about = None)]
struct Cli {
    /// Config file (default: ~/.parley/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model to load instead of the configured one
    #[arg(long, global = true)]
    model: Option<String>,

    /// Initial max new tokens, clamped to the slider range
    #[arg(long, global = true)]
    max_new_tokens: Option<u32>,

    /// Use the built-in echo model instead of the network
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the model, send one message and print the reply
    Ask { message: String },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.model.id = model;
    }
    if let Some(max_new_tokens) = cli.max_new_tokens {
        config.generation.max_new_tokens = max_new_tokens;
    }
    config.validate()?;

    init_logging(&config)?;
    tracing::info!(model = %config.model.id, offline = cli.offline, "starting parley");

    match cli.command {
        None => {
            let controller = SessionController::new(&config, build_provider(&config, cli.offline)?);
            app::run(controller).await
        }
        Some(Commands::Ask { message }) => {
            let controller = SessionController::new(&config, build_provider(&config, cli.offline)?);
            ask(controller, &message).await
        }
        Some(Commands::Config { write }) => {
            print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
            if write {
                let path = cli.config.unwrap_or_else(|| config.default_path());
                config.save(&path)?;
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }
    }
}

fn build_provider(config: &Config, offline: bool) -> Result<Arc<dyn InferenceProvider>> {
    let inner: Arc<dyn InferenceProvider> = if offline {
        Arc::new(ScriptedProvider::echo())
    } else {
        Arc::new(HttpProvider::new(&config.provider)?)
    };
    Ok(Arc::new(LoggingProvider::new(inner)))
}

/// One-shot chat: load, send, print.
async fn ask(mut controller: SessionController, message: &str) -> Result<()> {
    let outcome = controller
        .request_model_load(|progress| {
            match &progress.file {
                Some(file) => eprint!("\r\x1b[2KLoading model… {}% ({file})", progress.percent()),
                None => eprint!("\r\x1b[2KLoading model… {}%", progress.percent()),
            }
            let _ = std::io::stderr().flush();
        })
        .await;
    eprintln!();

    if outcome != LoadOutcome::Ready {
        bail!("{}", controller.status());
    }

    match controller.request_send(message).await {
        SendOutcome::Replied(reply) => {
            println!("{reply}");
            Ok(())
        }
        SendOutcome::Failed => bail!(APOLOGY),
        SendOutcome::Ignored => bail!("Nothing to send"),
    }
}

/// Logs go to a file; the terminal belongs to the UI.
fn init_logging(config: &Config) -> Result<()> {
    if let Some(parent) = config.log_file.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .with_context(|| format!("Failed to open log file {}", config.log_file.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
