use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod configuration;
mod error;
mod prompt;
mod session;

use configuration::Settings;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to ~/.config/converse/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session
    Session {
        /// Name of the session, used for the recording file
        #[arg(short, long)]
        name: Option<String>,

        /// Continue the conversation recorded under this name
        #[arg(short, long, requires = "name")]
        resume: bool,
    },
    /// Send a single message and print the reply
    Run {
        /// Message text (read from stdin when omitted)
        #[arg(short, long)]
        text: Option<String>,

        /// Name of the session, used for the recording file
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List the models the catalog knows for a provider
    Models {
        #[arg(short, long, default_value = "openai")]
        provider: String,
    },
    /// Display the current version
    Version,
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::from_file(&path)?,
        None => Settings::new()?,
    };
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::Session { name, resume }) => {
            commands::session::execute(load_settings(cli.config)?, name, resume).await
        }
        Some(Command::Run { text, name }) => {
            commands::run::execute(load_settings(cli.config)?, text, name).await
        }
        Some(Command::Models { provider }) => commands::models::execute(&provider),
        Some(Command::Version) => commands::version::execute().await,
        None => commands::session::execute(load_settings(cli.config)?, None, false).await,
    }
}
