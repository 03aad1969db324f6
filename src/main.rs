//! Main entry point for the EPUBox Translator CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epubox_translator::cli::commands::{self, Commands};
use epubox_translator::TranslatorConfig;

/// EPUBox Translator - translate HTML chapters while keeping their markup
#[derive(Parser, Debug)]
#[command(name = "epubox-translator", version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine config file (toml, yaml or json); EPUBOX_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("epubox_translator={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TranslatorConfig::load(args.config.as_deref())?;

    // Execute command
    match args.command {
        Some(Commands::Translate(translate)) => {
            commands::handle_translate(translate, config).await?;
        }
        Some(Commands::Status {
            document_id,
            progress_dir,
        }) => {
            commands::handle_status(document_id, progress_dir, config).await?;
        }
        Some(Commands::Providers { registry }) => {
            commands::handle_providers(registry, config).await?;
        }
        None => {
            println!("Please specify a command. Use --help for more information.");
        }
    }

    Ok(())
}
