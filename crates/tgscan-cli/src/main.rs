mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tgscan")]
#[command(about = "Group scanner operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the cached group list
    Groups {
        /// Only groups matching the configured selectors
        #[arg(long)]
        selected: bool,
    },
    /// Evaluate a text against the configured relevance criteria
    Check {
        text: String,
        /// Text recovered from an attachment, matched alongside the body
        #[arg(long)]
        extracted: Option<String>,
        /// MIME type of the attachment the text came with
        #[arg(long)]
        mime: Option<String>,
    },
    /// Print the effective configuration with credentials redacted
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = tgscan_core::load_scanner_config_from_env()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Groups { selected } => commands::run_groups(&config, selected).await?,
        Commands::Check {
            text,
            extracted,
            mime,
        } => commands::run_check(&config, text, extracted, mime.as_deref())?,
        Commands::Config => println!("{config:#?}"),
    }

    Ok(())
}
