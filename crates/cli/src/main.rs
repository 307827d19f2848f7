//! Toolloop CLI: the main entry point.
//!
//! Commands:
//! - `run`    : Send a prompt through the multi-step tool loop
//! - `tools`  : List the built-in tools
//! - `config` : Create, show and validate the config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use toolloop_config::LoggingConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "toolloop",
    about = "Toolloop: multi-step LLM tool calling from the terminal",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.toolloop/config.toml
    #[arg(long, global = true, env = "TOOLLOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt through the tool loop
    Run(commands::run::RunArgs),

    /// List the built-in tools and their parameter schemas
    Tools {
        /// Print the tool definitions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Check the config file for errors
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // A broken config must not stop `config init` or `config validate`
    let loaded = commands::load_config(config_path);
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_tracing(cli.verbose, &logging);

    match cli.command {
        Commands::Run(args) => commands::run::run(loaded?, args).await?,
        Commands::Tools { json } => commands::tools::run(json)?,
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force)?,
            ConfigAction::Show => commands::config_cmd::show(&loaded?)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path, loaded)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
        },
    }

    Ok(())
}

/// `RUST_LOG` wins, then `--verbose`, then `[logging] level`.
fn init_tracing(verbose: bool, logging: &LoggingConfig) {
    let fallback = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
