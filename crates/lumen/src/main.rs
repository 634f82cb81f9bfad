//! Lumen CLI - turn images into text-to-image prompts with vision LLMs.
//!
//! Lumen sends each image to Gemini or OpenRouter and collects a generated
//! prompt. Requests are spaced and retried to stay under provider rate
//! limits, so long lists of images can run unattended.
//!
//! # Usage
//!
//! ```bash
//! # Generate a prompt for one image
//! lumen generate https://example.com/cat.jpg
//!
//! # A list of images through an OpenRouter free model, streamed as JSONL
//! lumen generate --input-file images.txt --provider openrouter --format jsonl -o prompts.jsonl
//!
//! # Resume an interrupted run
//! lumen generate --input-file images.txt --format jsonl -o prompts.jsonl --skip-existing
//!
//! # View configuration
//! lumen config show
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Lumen - turn images into text-to-image prompts with vision LLMs.
#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate prompts for images
    Generate(cli::generate::GenerateArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so use eprintln for config warnings.
    let config = match lumen_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `lumen config path`."
            );
            lumen_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Lumen v{}", lumen_core::VERSION);

    match cli.command {
        Commands::Generate(args) => cli::generate::execute(args).await,
        Commands::Config(args) => cli::config::execute(args).await,
    }
}
