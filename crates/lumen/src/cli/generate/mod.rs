//! The `lumen generate` command for turning images into prompts.

mod batch;
mod references;
mod setup;
pub mod types;

pub use types::{OutputFormat, Provider};

use clap::Args;
use lumen_core::{LlmProvider, Orchestrator, OutputFormat as CoreOutputFormat};
use std::path::PathBuf;
use std::sync::Arc;

use batch::run_generation;
use references::collect_references;
use setup::setup_generator;

/// Arguments for the `generate` command.
#[derive(Args, Debug, Default)]
pub struct GenerateArgs {
    /// Image URLs, data URIs or file paths
    pub references: Vec<String>,

    /// Text file with one image reference per line
    #[arg(short, long)]
    pub input_file: Option<PathBuf>,

    /// Vision provider (defaults to `general.provider` from config)
    #[arg(short, long, value_enum)]
    pub provider: Option<Provider>,

    /// Model name (provider-specific)
    #[arg(short, long)]
    pub model: Option<String>,

    /// API key for the selected provider (overrides config and environment)
    #[arg(long, env = "LUMEN_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format (defaults to `output.format` from config)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Minimum milliseconds between two provider requests
    #[arg(long)]
    pub min_spacing_ms: Option<u64>,

    /// Retries per image after a rate-limit response
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Skip images that already have a completed prompt in the output file
    #[arg(long)]
    pub skip_existing: bool,
}

/// Generation context assembled by setup_generator().
pub(crate) struct GenerateContext {
    pub orchestrator: Arc<Orchestrator>,
    pub provider: Arc<dyn LlmProvider>,
    pub output_format: CoreOutputFormat,
    pub pretty: bool,
}

/// Execute the generate command.
pub async fn execute(args: GenerateArgs) -> anyhow::Result<()> {
    let references = collect_references(&args.references, args.input_file.as_deref())?;
    if references.is_empty() {
        anyhow::bail!(
            "No image references given.\n\n  Hint: Pass URLs or paths as arguments, or use --input-file."
        );
    }
    tracing::info!("Found {} image reference(s)", references.len());

    let output = args
        .output
        .as_ref()
        .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned()));

    let ctx = setup_generator(&args)?;
    run_generation(ctx, &references, output.as_deref(), args.skip_existing).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_args_default_option_fields_are_none() {
        let args = GenerateArgs::default();
        assert!(args.references.is_empty());
        assert!(args.provider.is_none());
        assert!(args.model.is_none());
        assert!(args.format.is_none());
        assert!(!args.skip_existing);
    }

    #[tokio::test]
    async fn execute_without_references_fails() {
        let err = execute(GenerateArgs::default()).await.unwrap_err();
        assert!(err.to_string().contains("No image references"));
    }
}
