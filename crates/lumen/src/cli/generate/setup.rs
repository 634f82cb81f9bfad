//! Generator setup: config overrides, provider and orchestrator creation.

use lumen_core::{
    Config, HttpImageFetcher, LlmProvider, LlmProviderFactory, Orchestrator,
    OutputFormat as CoreOutputFormat, ProviderKind, RateLimitPolicy,
};
use std::sync::Arc;
use std::time::Duration;

use super::{GenerateArgs, GenerateContext};

/// Load config, apply CLI overrides and assemble everything needed to run a batch.
pub fn setup_generator(args: &GenerateArgs) -> anyhow::Result<GenerateContext> {
    let config = Config::load()?;

    let kind: ProviderKind = args.provider.map(Into::into).unwrap_or(config.general.provider);
    let model = LlmProviderFactory::resolve_model(kind, &config, args.model.as_deref());

    let policy = build_policy(kind, &model, &config, args)?;
    tracing::debug!(
        "Rate limit for {kind}/{model}: {}ms spacing, {} retries",
        policy.min_spacing_ms,
        policy.max_retries
    );

    let provider: Arc<dyn LlmProvider> = Arc::from(
        LlmProviderFactory::create(kind, &config, args.api_key.as_deref(), Some(&model)).map_err(
            |e| anyhow::anyhow!("{e}\n\n  Hint: Run `lumen config path` to locate the config file."),
        )?,
    );

    let fetcher = HttpImageFetcher::new(
        config.limits.max_image_size_mb,
        Duration::from_millis(config.limits.request_timeout_ms),
    );
    let orchestrator =
        Orchestrator::new(policy, Arc::new(fetcher)).with_prompt(config.prompt.clone());

    let output_format = match args.format {
        Some(format) => format.into(),
        None => CoreOutputFormat::parse(&config.output.format).unwrap_or(CoreOutputFormat::Json),
    };

    Ok(GenerateContext {
        orchestrator: Arc::new(orchestrator),
        provider,
        output_format,
        pretty: config.output.pretty,
    })
}

/// Provider/model policy from config, with `--min-spacing-ms` / `--max-retries` applied.
fn build_policy(
    kind: ProviderKind,
    model: &str,
    config: &Config,
    args: &GenerateArgs,
) -> anyhow::Result<RateLimitPolicy> {
    let mut policy = LlmProviderFactory::policy_for(kind, model, config);
    if let Some(spacing) = args.min_spacing_ms {
        policy.min_spacing_ms = spacing;
    }
    if let Some(retries) = args.max_retries {
        policy.max_retries = retries;
    }
    policy.validate()?;
    Ok(policy)
}
