//! Lumen Core - image to text-to-image prompt generation.
//!
//! Lumen sends images to a multimodal LLM and collects a generated prompt for
//! each one. All provider traffic goes through a rate-limited FIFO queue and a
//! backoff executor, so large batches stay under provider quotas.
//!
//! # Architecture
//!
//! ```text
//! references → Orchestrator → RateLimitedQueue → retry → fetch + LlmProvider → JobRecord
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use lumen_core::{Config, HttpImageFetcher, LlmProviderFactory, Orchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> lumen_core::Result<()> {
//!     let config = Config::load()?;
//!     let kind = config.general.provider;
//!     let provider = LlmProviderFactory::create(kind, &config, None, None)?;
//!     let policy = LlmProviderFactory::policy_for(kind, provider.model(), &config);
//!     let fetcher = Arc::new(HttpImageFetcher::new(20, std::time::Duration::from_secs(30)));
//!
//!     let orchestrator = Orchestrator::new(policy, fetcher);
//!     let refs = vec!["https://example.com/cat.jpg".to_string()];
//!     let report = orchestrator.run_batch(&refs, provider.into(), |_| {}).await;
//!     println!("{:?}", report.jobs[0].result);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod llm;
pub mod output;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, GenerateError, LumenError, Result, TransitionError};
pub use fetch::{HttpImageFetcher, ImageFetcher};
pub use llm::{
    BatchReport, BatchRequest, BatchUpdate, LlmProvider, LlmProviderFactory, Orchestrator, ProviderKind,
    RateLimitPolicy,
};
pub use output::{OutputFormat, OutputWriter};
pub use types::{Job, JobEvent, JobRecord, JobState, ProgressSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
