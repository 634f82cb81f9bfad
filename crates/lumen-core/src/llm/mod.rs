//! Outbound request governor for vision LLM providers.
//!
//! Provides a provider abstraction over the Gemini and OpenRouter APIs, the
//! rate-limited queue and retry executor that guard them, and the
//! orchestrator that drives a batch of images through all three.

pub(crate) mod cleanup;
pub(crate) mod gemini;
pub(crate) mod openrouter;
pub mod orchestrator;
pub mod policy;
pub mod provider;
pub mod queue;
pub mod retry;

pub use orchestrator::{BatchReport, BatchRequest, BatchUpdate, Orchestrator};
pub use policy::RateLimitPolicy;
pub use provider::{ImageInput, LlmProvider, LlmProviderFactory, LlmRequest, LlmResponse, ProviderKind};
pub use queue::RateLimitedQueue;
