//! LLM provider trait and request/response types.
//!
//! Defines the interface both vision providers implement, plus the factory
//! that creates the right provider (and its rate-limit policy) from config.

use crate::config::{Config, PromptConfig};
use crate::error::{ConfigError, GenerateError};
use crate::llm::policy::RateLimitPolicy;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Base64-encoded image ready to send to an LLM API.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInput {
    /// Base64-encoded image bytes
    pub data: String,
    /// MIME type (e.g., "image/jpeg", "image/png")
    pub media_type: String,
}

impl ImageInput {
    /// Encode raw bytes with an already-detected media type.
    pub fn from_bytes(bytes: &[u8], media_type: &str) -> Self {
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            media_type: media_type.to_string(),
        }
    }

    /// Return a data URL suitable for OpenAI-style APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// A request to generate a prompt from an image.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// The image to describe
    pub image: ImageInput,
    /// Instruction sent alongside the image
    pub prompt: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl LlmRequest {
    /// Build a prompt-generation request using the configured instruction.
    pub fn describe_image(image: ImageInput, prompt: &PromptConfig) -> Self {
        Self {
            image,
            prompt: prompt.instruction.clone(),
            max_tokens: prompt.max_tokens,
            temperature: prompt.temperature,
        }
    }
}

/// The response from a provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// Generated prompt text
    pub text: String,
    /// Model identifier reported by the provider
    pub model: String,
    /// Number of tokens used (input + output), if reported
    pub tokens_used: Option<u32>,
    /// Round-trip latency in milliseconds
    pub latency_ms: u64,
}

/// Trait that both vision providers implement.
///
/// Uses `async_trait` because native async fn in trait is not object-safe
/// (we need `Arc<dyn LlmProvider>` shared across job tasks).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and output records (e.g., "gemini").
    fn name(&self) -> &str;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;

    /// Generate a prompt for the given request.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, GenerateError>;

    /// Per-request timeout for this provider.
    fn timeout(&self) -> Duration;
}

/// Which remote API to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini `generateContent`
    #[default]
    Gemini,
    /// OpenRouter chat completions (OpenAI-compatible)
    OpenRouter,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::OpenRouter => write!(f, "openrouter"),
        }
    }
}

/// Resolve `${ENV_VAR}` references in config strings.
pub fn resolve_env_var(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok().filter(|v| !v.is_empty())
    } else if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Pull the human-readable message out of a provider error body.
///
/// Understands `{"error": {"message": .., "status": ..}}`, `{"error": ".."}`
/// and `{"message": ".."}`; anything else is returned trimmed (and truncated).
pub fn extract_error_message(body: &str) -> String {
    const MAX_RAW: usize = 500;

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let error = value.get("error").unwrap_or(&value);
        if let Some(message) = error.as_str() {
            return message.to_string();
        }
        if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
            return match error.get("status").and_then(|s| s.as_str()) {
                Some(status) => format!("{message} ({status})"),
                None => message.to_string(),
            };
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    match trimmed.char_indices().nth(MAX_RAW) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Factory that creates the appropriate provider from CLI flags and config.
pub struct LlmProviderFactory;

impl LlmProviderFactory {
    /// Create a provider.
    ///
    /// # Arguments
    /// * `kind` - Which remote API to call
    /// * `config` - The full config (provider sections and limits)
    /// * `api_key_override` - Credential that takes precedence over the config value
    /// * `model_override` - Model name that overrides the config default
    pub fn create(
        kind: ProviderKind,
        config: &Config,
        api_key_override: Option<&str>,
        model_override: Option<&str>,
    ) -> Result<Box<dyn LlmProvider>, ConfigError> {
        let timeout = Duration::from_millis(config.limits.request_timeout_ms);
        match kind {
            ProviderKind::Gemini => {
                let cfg = &config.gemini;
                let api_key = Self::credential(api_key_override, &cfg.api_key, "GEMINI_API_KEY")?;
                let model = model_override.unwrap_or(&cfg.model);
                Ok(Box::new(super::gemini::GeminiProvider::new(
                    &cfg.endpoint,
                    &api_key,
                    model,
                    timeout,
                )))
            }
            ProviderKind::OpenRouter => {
                let cfg = &config.openrouter;
                let api_key =
                    Self::credential(api_key_override, &cfg.api_key, "OPENROUTER_API_KEY")?;
                let model = model_override.unwrap_or(&cfg.model);
                Ok(Box::new(
                    super::openrouter::OpenRouterProvider::new(
                        &cfg.endpoint,
                        &api_key,
                        model,
                        timeout,
                    )
                    .with_attribution(cfg.site_url.as_deref(), cfg.app_name.as_deref()),
                ))
            }
        }
    }

    /// Rate-limit policy for a provider/model pair.
    ///
    /// OpenRouter free-tier models (ids ending in `:free`) get at least the
    /// configured free-tier spacing.
    pub fn policy_for(kind: ProviderKind, model: &str, config: &Config) -> RateLimitPolicy {
        let mut policy = config.rate_limit.clone();
        if kind == ProviderKind::OpenRouter && model.ends_with(":free") {
            policy.min_spacing_ms = policy
                .min_spacing_ms
                .max(config.openrouter.free_tier_min_spacing_ms);
        }
        policy
    }

    /// Model that `create` would use for `kind`.
    pub fn resolve_model(kind: ProviderKind, config: &Config, model_override: Option<&str>) -> String {
        let default = match kind {
            ProviderKind::Gemini => &config.gemini.model,
            ProviderKind::OpenRouter => &config.openrouter.model,
        };
        model_override.unwrap_or(default).to_string()
    }

    fn credential(
        api_key_override: Option<&str>,
        configured: &str,
        env_var: &str,
    ) -> Result<String, ConfigError> {
        api_key_override
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .or_else(|| resolve_env_var(configured))
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "API key not set. Set {env_var} or pass --api-key."
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_input_from_bytes() {
        let input = ImageInput::from_bytes(&[0xFF, 0xD8, 0xFF], "image/jpeg");
        assert_eq!(input.media_type, "image/jpeg");
        assert_eq!(input.data, "/9j/");
    }

    #[test]
    fn test_image_input_data_url() {
        let input = ImageInput::from_bytes(&[1, 2, 3], "image/png");
        assert_eq!(input.data_url(), "data:image/png;base64,AQID");
    }

    #[test]
    fn test_describe_image_uses_configured_instruction() {
        let prompt = PromptConfig {
            instruction: "Write a prompt.".to_string(),
            max_tokens: 128,
            temperature: 0.1,
        };
        let request = LlmRequest::describe_image(ImageInput::from_bytes(&[1], "image/png"), &prompt);
        assert_eq!(request.prompt, "Write a prompt.");
        assert_eq!(request.max_tokens, 128);
    }

    #[test]
    fn test_resolve_env_var() {
        // Non-env-var strings pass through
        assert_eq!(resolve_env_var("plain-key"), Some("plain-key".to_string()));
        // Empty returns None
        assert_eq!(resolve_env_var(""), None);
        // Unset env var returns None
        assert_eq!(resolve_env_var("${DEFINITELY_NOT_SET_XYZ_123}"), None);
    }

    #[test]
    fn test_extract_error_message_nested() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(
            extract_error_message(body),
            "Quota exceeded (RESOURCE_EXHAUSTED)"
        );
        let body = r#"{"error":{"message":"No endpoints found","code":404}}"#;
        assert_eq!(extract_error_message(body), "No endpoints found");
    }

    #[test]
    fn test_extract_error_message_fallbacks() {
        assert_eq!(extract_error_message(r#"{"error":"bad key"}"#), "bad key");
        assert_eq!(extract_error_message(r#"{"message":"nope"}"#), "nope");
        assert_eq!(extract_error_message("  gateway timeout \n"), "gateway timeout");
        assert_eq!(extract_error_message(""), "empty response body");
        let long = "x".repeat(2000);
        assert!(extract_error_message(&long).chars().count() <= 501);
    }

    #[test]
    fn test_factory_override_key_and_model() {
        let config = Config::default();
        let provider = LlmProviderFactory::create(
            ProviderKind::Gemini,
            &config,
            Some("key-123"),
            Some("gemini-1.5-pro"),
        )
        .unwrap();
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.model(), "gemini-1.5-pro");

        let provider =
            LlmProviderFactory::create(ProviderKind::OpenRouter, &config, Some("k"), None).unwrap();
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(provider.model(), config.openrouter.model);
    }

    #[test]
    fn test_factory_missing_key() {
        let mut config = Config::default();
        config.gemini.api_key = "${DEFINITELY_NOT_SET_GEMINI_KEY_XYZ}".to_string();
        let err = LlmProviderFactory::create(ProviderKind::Gemini, &config, Some("  "), None)
            .err()
            .expect("missing key must fail");
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_policy_for_free_tier() {
        let config = Config::default();
        let free = LlmProviderFactory::policy_for(
            ProviderKind::OpenRouter,
            "meta-llama/llama-3.2-11b-vision-instruct:free",
            &config,
        );
        assert_eq!(free.min_spacing_ms, 6000);

        let paid = LlmProviderFactory::policy_for(ProviderKind::OpenRouter, "openai/gpt-4o", &config);
        assert_eq!(paid.min_spacing_ms, 2000);

        let gemini = LlmProviderFactory::policy_for(ProviderKind::Gemini, "x:free", &config);
        assert_eq!(gemini.min_spacing_ms, 2000);
    }

    #[test]
    fn test_provider_kind_serde() {
        let kind: ProviderKind = serde_json::from_str("\"openrouter\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenRouter);
        assert_eq!(ProviderKind::Gemini.to_string(), "gemini");
    }
}
