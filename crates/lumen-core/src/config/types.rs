//! Sub-configuration structs with their defaults.

use crate::llm::provider::ProviderKind;
use serde::{Deserialize, Serialize};

/// General settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Provider used when `--provider` is not given
    pub provider: ProviderKind,
}

/// Google Gemini settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API key (supports ${ENV_VAR} syntax)
    pub api_key: String,

    /// Model name
    pub model: String,

    /// API base URL, without the `/models/...` suffix
    pub endpoint: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: "${GEMINI_API_KEY}".to_string(),
            model: "gemini-2.0-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

/// OpenRouter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    /// API key (supports ${ENV_VAR} syntax)
    pub api_key: String,

    /// Model name; ids ending in `:free` use the free-tier spacing
    pub model: String,

    /// API base URL, without `/chat/completions`
    pub endpoint: String,

    /// Minimum spacing between requests to `:free` models
    pub free_tier_min_spacing_ms: u64,

    /// Sent as `HTTP-Referer` for OpenRouter app attribution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,

    /// Sent as `X-Title` for OpenRouter app attribution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: "${OPENROUTER_API_KEY}".to_string(),
            model: "meta-llama/llama-3.2-11b-vision-instruct:free".to_string(),
            endpoint: "https://openrouter.ai/api/v1".to_string(),
            free_tier_min_spacing_ms: 6000,
            site_url: None,
            app_name: Some("lumen".to_string()),
        }
    }
}

/// Instruction and sampling settings sent with every image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Instruction text sent alongside the image
    pub instruction: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            instruction: "Describe this image as a single detailed prompt for a text-to-image \
                          model. Cover the subject, setting, composition, lighting, colors and \
                          artistic style. Reply with the prompt only."
                .to_string(),
            max_tokens: 300,
            temperature: 0.4,
        }
    }
}

/// Resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Timeout for a single provider call in milliseconds
    pub request_timeout_ms: u64,

    /// Largest image that will be fetched and sent, in megabytes
    pub max_image_size_mb: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 60_000,
            max_image_size_mb: 20,
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default output format ("json" or "jsonl")
    pub format: String,

    /// Pretty-print JSON output
    pub pretty: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
            pretty: false,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
