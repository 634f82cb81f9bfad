//! Error types for Lumen.
//!
//! Generation errors follow the provider error taxonomy: only
//! [`GenerateError::RateLimited`] is retried, everything else is surfaced to
//! the job as-is.

use thiserror::Error;

use crate::types::JobState;

/// Top-level error type for Lumen operations.
#[derive(Error, Debug)]
pub enum LumenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Prompt generation errors
    #[error("Generation error: {0}")]
    Generate(#[from] GenerateError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Failure of a single prompt generation attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// Provider signaled throttling or quota exhaustion.
    #[error("{provider} rate limit: {message}")]
    RateLimited {
        provider: String,
        message: String,
        status_code: Option<u16>,
    },

    /// Any other non-success provider response.
    #[error("{provider} error: {message}")]
    Provider {
        provider: String,
        message: String,
        status_code: Option<u16>,
    },

    /// Transport-level failure fetching the image or reaching the provider.
    #[error("Network error: {message}")]
    Network { message: String },

    /// The request was discarded from the queue before it was dispatched.
    #[error("Request cancelled: queue cleared")]
    QueueCleared,
}

impl GenerateError {
    /// Build an error from a provider response, classifying rate-limit signals.
    pub fn from_response(provider: &str, status_code: Option<u16>, message: String) -> Self {
        if crate::llm::retry::is_rate_limit_signal(status_code, &message) {
            Self::RateLimited {
                provider: provider.to_string(),
                message,
                status_code,
            }
        } else {
            Self::Provider {
                provider: provider.to_string(),
                message,
                status_code,
            }
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }
}

/// A job event that is not valid for the job's current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transition for {reference}: cannot apply {event} while {from:?}")]
pub struct TransitionError {
    pub reference: String,
    pub from: JobState,
    pub event: &'static str,
}

/// Convenience type alias for Lumen results.
pub type Result<T> = std::result::Result<T, LumenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_classifies_429() {
        let err = GenerateError::from_response("gemini", Some(429), "slow down".into());
        assert!(matches!(err, GenerateError::RateLimited { .. }));
    }

    #[test]
    fn test_from_response_classifies_message_without_status() {
        let err =
            GenerateError::from_response("openrouter", None, "Too Many Requests".to_string());
        assert!(matches!(err, GenerateError::RateLimited { .. }));
    }

    #[test]
    fn test_from_response_keeps_provider_error() {
        let err = GenerateError::from_response("gemini", Some(400), "bad image".into());
        assert_eq!(err.to_string(), "gemini error: bad image");
    }
}
