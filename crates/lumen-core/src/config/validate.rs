//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()?;

        if self.openrouter.free_tier_min_spacing_ms == 0 {
            return Err(ConfigError::ValidationError(
                "openrouter.free_tier_min_spacing_ms must be > 0".into(),
            ));
        }
        if self.limits.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.request_timeout_ms must be > 0".into(),
            ));
        }
        if self.limits.max_image_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_image_size_mb must be > 0".into(),
            ));
        }
        if self.prompt.instruction.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "prompt.instruction must not be empty".into(),
            ));
        }
        if self.prompt.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "prompt.max_tokens must be > 0".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.prompt.temperature) {
            return Err(ConfigError::ValidationError(
                "prompt.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if !matches!(self.output.format.as_str(), "json" | "jsonl") {
            return Err(ConfigError::ValidationError(format!(
                "output.format must be \"json\" or \"jsonl\", got \"{}\"",
                self.output.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_spacing() {
        let mut config = Config::default();
        config.rate_limit.min_spacing_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_spacing_ms"));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff_bounds() {
        let mut config = Config::default();
        config.rate_limit.max_backoff_ms = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_backoff_ms"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.limits.request_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_ms"));
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let mut config = Config::default();
        config.prompt.temperature = 2.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("temperature"));

        config.prompt.temperature = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_output_format() {
        let mut config = Config::default();
        config.output.format = "csv".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("output.format"));
    }
}
