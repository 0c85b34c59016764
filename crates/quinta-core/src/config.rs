//! Quinta Configuration Management
//!
//! Handles configuration from environment variables and TOML config
//! files, with defaults suitable for decoding normalized model scores.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::NonzeroSpanPolicy;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Soft joint decoder settings
    pub decoder: DecoderConfig,

    /// Batch processing settings
    pub batch: BatchConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.decoder.validate()
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Decoder
        if let Some(threshold) = parse_env("QUINTA_SEPARATE_THRESHOLD")? {
            self.decoder.separate_threshold = threshold;
        }
        if let Some(max_entities) = parse_env("QUINTA_MAX_ENTITIES")? {
            self.decoder.max_entities = max_entities;
        }
        if let Ok(policy) = std::env::var("QUINTA_SPAN_POLICY") {
            self.decoder.span_policy = policy.parse()?;
        }

        // Batch
        if let Some(workers) = parse_env("QUINTA_WORKERS")? {
            self.batch.workers = workers;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Soft joint decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Averaged row/column distance above which adjacent tokens split
    pub separate_threshold: f32,

    /// Maximum accepted entity spans per sentence
    pub max_entities: usize,

    /// How diagonal label runs are split into spans
    pub span_policy: NonzeroSpanPolicy,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            separate_threshold: 1.4,
            max_entities: 64,
            span_policy: NonzeroSpanPolicy::default(),
        }
    }
}

impl DecoderConfig {
    /// Reject settings the decoder cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.separate_threshold.is_finite() || self.separate_threshold < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "decoder.separate_threshold".to_string(),
                value: self.separate_threshold.to_string(),
            });
        }
        if self.max_entities == 0 {
            return Err(ConfigError::InvalidValue {
                key: "decoder.max_entities".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.separate_threshold = threshold;
        self
    }

    pub fn with_max_entities(mut self, max_entities: usize) -> Self {
        self.max_entities = max_entities;
        self
    }
}

/// Batch processing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads; 0 means one per available core
    pub workers: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!((config.decoder.separate_threshold - 1.4).abs() < f32::EPSILON);
        assert_eq!(config.decoder.max_entities, 64);
        assert_eq!(config.batch.workers, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_decoder_validation() {
        assert!(DecoderConfig::default()
            .with_threshold(f32::NAN)
            .validate()
            .is_err());
        assert!(DecoderConfig::default()
            .with_threshold(-0.1)
            .validate()
            .is_err());
        assert!(DecoderConfig::default()
            .with_max_entities(0)
            .validate()
            .is_err());
        assert!(DecoderConfig::default().with_threshold(0.0).validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [decoder]
            separate_threshold = 0.75
            span_policy = "merge_nonzero"

            [batch]
            workers = 4
            "#,
        )
        .unwrap();

        assert!((config.decoder.separate_threshold - 0.75).abs() < f32::EPSILON);
        assert_eq!(config.decoder.max_entities, 64);
        assert_eq!(config.decoder.span_policy, NonzeroSpanPolicy::MergeNonzero);
        assert_eq!(config.batch.workers, 4);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::from_file("/nonexistent/quinta.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
