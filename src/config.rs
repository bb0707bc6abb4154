//! Settings for a context budget session
//!
//! Sources, later ones win: `.env`, `config/default.{toml,yaml,json}`,
//! then `CONTEXT_BUDGET__<SECTION>__<KEY>` environment variables.

use crate::context::compressor::CompressorConfig;
use crate::context::managed_tokenizer::ResetPolicy;
use crate::context::model_limits::{ModelLimitRegistry, DEFAULT_CONTEXT_LIMIT};
use crate::context::safeguard::SafeguardConfig;
use crate::context::summarizer::GenerationConfig;
use crate::context::token_estimator::CountingConfig;
use crate::context::usage::UsageThresholds;
use crate::digest::pipeline::DigestConfig;
use crate::error::{ContextError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "CONTEXT_BUDGET";
const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Which estimator backs token counting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorBackend {
    #[default]
    Heuristic,
    Tiktoken,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimatorSettings {
    #[serde(default)]
    pub backend: EstimatorBackend,
    #[serde(default)]
    pub counting: CountingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Extra or overriding model limits
    #[serde(default)]
    pub overrides: HashMap<String, usize>,
    #[serde(default = "default_context_limit")]
    pub default_limit: usize,
}

fn default_context_limit() -> usize {
    DEFAULT_CONTEXT_LIMIT
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            default_limit: default_context_limit(),
        }
    }
}

impl ModelSettings {
    pub fn registry(&self) -> ModelLimitRegistry {
        let mut registry = ModelLimitRegistry::with_overrides(&self.overrides);
        registry.set_default_limit(self.default_limit);
        registry
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory for day-file digest logs; in-memory when unset
    #[serde(default)]
    pub digest_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// All settings for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub estimator: EstimatorSettings,
    #[serde(default)]
    pub models: ModelSettings,
    #[serde(default)]
    pub usage: UsageThresholds,
    #[serde(default)]
    pub compression: CompressorConfig,
    #[serde(default)]
    pub safeguard: SafeguardConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub tokenizer: ResetPolicy,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load from `.env`, the optional default config file and the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from one explicit file, without environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref().to_path_buf()))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let fractions = [
            ("usage.warning", self.usage.warning),
            ("usage.critical", self.usage.critical),
            (
                "compression.auto_compress_threshold",
                self.compression.auto_compress_threshold,
            ),
            ("compression.target_usage", self.compression.target_usage),
            ("safeguard.emergency_threshold", self.safeguard.emergency_threshold),
            (
                "safeguard.single_message_limit_fraction",
                self.safeguard.single_message_limit_fraction,
            ),
            ("safeguard.emergency_target_ratio", self.safeguard.emergency_target_ratio),
        ];
        for (name, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ContextError::Configuration(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.usage.warning >= self.usage.critical {
            return Err(ContextError::Configuration(
                "usage.warning must be below usage.critical".to_string(),
            ));
        }
        if self.compression.target_usage >= self.compression.auto_compress_threshold {
            return Err(ContextError::Configuration(
                "compression.target_usage must be below compression.auto_compress_threshold"
                    .to_string(),
            ));
        }
        if self.safeguard.max_tokens == 0 {
            return Err(ContextError::Configuration(
                "safeguard.max_tokens must be positive".to_string(),
            ));
        }
        if self.digest.chunk_size == 0 {
            return Err(ContextError::Configuration(
                "digest.chunk_size must be positive".to_string(),
            ));
        }
        if self.tokenizer.max_calls == 0 {
            return Err(ContextError::Configuration(
                "tokenizer.max_calls must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.compression.auto_compress_threshold, 0.85);
        assert_eq!(settings.safeguard.emergency_threshold, 0.95);
        assert_eq!(settings.digest.trigger_turns, 20);
        assert_eq!(settings.tokenizer.max_calls, 25);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut settings = Settings::default();
        settings.usage.warning = 0.95;
        assert!(matches!(settings.validate(), Err(ContextError::Configuration(_))));
    }

    #[test]
    fn test_out_of_range_fraction_rejected() {
        let mut settings = Settings::default();
        settings.safeguard.emergency_threshold = 1.5;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("safeguard.emergency_threshold"));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut settings = Settings::default();
        settings.digest.chunk_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
[estimator]
backend = "heuristic"

[models.overrides]
"in-house-7b" = 4096

[safeguard]
max_tokens = 50000

[digest]
chunk_size = 8
chunk_max_tokens = 400
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.safeguard.max_tokens, 50_000);
        assert_eq!(settings.safeguard.tool_output_limit, 500);
        assert_eq!(settings.digest.chunk_size, 8);
        assert_eq!(settings.digest.chunk_max_tokens, Some(400));
        assert_eq!(settings.models.registry().get_limit("in-house-7b"), 4096);
    }
}
