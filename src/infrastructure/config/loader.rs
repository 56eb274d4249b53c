use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use std::path::Path;
use thiserror::Error;

use crate::domain::models::EngineConfig;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid required_clean_passes: {0}. Must be at least 1")]
    InvalidRequiredPasses(u32),

    #[error("Invalid max_iterations: {max}. Must be at least required_clean_passes ({required})")]
    InvalidMaxIterations { max: u32, required: u32 },

    #[error("Invalid max_concurrent: {0}. Must be between 1 and 64")]
    InvalidMaxConcurrent(usize),

    #[error("Invalid fan_out: {0}. Must be at least 1")]
    InvalidFanOut(usize),

    #[error("Invalid checkpoint_threshold: {0}. Must be in (0.0, 1.0]")]
    InvalidCheckpointThreshold(f64),

    #[error("Invalid budget_cap: {0}. Must be positive")]
    InvalidBudgetCap(u64),

    #[error("Invalid loop_breaker_threshold: {0}. Must be at least 1")]
    InvalidLoopBreakerThreshold(u32),

    #[error("Invalid task_timeout_secs: {0}. Must be positive")]
    InvalidTaskTimeout(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .convergent/config.yaml (project config)
    /// 3. .convergent/local.yaml (local overrides, optional)
    /// 4. Environment variables (CONVERGENT_* prefix, `__` separates nested keys)
    pub fn load() -> Result<EngineConfig> {
        Self::load_from_dir(".convergent")
    }

    /// Same precedence as [`ConfigLoader::load`], rooted at `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<EngineConfig> {
        let dir = dir.as_ref();
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("CONVERGENT_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
        if config.required_clean_passes == 0 {
            return Err(ConfigError::InvalidRequiredPasses(config.required_clean_passes));
        }

        if config.max_iterations < config.required_clean_passes {
            return Err(ConfigError::InvalidMaxIterations {
                max: config.max_iterations,
                required: config.required_clean_passes,
            });
        }

        if config.max_concurrent == 0 || config.max_concurrent > 64 {
            return Err(ConfigError::InvalidMaxConcurrent(config.max_concurrent));
        }

        if config.fan_out == 0 {
            return Err(ConfigError::InvalidFanOut(config.fan_out));
        }

        if !(config.checkpoint_threshold > 0.0 && config.checkpoint_threshold <= 1.0) {
            return Err(ConfigError::InvalidCheckpointThreshold(config.checkpoint_threshold));
        }

        if config.budget_cap == 0 {
            return Err(ConfigError::InvalidBudgetCap(config.budget_cap));
        }

        if config.loop_breaker_threshold == 0 {
            return Err(ConfigError::InvalidLoopBreakerThreshold(config.loop_breaker_threshold));
        }

        if config.task_timeout_secs == 0 {
            return Err(ConfigError::InvalidTaskTimeout(config.task_timeout_secs));
        }

        if config.initial_backoff_ms > config.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(config.initial_backoff_ms, config.max_backoff_ms));
        }

        // Validate logging config
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        // Validate database config
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        // The mode must yield a usable pool
        config
            .mode
            .default_pool()
            .map_err(|e| ConfigError::ValidationFailed(format!("mode '{}': {e}", config.mode.name())))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ModePreset, SelectionWeighting};

    fn from_yaml(yaml: &str) -> EngineConfig {
        Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .expect("YAML should parse")
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.database.path, ".convergent/sessions.db");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
required_clean_passes: 2
max_iterations: 12
fan_out: 2
selection_weighting: issue_yield
mode:
  preset: quick
  include_style: false
logging:
  level: debug
  format: pretty
";
        let config = from_yaml(yaml);

        assert_eq!(config.required_clean_passes, 2);
        assert_eq!(config.max_iterations, 12);
        assert_eq!(config.fan_out, 2);
        assert_eq!(config.selection_weighting, SelectionWeighting::IssueYield);
        assert!(matches!(config.mode, ModePreset::Quick(ref q) if !q.include_style));
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.max_concurrent, 4);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_custom_mode_with_cycle_rejected() {
        let yaml = r"
mode:
  preset: custom
  methodologies:
    - name: a
      category: x
      priority: true
      dependencies: [b]
    - name: b
      category: x
      dependencies: [a]
";
        let config = from_yaml(yaml);
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ValidationFailed(msg)) if msg.contains("custom")
        ));
    }

    #[test]
    fn test_validate_zero_required_passes() {
        let config = EngineConfig {
            required_clean_passes: 0,
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRequiredPasses(0))
        ));
    }

    #[test]
    fn test_validate_iterations_below_required() {
        let config = EngineConfig {
            required_clean_passes: 5,
            max_iterations: 4,
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxIterations { max: 4, required: 5 })
        ));
    }

    #[test]
    fn test_validate_threshold_bounds() {
        for threshold in [0.0, -0.1, 1.5] {
            let config = EngineConfig {
                checkpoint_threshold: threshold,
                ..Default::default()
            };
            assert!(matches!(
                ConfigLoader::validate(&config),
                Err(ConfigError::InvalidCheckpointThreshold(_))
            ));
        }

        let config = EngineConfig {
            checkpoint_threshold: 1.0,
            ..Default::default()
        };
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency_and_fan_out() {
        let config = EngineConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxConcurrent(0))));

        let config = EngineConfig {
            fan_out: 0,
            ..Default::default()
        };
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidFanOut(0))));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = EngineConfig::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let config = EngineConfig {
            initial_backoff_ms: 30_000,
            max_backoff_ms: 10_000,
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(30_000, 10_000))
        ));
    }

    #[test]
    fn test_validate_database() {
        let mut config = EngineConfig::default();
        config.database.path = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyDatabasePath)));

        let mut config = EngineConfig::default();
        config.database.max_connections = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConnections(0))
        ));
    }
}
