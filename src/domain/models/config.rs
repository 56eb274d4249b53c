use serde::{Deserialize, Serialize};

use super::methodology::{Methodology, MethodologyPool, Tier};
use crate::domain::errors::EngineResult;

/// Main configuration structure for the convergence engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Consecutive clean passes needed to declare convergence
    #[serde(default = "default_required_clean_passes")]
    pub required_clean_passes: u32,

    /// Upper bound on methodology passes per session
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Worker pool size per wave
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Methodologies selected per step
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,

    /// Delay policy between retries of a failed task
    #[serde(default)]
    pub rate_limit_strategy: RateLimitStrategy,

    /// Retries after the first attempt before a task is a synthetic failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Retry delay ceiling in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Per-attempt executor timeout in seconds
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Fraction of `budget_cap` at which a checkpoint is written
    #[serde(default = "default_checkpoint_threshold")]
    pub checkpoint_threshold: f64,

    /// Analysis units available per budget segment
    #[serde(default = "default_budget_cap")]
    pub budget_cap: u64,

    /// Suspend instead of continuing after a threshold checkpoint
    #[serde(default)]
    pub suspend_on_checkpoint: bool,

    /// Consecutive failed fix attempts before a pivot is required
    #[serde(default = "default_loop_breaker_threshold")]
    pub loop_breaker_threshold: u32,

    /// Pivots allowed per issue before it is abandoned
    #[serde(default = "default_max_pivots")]
    pub max_pivots: u32,

    /// How candidates are drawn from the eligible set
    #[serde(default)]
    pub selection_weighting: SelectionWeighting,

    /// Whether pool-exhaustion resets also forget priority coverage
    #[serde(default)]
    pub priority_coverage: PriorityCoverageScope,

    /// Seed for methodology selection; random when absent
    #[serde(default)]
    pub rng_seed: Option<u64>,

    /// Mode preset supplying the methodology pool
    #[serde(default)]
    pub mode: ModePreset,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Persistence configuration
    #[serde(default)]
    pub database: DatabaseConfig,
}

const fn default_required_clean_passes() -> u32 {
    3
}

const fn default_max_iterations() -> u32 {
    30
}

const fn default_max_concurrent() -> usize {
    4
}

const fn default_fan_out() -> usize {
    1
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    5_000
}

const fn default_task_timeout_secs() -> u64 {
    300
}

const fn default_checkpoint_threshold() -> f64 {
    0.75
}

const fn default_budget_cap() -> u64 {
    10_000
}

const fn default_loop_breaker_threshold() -> u32 {
    3
}

const fn default_max_pivots() -> u32 {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            required_clean_passes: default_required_clean_passes(),
            max_iterations: default_max_iterations(),
            max_concurrent: default_max_concurrent(),
            fan_out: default_fan_out(),
            rate_limit_strategy: RateLimitStrategy::default(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            checkpoint_threshold: default_checkpoint_threshold(),
            budget_cap: default_budget_cap(),
            suspend_on_checkpoint: false,
            loop_breaker_threshold: default_loop_breaker_threshold(),
            max_pivots: default_max_pivots(),
            selection_weighting: SelectionWeighting::default(),
            priority_coverage: PriorityCoverageScope::default(),
            rng_seed: None,
            mode: ModePreset::default(),
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Delay policy between task retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Constant `initial_backoff_ms` between attempts
    Fixed,
    /// Exponential growth capped at `max_backoff_ms`
    #[default]
    Backoff,
    /// Exponential, scaled by the recently observed transient-failure ratio
    Adaptive,
}

/// How the pool manager draws from eligible methodologies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionWeighting {
    #[default]
    Uniform,
    /// Weight by `1 + issues found` so productive methodologies run more often
    IssueYield,
}

/// Lifetime of the "priority seen in this streak" flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityCoverageScope {
    /// Survives pool-exhaustion resets; cleared only when issues reset the streak
    #[default]
    Independent,
    /// Cleared on pool-exhaustion resets as well
    ResetWithPool,
}

/// Mode presets. Each built-in variant carries its own settings and yields a
/// default methodology pool; `Custom` takes the pool verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "preset", rename_all = "snake_case")]
pub enum ModePreset {
    Quick(QuickMode),
    Standard(StandardMode),
    Thorough(ThoroughMode),
    Custom(CustomMode),
}

impl Default for ModePreset {
    fn default() -> Self {
        Self::Standard(StandardMode::default())
    }
}

/// Fast-tier checks only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickMode {
    #[serde(default = "default_true")]
    pub include_style: bool,
}

impl Default for QuickMode {
    fn default() -> Self {
        Self { include_style: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardMode {
    #[serde(default = "default_true")]
    pub include_performance: bool,
    #[serde(default = "default_true")]
    pub clear_context_between_passes: bool,
}

impl Default for StandardMode {
    fn default() -> Self {
        Self {
            include_performance: true,
            clear_context_between_passes: true,
        }
    }
}

/// Every check, high-fidelity where it matters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThoroughMode {
    /// Run every methodology at the high-fidelity tier
    #[serde(default)]
    pub high_fidelity_all: bool,
    #[serde(default = "default_true")]
    pub include_documentation: bool,
}

impl Default for ThoroughMode {
    fn default() -> Self {
        Self {
            high_fidelity_all: false,
            include_documentation: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMode {
    #[serde(default)]
    pub methodologies: Vec<Methodology>,
    #[serde(default = "default_true")]
    pub clear_context_between_passes: bool,
}

const fn default_true() -> bool {
    true
}

impl ModePreset {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Quick(_) => "quick",
            Self::Standard(_) => "standard",
            Self::Thorough(_) => "thorough",
            Self::Custom(_) => "custom",
        }
    }

    /// Whether pass scratch context is dropped between passes.
    pub fn clears_context(&self) -> bool {
        match self {
            Self::Quick(_) | Self::Thorough(_) => true,
            Self::Standard(mode) => mode.clear_context_between_passes,
            Self::Custom(mode) => mode.clear_context_between_passes,
        }
    }

    /// The preset's methodologies, before validation.
    pub fn methodologies(&self) -> Vec<Methodology> {
        match self {
            Self::Quick(mode) => {
                let mut list = vec![
                    Methodology::new("correctness", "correctness").with_priority(),
                    Methodology::new("security", "security").with_priority(),
                    Methodology::new("consistency", "consistency"),
                ];
                if mode.include_style {
                    list.push(Methodology::new("style", "style"));
                }
                list
            }
            Self::Standard(mode) => {
                let mut list = standard_methodologies();
                if mode.include_performance {
                    list.push(Methodology::new("performance", "performance").with_tier(Tier::HighFidelity));
                }
                list
            }
            Self::Thorough(mode) => {
                let mut list = standard_methodologies();
                list.push(Methodology::new("performance", "performance").with_tier(Tier::HighFidelity));
                list.push(
                    Methodology::new("adversarial", "security")
                        .with_tier(Tier::HighFidelity)
                        .depends_on("security"),
                );
                if mode.include_documentation {
                    list.push(Methodology::new("documentation", "documentation"));
                }
                if mode.high_fidelity_all {
                    for m in &mut list {
                        m.tier = Tier::HighFidelity;
                    }
                }
                list
            }
            Self::Custom(mode) => mode.methodologies.clone(),
        }
    }

    /// The preset's validated methodology pool.
    pub fn default_pool(&self) -> EngineResult<MethodologyPool> {
        MethodologyPool::new(self.methodologies())
    }

    pub fn tier_for(&self, name: &str) -> Option<Tier> {
        self.methodologies()
            .into_iter()
            .find(|m| m.name == name)
            .map(|m| m.tier)
    }
}

fn standard_methodologies() -> Vec<Methodology> {
    vec![
        Methodology::new("correctness", "correctness").with_priority(),
        Methodology::new("security", "security")
            .with_priority()
            .with_tier(Tier::HighFidelity),
        Methodology::new("edge_cases", "correctness").depends_on("correctness"),
        Methodology::new("consistency", "consistency"),
        Methodology::new("style", "style"),
    ]
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rotated log files; stdout only when absent
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".convergent/sessions.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.required_clean_passes, 3);
        assert_eq!(config.max_iterations, 30);
        assert_eq!(config.max_concurrent, 4);
        assert!((config.checkpoint_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.rate_limit_strategy, RateLimitStrategy::Backoff);
        assert_eq!(config.selection_weighting, SelectionWeighting::Uniform);
        assert_eq!(config.mode.name(), "standard");
    }

    #[test]
    fn test_presets_produce_valid_pools() {
        let presets = [
            ModePreset::Quick(QuickMode::default()),
            ModePreset::Standard(StandardMode::default()),
            ModePreset::Thorough(ThoroughMode::default()),
        ];
        for preset in presets {
            let pool = preset.default_pool().unwrap();
            assert!(pool.has_priority(), "{} has no priority methodology", preset.name());
        }
    }

    #[test]
    fn test_thorough_high_fidelity_all() {
        let preset = ModePreset::Thorough(ThoroughMode {
            high_fidelity_all: true,
            include_documentation: false,
        });
        assert!(preset.methodologies().iter().all(|m| m.tier == Tier::HighFidelity));
        assert_eq!(preset.tier_for("style"), Some(Tier::HighFidelity));
        assert_eq!(preset.tier_for("documentation"), None);
    }

    #[test]
    fn test_custom_mode_serde() {
        let yaml = r#"{"preset":"custom","methodologies":[{"name":"links","category":"content","priority":true}],"clear_context_between_passes":false}"#;
        let preset: ModePreset = serde_json::from_str(yaml).unwrap();
        assert!(!preset.clears_context());
        let pool = preset.default_pool().unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.get("links").unwrap().priority);
    }

    #[test]
    fn test_empty_custom_pool_is_rejected() {
        let preset = ModePreset::Custom(CustomMode::default());
        assert!(preset.default_pool().is_err());
    }
}
