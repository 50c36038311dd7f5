//! TOML configuration.
//!
//! ```toml
//! [router]
//! default_strategy = "balanced"
//! stats_window_hours = 168
//! max_fallback_depth = 3
//!
//! [router.weights]
//! quality = 0.5
//! cost = 0.3
//! latency = 0.2
//!
//! [experiments]
//! significance_level = 0.05
//! min_sample_size = 30
//!
//! [tracker]
//! store = "sqlite"
//! database_path = "meridian.db"
//!
//! [[models]]
//! id = "claude-haiku-4.5"
//! provider = "anthropic"
//! capabilities = ["email_generation", "summarization"]
//! cost_per_1k_input = 0.001
//! cost_per_1k_output = 0.005
//! max_context_tokens = 200000
//! max_output_tokens = 64000
//! latency_class = "fast"
//! quality_prior = 78.0
//! ```

use crate::ab_testing::ExperimentSettings;
use crate::error::MeridianError;
use crate::registry::{ModelDescriptor, ModelRegistry};
use crate::routing::{RouterConfig, RoutingWeights};
use crate::types::{ReferenceRequest, RoutingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl From<MeridianError> for ConfigError {
    fn from(error: MeridianError) -> Self {
        match error {
            MeridianError::Validation(message) => Self::Validation(message),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// `[router]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// Strategy used when a request names none.
    pub default_strategy: String,
    /// Trailing window for routing stats.
    pub stats_window_hours: u64,
    pub max_fallback_depth: usize,
    pub min_history_samples: usize,
    /// Zero disables the stats cache.
    pub stats_cache_ttl_secs: u64,
    pub weights: RoutingWeights,
    pub reference_request: ReferenceRequest,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            default_strategy: RoutingStrategy::Balanced.as_str().to_string(),
            stats_window_hours: 168,
            max_fallback_depth: 3,
            min_history_samples: 1,
            stats_cache_ttl_secs: 30,
            weights: RoutingWeights::default(),
            reference_request: ReferenceRequest::default(),
        }
    }
}

impl RouterSection {
    /// Converts the section into router settings.
    ///
    /// # Errors
    /// Returns error if the strategy name or any limit is invalid.
    pub fn router_config(&self) -> Result<RouterConfig> {
        let hours = i64::try_from(self.stats_window_hours).map_err(|_| {
            ConfigError::Validation(format!("stats_window_hours too large: {}", self.stats_window_hours))
        })?;
        let config = RouterConfig {
            default_strategy: self.default_strategy.parse()?,
            weights: self.weights,
            stats_window: chrono::Duration::try_hours(hours).ok_or_else(|| {
                ConfigError::Validation(format!("stats_window_hours too large: {}", self.stats_window_hours))
            })?,
            max_fallback_depth: self.max_fallback_depth,
            min_history_samples: self.min_history_samples,
            stats_cache_ttl: Duration::from_secs(self.stats_cache_ttl_secs),
            reference_request: self.reference_request,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Where execution records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local; lost on exit.
    #[default]
    Memory,
    /// SQLite file at `database_path`.
    Sqlite,
}

/// `[tracker]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    pub store: StoreKind,
    /// Required when `store = "sqlite"`.
    pub database_path: Option<PathBuf>,
    /// Quality bar used by `cost-analysis` when the caller gives none.
    pub cost_analysis_min_quality: f64,
    /// Score raw outputs that arrive without a quality score.
    pub auto_score: bool,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self { store: StoreKind::Memory, database_path: None, cost_analysis_min_quality: 70.0, auto_score: true }
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeridianConfig {
    pub router: RouterSection,
    pub experiments: ExperimentSettings,
    pub tracker: TrackerSection,
    /// Bootstrap catalog. Empty means the built-in catalog.
    pub models: Vec<ModelDescriptor>,
}

impl MeridianConfig {
    /// Builds the registry described by `[[models]]`, or the built-in
    /// catalog when the file lists none.
    pub fn registry(&self) -> Result<ModelRegistry> {
        if self.models.is_empty() {
            return Ok(ModelRegistry::with_defaults());
        }
        Ok(ModelRegistry::from_descriptors(self.models.clone())?)
    }

    /// Descriptors to load: the configured list or the built-in catalog.
    pub fn descriptors(&self) -> Vec<ModelDescriptor> {
        if self.models.is_empty() { crate::registry::default_catalog() } else { self.models.clone() }
    }
}

/// Configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<MeridianConfig> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        info!(path = %path.display(), models = config.models.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    pub fn parse(content: &str) -> Result<MeridianConfig> {
        let config: MeridianConfig = toml::from_str(content)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validates configuration.
    ///
    /// # Errors
    /// Returns error if configuration is invalid.
    pub fn validate(config: &MeridianConfig) -> Result<()> {
        config.router.router_config()?;
        config.experiments.validate()?;

        if config.tracker.store == StoreKind::Sqlite && config.tracker.database_path.is_none() {
            return Err(ConfigError::Validation("tracker.store = \"sqlite\" requires tracker.database_path".to_string()));
        }
        if !(0.0..=100.0).contains(&config.tracker.cost_analysis_min_quality) {
            return Err(ConfigError::Validation(format!(
                "Invalid cost_analysis_min_quality: {}. Must be between 0.0 and 100.0",
                config.tracker.cost_analysis_min_quality
            )));
        }

        let mut seen = HashSet::new();
        for model in &config.models {
            model.validate()?;
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::Validation(format!("Model '{}' is listed more than once", model.id)));
            }
        }
        Ok(())
    }
}

impl ModelRegistry {
    /// Re-reads `[[models]]` from `path` and swaps the whole catalog.
    ///
    /// On any error the current catalog stays in place.
    pub fn reload_from(&self, path: &Path) -> Result<usize> {
        let config = ConfigLoader::load(path)?;
        Ok(self.reload(config.descriptors())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LatencyClass, TaskType};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MODELS: &str = r#"
[[models]]
id = "house-small"
provider = "local"
capabilities = ["lead_scoring", "summarization"]
cost_per_1k_input = 0.0
cost_per_1k_output = 0.0
max_context_tokens = 8192
max_output_tokens = 2048
latency_class = "fast"
quality_prior = 62.0
"#;

    fn write(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConfigLoader::parse("").unwrap();
        assert_eq!(config, MeridianConfig::default());
        let router = config.router.router_config().unwrap();
        assert_eq!(router, RouterConfig::default());
        assert_eq!(config.experiments.significance_level, 0.05);
        assert_eq!(config.experiments.min_sample_size, 30);
        assert!(!config.registry().unwrap().snapshot().is_empty());
    }

    #[test]
    fn test_load_full_config() {
        let file = write(&format!(
            r#"
[router]
default_strategy = "best_cost"
stats_window_hours = 24
stats_cache_ttl_secs = 0

[router.weights]
quality = 0.6
cost = 0.2
latency = 0.2

[experiments]
significance_level = 0.01
min_sample_size = 50

[tracker]
store = "sqlite"
database_path = "records.db"
auto_score = false
{MODELS}"#
        ));
        let config = ConfigLoader::load(file.path()).unwrap();
        let router = config.router.router_config().unwrap();
        assert_eq!(router.default_strategy, RoutingStrategy::BestCost);
        assert_eq!(router.stats_window, chrono::Duration::hours(24));
        assert!(router.stats_cache_ttl.is_zero());
        assert_eq!(config.experiments.min_sample_size, 50);
        assert_eq!(config.tracker.store, StoreKind::Sqlite);
        assert!(!config.tracker.auto_score);

        let registry = config.registry().unwrap();
        let model = registry.get("house-small").unwrap();
        assert_eq!(model.latency_class, LatencyClass::Fast);
        assert!(model.supports(TaskType::LeadScoring));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            "[router]\ndefault_strategy = \"complexity_based\"",
            "[router.weights]\nquality = 0.9\ncost = 0.3\nlatency = 0.2",
            "[router]\nmax_fallback_depth = 0",
            "[experiments]\nsignificance_level = 1.5",
            "[experiments]\nmin_sample_size = 1",
            "[tracker]\nstore = \"sqlite\"",
            "[tracker]\ncost_analysis_min_quality = 120.0",
        ];
        for case in cases {
            assert!(matches!(ConfigLoader::parse(case), Err(ConfigError::Validation(_))), "accepted: {case}");
        }
    }

    #[test]
    fn test_duplicate_and_invalid_models_rejected() {
        let duplicate = format!("{MODELS}{MODELS}");
        assert!(matches!(ConfigLoader::parse(&duplicate), Err(ConfigError::Validation(_))));

        let negative = MODELS.replace("cost_per_1k_input = 0.0", "cost_per_1k_input = -1.0");
        assert!(matches!(ConfigLoader::parse(&negative), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(ConfigLoader::parse("[router"), Err(ConfigError::Toml(_))));
        assert!(matches!(ConfigLoader::load(Path::new("/nonexistent/meridian.toml")), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_reload_from_swaps_catalog() {
        let registry = ModelRegistry::with_defaults();
        let version = registry.snapshot().version();
        let file = write(MODELS);

        assert_eq!(registry.reload_from(file.path()).unwrap(), 1);
        assert!(registry.get("house-small").is_ok());
        assert!(registry.get("gpt-4o").is_err());
        assert_eq!(registry.snapshot().version(), version + 1);

        let broken = write(&MODELS.replace("quality_prior = 62.0", "quality_prior = 620.0"));
        assert!(registry.reload_from(broken.path()).is_err());
        assert!(registry.get("house-small").is_ok());
    }
}
