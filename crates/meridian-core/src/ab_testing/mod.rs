//! Model-selection experiments.
//!
//! An experiment splits traffic for one task type between candidate models
//! by weight, tags the resulting execution records with its id, and compares
//! the variants' quality against a designated control.
//!
//! Lifecycle: `draft -> running <-> paused -> completed`, where `completed`
//! is terminal.
//!
//! Variant assignment is a pure function of the test configuration and the
//! request key: `sha256(test_id ":" key)` is reduced to one of 10,000 buckets
//! and mapped onto the cumulative weight ranges of the active variants. The
//! same key therefore lands on the same variant in every process.

mod results;
pub mod stats;

use crate::error::{EntityKind, MeridianError, Result, StorageError};
use crate::registry::ModelRegistry;
use crate::tracker::MetricTracker;
use crate::types::TaskType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::info;

pub use results::{ABTestResult, InconclusiveReason, TestOutcome, VariantComparison, VariantResult};

/// Number of buckets the hash space is divided into.
pub const BUCKETS: u32 = 10_000;

/// Experiment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Created, not yet serving traffic.
    #[default]
    Draft,
    /// Serving traffic.
    Running,
    /// Temporarily not serving traffic.
    Paused,
    /// Finished. Terminal.
    Completed,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestStatus::Draft => "draft",
            TestStatus::Running => "running",
            TestStatus::Paused => "paused",
            TestStatus::Completed => "completed",
        };
        f.write_str(name)
    }
}

const fn default_active() -> bool {
    true
}

/// One candidate model in an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantConfig {
    /// Model serving this variant. Also used as the variant tag on records.
    pub model_id: String,
    /// Share of traffic in percent. Active weights sum to 100.
    pub weight: u32,
    /// Inactive variants receive no traffic and are excluded from the weight sum.
    #[serde(default = "default_active")]
    pub active: bool,
    /// The baseline the other variants are compared against.
    #[serde(default)]
    pub is_control: bool,
}

impl VariantConfig {
    /// An active, non-control variant.
    #[must_use]
    pub fn new(model_id: impl Into<String>, weight: u32) -> Self {
        Self { model_id: model_id.into(), weight, active: true, is_control: false }
    }

    /// Marks this variant as the control.
    #[must_use]
    pub fn control(mut self) -> Self {
        self.is_control = true;
        self
    }

    /// Takes this variant out of the traffic split.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// An experiment definition and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ABTestConfig {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub variants: Vec<VariantConfig>,
    #[serde(default)]
    pub status: TestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Overrides the manager's alpha for this test.
    #[serde(default)]
    pub significance_level: Option<f64>,
    /// Overrides the manager's minimum per-variant sample size for this test.
    #[serde(default)]
    pub min_sample_size: Option<usize>,
}

impl ABTestConfig {
    /// A draft experiment.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        task_type: TaskType,
        variants: Vec<VariantConfig>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            task_type,
            variants,
            status: TestStatus::Draft,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            significance_level: None,
            min_sample_size: None,
        }
    }

    #[must_use]
    pub fn with_significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = Some(alpha);
        self
    }

    #[must_use]
    pub fn with_min_sample_size(mut self, min_sample_size: usize) -> Self {
        self.min_sample_size = Some(min_sample_size);
        self
    }

    /// The control variant. Defaults to the first active variant when none is
    /// marked.
    pub fn control(&self) -> Option<&VariantConfig> {
        self.variants.iter().find(|v| v.is_control).or_else(|| self.active_variants().next())
    }

    /// Variants that receive traffic, in declaration order.
    pub fn active_variants(&self) -> impl Iterator<Item = &VariantConfig> {
        self.variants.iter().filter(|v| v.active)
    }

    /// Whether this test currently serves traffic.
    pub fn is_running(&self) -> bool {
        self.status == TestStatus::Running
    }
}

/// Manager-wide statistical thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    /// Alpha for the significance test.
    pub significance_level: f64,
    /// Quality samples every variant needs before a winner can be declared.
    pub min_sample_size: usize,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self { significance_level: 0.05, min_sample_size: 30 }
    }
}

impl ExperimentSettings {
    /// Checks the thresholds are usable.
    pub fn validate(&self) -> Result<()> {
        validate_thresholds(self.significance_level, self.min_sample_size)
    }
}

fn validate_thresholds(alpha: f64, min_sample_size: usize) -> Result<()> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(MeridianError::Validation(format!("significance_level must be in (0, 1), got {alpha}")));
    }
    if min_sample_size < 2 {
        return Err(MeridianError::Validation(format!("min_sample_size must be at least 2, got {min_sample_size}")));
    }
    Ok(())
}

/// The variant a request key resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantAssignment {
    pub test_id: String,
    pub model_id: String,
    /// Bucket in `0..BUCKETS` the key hashed to.
    pub bucket: u32,
}

/// Stable bucket for `request_key` within `test_id`.
#[must_use]
pub fn bucket_for(test_id: &str, request_key: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(test_id.as_bytes());
    hasher.update(b":");
    hasher.update(request_key.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(BUCKETS)) as u32
}

/// Maps `request_key` onto the active variants of `config` by weight.
///
/// Pure: depends only on the configuration and the key.
#[must_use]
pub fn assign(config: &ABTestConfig, request_key: &str) -> Option<VariantAssignment> {
    let bucket = bucket_for(&config.id, request_key);
    let mut upper = 0u32;
    let mut last = None;
    for variant in config.active_variants() {
        // Saturates for unvalidated configs instead of overflowing.
        upper = upper.saturating_add(variant.weight.saturating_mul(BUCKETS / 100));
        last = Some(variant);
        if bucket < upper {
            break;
        }
    }
    last.map(|variant| VariantAssignment {
        test_id: config.id.clone(),
        model_id: variant.model_id.clone(),
        bucket,
    })
}

fn poisoned(e: impl fmt::Display) -> MeridianError {
    StorageError::LockPoisoned(e.to_string()).into()
}

/// Owns experiment definitions and computes their results from tracker data.
#[derive(Debug)]
pub struct ABTestManager {
    tracker: Arc<MetricTracker>,
    settings: ExperimentSettings,
    tests: RwLock<HashMap<String, ABTestConfig>>,
}

impl ABTestManager {
    /// Creates a manager with the default thresholds (alpha 0.05, 30 samples).
    pub fn new(tracker: Arc<MetricTracker>) -> Self {
        Self { tracker, settings: ExperimentSettings::default(), tests: RwLock::new(HashMap::new()) }
    }

    /// Creates a manager with explicit thresholds.
    pub fn with_settings(tracker: Arc<MetricTracker>, settings: ExperimentSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { tracker, settings, tests: RwLock::new(HashMap::new()) })
    }

    pub fn settings(&self) -> ExperimentSettings {
        self.settings
    }

    fn registry(&self) -> &ModelRegistry {
        self.tracker.registry()
    }

    fn validate(&self, config: &ABTestConfig) -> Result<()> {
        if config.id.trim().is_empty() {
            return Err(MeridianError::Validation("test id must not be empty".to_string()));
        }
        if config.variants.len() < 2 {
            return Err(MeridianError::Validation(format!(
                "test '{}' needs at least two variants, got {}",
                config.id,
                config.variants.len()
            )));
        }

        let mut seen = HashSet::new();
        for variant in &config.variants {
            if !seen.insert(variant.model_id.as_str()) {
                return Err(MeridianError::Validation(format!(
                    "model '{}' appears more than once in test '{}'",
                    variant.model_id, config.id
                )));
            }
            let descriptor = self.registry().get(&variant.model_id)?;
            if !descriptor.supports(config.task_type) {
                return Err(MeridianError::Validation(format!(
                    "model '{}' does not declare capability for {}",
                    variant.model_id, config.task_type
                )));
            }
        }

        if config.variants.iter().filter(|v| v.is_control).count() > 1 {
            return Err(MeridianError::Validation(format!("test '{}' marks more than one control", config.id)));
        }
        if let Some(control) = config.variants.iter().find(|v| v.is_control && !v.active) {
            return Err(MeridianError::Validation(format!(
                "control '{}' of test '{}' must be active",
                control.model_id, config.id
            )));
        }

        let active: Vec<&VariantConfig> = config.active_variants().collect();
        if active.is_empty() {
            return Err(MeridianError::Validation(format!("test '{}' has no active variants", config.id)));
        }
        if let Some(zero) = active.iter().find(|v| v.weight == 0) {
            return Err(MeridianError::Validation(format!(
                "active variant '{}' has zero weight",
                zero.model_id
            )));
        }
        let total: u32 = active.iter().map(|v| v.weight).sum();
        if total != 100 {
            return Err(MeridianError::Validation(format!(
                "active variant weights must sum to 100, got {total}"
            )));
        }

        validate_thresholds(
            config.significance_level.unwrap_or(self.settings.significance_level),
            config.min_sample_size.unwrap_or(self.settings.min_sample_size),
        )
    }

    /// Validates and stores a new experiment in `draft` state.
    ///
    /// When no variant is marked as control, the first active variant becomes
    /// the control.
    ///
    /// # Errors
    /// `Validation` for a malformed split or duplicate id, `NotFound` for an
    /// unknown model.
    pub fn create(&self, mut config: ABTestConfig) -> Result<ABTestConfig> {
        self.validate(&config)?;
        if !config.variants.iter().any(|v| v.is_control) {
            if let Some(first) = config.variants.iter_mut().find(|v| v.active) {
                first.is_control = true;
            }
        }
        let now = Utc::now();
        config.status = TestStatus::Draft;
        config.created_at = now;
        config.updated_at = now;
        config.started_at = None;
        config.completed_at = None;

        let mut tests = self.tests.write().map_err(poisoned)?;
        if tests.contains_key(&config.id) {
            return Err(MeridianError::Validation(format!("test '{}' already exists", config.id)));
        }
        tests.insert(config.id.clone(), config.clone());
        info!(
            test_id = %config.id,
            task_type = %config.task_type,
            variants = config.variants.len(),
            "Created A/B test"
        );
        Ok(config)
    }

    /// A snapshot of one experiment.
    pub fn get(&self, test_id: &str) -> Result<ABTestConfig> {
        self.tests
            .read()
            .map_err(poisoned)?
            .get(test_id)
            .cloned()
            .ok_or_else(|| MeridianError::not_found(EntityKind::AbTest, test_id))
    }

    /// All experiments, oldest first.
    pub fn list(&self) -> Result<Vec<ABTestConfig>> {
        let mut tests: Vec<ABTestConfig> = self.tests.read().map_err(poisoned)?.values().cloned().collect();
        tests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tests)
    }

    /// Running experiments for `task_type`, oldest first.
    pub fn running_for(&self, task_type: TaskType) -> Result<Vec<ABTestConfig>> {
        Ok(self.list()?.into_iter().filter(|t| t.task_type == task_type && t.is_running()).collect())
    }

    fn transition(&self, test_id: &str, allowed_from: &[TestStatus], to: TestStatus) -> Result<ABTestConfig> {
        let mut tests = self.tests.write().map_err(poisoned)?;
        let test = tests.get_mut(test_id).ok_or_else(|| MeridianError::not_found(EntityKind::AbTest, test_id))?;
        if !allowed_from.contains(&test.status) {
            return Err(MeridianError::Validation(format!(
                "cannot move test '{}' from {} to {}",
                test_id, test.status, to
            )));
        }
        let from = test.status;
        let now = Utc::now();
        test.status = to;
        test.updated_at = now;
        match to {
            TestStatus::Running if test.started_at.is_none() => test.started_at = Some(now),
            TestStatus::Completed => test.completed_at = Some(now),
            _ => {}
        }
        info!(test_id = %test_id, from = %from, to = %to, "A/B test status changed");
        Ok(test.clone())
    }

    /// `draft | paused -> running`.
    pub fn start(&self, test_id: &str) -> Result<ABTestConfig> {
        self.transition(test_id, &[TestStatus::Draft, TestStatus::Paused], TestStatus::Running)
    }

    /// `running -> paused`.
    pub fn pause(&self, test_id: &str) -> Result<ABTestConfig> {
        self.transition(test_id, &[TestStatus::Running], TestStatus::Paused)
    }

    /// `running | paused -> completed`. Terminal.
    pub fn complete(&self, test_id: &str) -> Result<ABTestConfig> {
        self.transition(test_id, &[TestStatus::Running, TestStatus::Paused], TestStatus::Completed)
    }

    /// Deterministically assigns `request_key` to a variant of `test_id`.
    ///
    /// # Errors
    /// `NotFound` for an unknown test, `Validation` for an empty key.
    pub fn assign_variant(&self, test_id: &str, request_key: &str) -> Result<VariantAssignment> {
        if request_key.is_empty() {
            return Err(MeridianError::Validation("request key must not be empty".to_string()));
        }
        let config = self.get(test_id)?;
        assign(&config, request_key)
            .ok_or_else(|| MeridianError::Validation(format!("test '{test_id}' has no active variants")))
    }

    /// Compares every active variant against the control using the records
    /// tagged with `test_id`. Inactive variants are reported but take no part
    /// in the significance tests or the sample-size gate.
    ///
    /// Reads a snapshot of the records and holds no lock while computing, so
    /// it never blocks writers and may be called concurrently.
    ///
    /// # Errors
    /// `NotFound` for an unknown test, `Storage` if the records cannot be read.
    pub fn compute_results(&self, test_id: &str) -> Result<ABTestResult> {
        let config = self.get(test_id)?;
        let records = self.tracker.records_for_test(test_id)?;
        let alpha = config.significance_level.unwrap_or(self.settings.significance_level);
        let min_samples = config.min_sample_size.unwrap_or(self.settings.min_sample_size);
        let result = results::compute(&config, &records, alpha, min_samples);
        info!(
            test_id = %test_id,
            records = records.len(),
            p_value = ?result.p_value,
            outcome = %result.outcome,
            "Computed A/B test results"
        );
        Ok(result)
    }
}
