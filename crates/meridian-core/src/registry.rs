//! Model catalog.
//!
//! The catalog is an immutable snapshot. Readers grab the current `Arc` and
//! work against it; registration and reloads build a complete replacement and
//! swap it in with a single atomic store, so no reader ever observes a
//! half-updated catalog and reads never take a lock.

use crate::error::{EntityKind, MeridianError, Result};
use crate::types::{LatencyClass, TaskType};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Costs below this are treated as this when dividing, so free local models
/// rank as "very cheap" instead of producing infinities.
const MIN_COST: f64 = 1e-9;

/// Static description of one model backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique model id (e.g. "claude-sonnet-4.5").
    pub id: String,
    /// Provider serving the model (e.g. "anthropic").
    pub provider: String,
    /// Task types the model is allowed to serve.
    pub capabilities: BTreeSet<TaskType>,
    /// USD per 1k input tokens.
    pub cost_per_1k_input: f64,
    /// USD per 1k output tokens.
    pub cost_per_1k_output: f64,
    /// Maximum context window in tokens.
    pub max_context_tokens: u32,
    /// Maximum completion size in tokens.
    pub max_output_tokens: u32,
    /// Expected latency until history says otherwise.
    #[serde(default)]
    pub latency_class: LatencyClass,
    /// Baseline quality prior (0-100) used until history exists.
    pub quality_prior: f64,
}

impl ModelDescriptor {
    /// Creates a descriptor with a standard latency class and generous limits.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        capabilities: impl IntoIterator<Item = TaskType>,
        cost_per_1k_input: f64,
        cost_per_1k_output: f64,
        quality_prior: f64,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            capabilities: capabilities.into_iter().collect(),
            cost_per_1k_input,
            cost_per_1k_output,
            max_context_tokens: 128_000,
            max_output_tokens: 8_192,
            latency_class: LatencyClass::Standard,
            quality_prior,
        }
    }

    /// Sets the latency class.
    #[must_use]
    pub fn with_latency_class(mut self, latency_class: LatencyClass) -> Self {
        self.latency_class = latency_class;
        self
    }

    /// Sets the context and output limits.
    #[must_use]
    pub fn with_limits(mut self, max_context_tokens: u32, max_output_tokens: u32) -> Self {
        self.max_context_tokens = max_context_tokens;
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Whether the model declares capability for `task_type`.
    #[must_use]
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.capabilities.contains(&task_type)
    }

    /// Cost in USD of a request with the given token counts.
    #[must_use]
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.cost_per_1k_input
            + (output_tokens as f64 / 1000.0) * self.cost_per_1k_output
    }

    /// Price per 1k tokens assuming the usual 3:1 input:output mix.
    #[must_use]
    pub fn blended_cost_per_1k(&self) -> f64 {
        0.75f64.mul_add(self.cost_per_1k_input, 0.25 * self.cost_per_1k_output)
    }

    /// Checks the descriptor for values the router cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MeridianError::Validation("Model id must not be empty".to_string()));
        }
        if self.provider.trim().is_empty() {
            return Err(MeridianError::Validation(format!(
                "Model '{}' must declare a provider",
                self.id
            )));
        }
        if self.capabilities.is_empty() {
            return Err(MeridianError::Validation(format!(
                "Model '{}' must declare at least one capability",
                self.id
            )));
        }
        for (name, price) in
            [("cost_per_1k_input", self.cost_per_1k_input), ("cost_per_1k_output", self.cost_per_1k_output)]
        {
            if !price.is_finite() || price < 0.0 {
                return Err(MeridianError::Validation(format!(
                    "Invalid {} for model '{}': {} (must be >= 0.0)",
                    name, self.id, price
                )));
            }
        }
        if !(0.0..=100.0).contains(&self.quality_prior) {
            return Err(MeridianError::Validation(format!(
                "Invalid quality_prior for model '{}': {} (must be between 0 and 100)",
                self.id, self.quality_prior
            )));
        }
        if self.max_context_tokens == 0 || self.max_output_tokens == 0 {
            return Err(MeridianError::Validation(format!(
                "Model '{}' must declare non-zero context and output limits",
                self.id
            )));
        }
        Ok(())
    }
}

/// Quality achieved per unit of cost. Used only for ranking, never stored.
///
/// Non-increasing in `cost` and non-decreasing in `quality`.
#[must_use]
pub fn efficiency(quality: f64, cost: f64) -> f64 {
    quality.max(0.0) / cost.max(MIN_COST)
}

/// Cost efficiency of a descriptor at a given average quality, using its
/// blended per-1k price.
#[must_use]
pub fn cost_efficiency(descriptor: &ModelDescriptor, avg_quality: f64) -> f64 {
    efficiency(avg_quality, descriptor.blended_cost_per_1k())
}

/// One immutable catalog snapshot.
#[derive(Debug, Clone)]
pub struct Catalog {
    models: BTreeMap<String, Arc<ModelDescriptor>>,
    version: u64,
    loaded_at: DateTime<Utc>,
}

impl Catalog {
    fn empty() -> Self {
        Self { models: BTreeMap::new(), version: 0, loaded_at: Utc::now() }
    }

    fn build(descriptors: Vec<ModelDescriptor>, version: u64) -> Result<Self> {
        let mut models = BTreeMap::new();
        for descriptor in descriptors {
            descriptor.validate()?;
            let id = descriptor.id.clone();
            if models.insert(id.clone(), Arc::new(descriptor)).is_some() {
                return Err(MeridianError::Validation(format!("Duplicate model id in catalog: {}", id)));
            }
        }
        Ok(Self { models, version, loaded_at: Utc::now() })
    }

    /// Looks up a descriptor.
    #[must_use]
    pub fn get(&self, model_id: &str) -> Option<&Arc<ModelDescriptor>> {
        self.models.get(model_id)
    }

    /// All descriptors declaring `task_type`, ordered by (provider, id).
    #[must_use]
    pub fn list(&self, task_type: TaskType) -> Vec<Arc<ModelDescriptor>> {
        let mut models: Vec<_> = self.models.values().filter(|m| m.supports(task_type)).cloned().collect();
        models.sort_by(|a, b| (&a.provider, &a.id).cmp(&(&b.provider, &b.id)));
        models
    }

    /// Every descriptor, ordered by (provider, id).
    #[must_use]
    pub fn all(&self) -> Vec<Arc<ModelDescriptor>> {
        let mut models: Vec<_> = self.models.values().cloned().collect();
        models.sort_by(|a, b| (&a.provider, &a.id).cmp(&(&b.provider, &b.id)));
        models
    }

    /// Number of models in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Monotonic version, bumped on every swap.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When this snapshot was built.
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Registry of model descriptors.
#[derive(Debug)]
pub struct ModelRegistry {
    catalog: ArcSwap<Catalog>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { catalog: ArcSwap::from_pointee(Catalog::empty()) }
    }

    /// Creates a registry holding the built-in catalog.
    #[must_use]
    pub fn with_defaults() -> Self {
        let models = default_catalog().into_iter().map(|d| (d.id.clone(), Arc::new(d))).collect();
        Self { catalog: ArcSwap::from_pointee(Catalog { models, version: 1, loaded_at: Utc::now() }) }
    }

    /// Creates a registry from a bootstrap descriptor list.
    pub fn from_descriptors(descriptors: Vec<ModelDescriptor>) -> Result<Self> {
        let catalog = Catalog::build(descriptors, 1)?;
        Ok(Self { catalog: ArcSwap::from_pointee(catalog) })
    }

    /// Adds or replaces a descriptor.
    ///
    /// # Errors
    /// `Validation` on negative pricing, an empty capability set or other
    /// malformed fields; the catalog is left untouched.
    pub fn register(&self, descriptor: ModelDescriptor) -> Result<()> {
        descriptor.validate()?;
        let descriptor = Arc::new(descriptor);
        let model_id = descriptor.id.clone();

        self.catalog.rcu(|current| {
            let mut next = Catalog::clone(current);
            next.models.insert(descriptor.id.clone(), Arc::clone(&descriptor));
            next.version = current.version + 1;
            next.loaded_at = Utc::now();
            next
        });

        debug!(model_id = %model_id, "Registered model descriptor");
        Ok(())
    }

    /// Replaces the whole catalog atomically.
    ///
    /// Every descriptor is validated before the swap; on error the previous
    /// catalog stays in place.
    pub fn reload(&self, descriptors: Vec<ModelDescriptor>) -> Result<usize> {
        let version = self.catalog.load().version + 1;
        let catalog = Catalog::build(descriptors, version)?;
        let count = catalog.len();
        self.catalog.store(Arc::new(catalog));
        info!(models = count, version = version, "Reloaded model catalog");
        Ok(count)
    }

    /// All descriptors declaring `task_type`, in stable (provider, id) order.
    #[must_use]
    pub fn list(&self, task_type: TaskType) -> Vec<Arc<ModelDescriptor>> {
        self.catalog.load().list(task_type)
    }

    /// Looks up a descriptor.
    ///
    /// # Errors
    /// `NotFound` if the id is unknown.
    pub fn get(&self, model_id: &str) -> Result<Arc<ModelDescriptor>> {
        self.catalog
            .load()
            .get(model_id)
            .cloned()
            .ok_or_else(|| MeridianError::not_found(EntityKind::Model, model_id))
    }

    /// The current snapshot. Hold it to make several reads consistent.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.catalog.load_full()
    }
}

/// Built-in catalog used when configuration supplies no models.
#[must_use]
pub fn default_catalog() -> Vec<ModelDescriptor> {
    use TaskType::{
        ContentGeneration, ConversationReply, EmailGeneration, LeadScoring, ResponseClassification,
        Summarization, WebsiteAnalysis,
    };

    vec![
        ModelDescriptor::new("claude-sonnet-4.5", "anthropic", TaskType::ALL, 0.003, 0.015, 88.0)
            .with_limits(200_000, 64_000),
        ModelDescriptor::new("claude-haiku-4.5", "anthropic", TaskType::ALL, 0.001, 0.005, 78.0)
            .with_latency_class(LatencyClass::Fast)
            .with_limits(200_000, 64_000),
        ModelDescriptor::new("gpt-4o", "openai", TaskType::ALL, 0.0025, 0.01, 86.0)
            .with_limits(128_000, 16_384),
        ModelDescriptor::new(
            "gpt-4o-mini",
            "openai",
            [EmailGeneration, ConversationReply, LeadScoring, Summarization, ResponseClassification],
            0.000_15,
            0.0006,
            72.0,
        )
        .with_latency_class(LatencyClass::Fast)
        .with_limits(128_000, 16_384),
        ModelDescriptor::new("gemini-2.5-pro", "google", TaskType::ALL, 0.001_25, 0.01, 87.0)
            .with_latency_class(LatencyClass::Slow)
            .with_limits(1_000_000, 65_536),
        ModelDescriptor::new(
            "gemini-2.5-flash",
            "google",
            [EmailGeneration, ContentGeneration, WebsiteAnalysis, Summarization, ResponseClassification],
            0.0003,
            0.0025,
            76.0,
        )
        .with_latency_class(LatencyClass::Fast)
        .with_limits(1_000_000, 65_536),
        ModelDescriptor::new(
            "llama-3.1-8b",
            "local",
            [LeadScoring, Summarization, ResponseClassification],
            0.0,
            0.0,
            60.0,
        )
        .with_limits(8_192, 2_048),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, provider: &str) -> ModelDescriptor {
        ModelDescriptor::new(id, provider, [TaskType::EmailGeneration], 0.001, 0.002, 80.0)
    }

    #[test]
    fn test_register_and_get() {
        let registry = ModelRegistry::new();
        registry.register(descriptor("m1", "p1")).unwrap();
        assert_eq!(registry.get("m1").unwrap().provider, "p1");
        assert_eq!(registry.snapshot().version(), 1);
    }

    #[test]
    fn test_register_replaces_existing() {
        let registry = ModelRegistry::new();
        registry.register(descriptor("m1", "p1")).unwrap();
        registry.register(descriptor("m1", "p2")).unwrap();
        assert_eq!(registry.snapshot().len(), 1);
        assert_eq!(registry.get("m1").unwrap().provider, "p2");
    }

    #[test]
    fn test_register_rejects_negative_pricing() {
        let registry = ModelRegistry::new();
        let mut bad = descriptor("m1", "p1");
        bad.cost_per_1k_output = -0.5;
        let err = registry.register(bad).unwrap_err();
        assert!(matches!(err, MeridianError::Validation(_)));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_register_rejects_empty_capabilities() {
        let registry = ModelRegistry::new();
        let bad = ModelDescriptor::new("m1", "p1", Vec::<TaskType>::new(), 0.001, 0.002, 80.0);
        assert!(matches!(registry.register(bad), Err(MeridianError::Validation(_))));
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let registry = ModelRegistry::with_defaults();
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, MeridianError::NotFound { kind: EntityKind::Model, .. }));
    }

    #[test]
    fn test_list_is_filtered_and_ordered() {
        let registry = ModelRegistry::new();
        registry.register(descriptor("zeta", "b-provider")).unwrap();
        registry.register(descriptor("alpha", "b-provider")).unwrap();
        registry.register(descriptor("omega", "a-provider")).unwrap();
        registry
            .register(ModelDescriptor::new("other", "a-provider", [TaskType::LeadScoring], 0.0, 0.0, 50.0))
            .unwrap();

        let ids: Vec<_> =
            registry.list(TaskType::EmailGeneration).iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["omega", "alpha", "zeta"]);
    }

    #[test]
    fn test_reload_is_all_or_nothing() {
        let registry = ModelRegistry::with_defaults();
        let before = registry.snapshot().len();

        let mut bad = descriptor("m2", "p");
        bad.cost_per_1k_input = -1.0;
        assert!(registry.reload(vec![descriptor("m1", "p"), bad]).is_err());
        assert_eq!(registry.snapshot().len(), before);

        assert!(registry.reload(vec![descriptor("m1", "p"), descriptor("m1", "p")]).is_err());
        assert_eq!(registry.snapshot().len(), before);

        assert_eq!(registry.reload(vec![descriptor("m1", "p")]).unwrap(), 1);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_readers_never_see_partial_catalog() {
        let registry = Arc::new(ModelRegistry::new());
        let small: Vec<_> = (0..3).map(|i| descriptor(&format!("s{i}"), "p")).collect();
        let large: Vec<_> = (0..50).map(|i| descriptor(&format!("l{i}"), "p")).collect();
        registry.reload(small.clone()).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let len = registry.snapshot().len();
                        assert!(len == 3 || len == 50, "observed partial catalog of {len}");
                    }
                })
            })
            .collect();

        for i in 0..100 {
            let next = if i % 2 == 0 { large.clone() } else { small.clone() };
            registry.reload(next).unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_cost_efficiency_monotonicity() {
        for model in default_catalog() {
            let base = cost_efficiency(&model, 70.0);
            assert!(cost_efficiency(&model, 80.0) >= base);

            let mut pricier = model.clone();
            pricier.cost_per_1k_input += 0.001;
            pricier.cost_per_1k_output += 0.001;
            assert!(cost_efficiency(&pricier, 70.0) <= base);
        }
    }

    #[test]
    fn test_free_model_efficiency_is_finite() {
        let free = ModelDescriptor::new("free", "local", [TaskType::Summarization], 0.0, 0.0, 60.0);
        assert!(cost_efficiency(&free, 60.0).is_finite());
    }

    #[test]
    fn test_estimate_cost() {
        let model = ModelDescriptor::new("m", "p", [TaskType::Summarization], 0.003, 0.015, 80.0);
        let cost = model.estimate_cost(1000, 500);
        assert!((cost - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn test_default_catalog_covers_every_task() {
        let registry = ModelRegistry::with_defaults();
        for task in TaskType::ALL {
            assert!(!registry.list(task).is_empty(), "no model for {task}");
        }
    }
}
