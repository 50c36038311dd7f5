//! Wiring shared by every command: configuration, catalog, record store,
//! tracker, experiment manager and router.

use anyhow::{Context, Result};
use chrono::Duration;
use meridian_core::{
    ABTestManager, ConfigLoader, InMemoryRecordStore, MeridianConfig, MetricTracker, ModelRegistry, ModelRouter,
    RecordStore, SqliteRecordStore, StoreKind,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct AppContext {
    pub config: MeridianConfig,
    pub registry: Arc<ModelRegistry>,
    pub tracker: Arc<MetricTracker>,
    pub experiments: Arc<ABTestManager>,
    pub router: ModelRouter,
    /// Whether records outlive this process.
    pub persistent: bool,
}

impl AppContext {
    /// Loads `config_path` (or defaults) and opens the record store.
    ///
    /// `db` wins over the configured store so one-off invocations can point
    /// at a database without a config file.
    pub fn build(config_path: Option<&Path>, db: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => ConfigLoader::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => MeridianConfig::default(),
        };

        let registry = Arc::new(config.registry().context("Invalid model catalog")?);
        let (store, persistent) = open_store(&config, db)?;

        let mut tracker = MetricTracker::new(store, Arc::clone(&registry))
            .with_reference_request(config.router.reference_request);
        if !config.tracker.auto_score {
            tracker = tracker.without_auto_scoring();
        }
        let tracker = Arc::new(tracker);

        let experiments = Arc::new(
            ABTestManager::with_settings(Arc::clone(&tracker), config.experiments)
                .context("Invalid experiment settings")?,
        );
        let router = ModelRouter::new(Arc::clone(&registry), Arc::clone(&tracker))
            .with_config(config.router.router_config()?)?
            .with_experiments(Arc::clone(&experiments));

        Ok(Self { config, registry, tracker, experiments, router, persistent })
    }

    /// Window for aggregate reads: `hours` when given, else the router's.
    pub fn window(&self, hours: Option<u64>) -> Result<Duration> {
        match hours {
            Some(hours) => i64::try_from(hours)
                .ok()
                .and_then(Duration::try_hours)
                .filter(|w| *w > Duration::zero())
                .with_context(|| format!("Invalid window: {} hours", hours)),
            None => Ok(self.router.config().stats_window),
        }
    }
}

fn open_store(config: &MeridianConfig, db: Option<&Path>) -> Result<(Arc<dyn RecordStore>, bool)> {
    let path = db.or_else(|| match config.tracker.store {
        StoreKind::Sqlite => config.tracker.database_path.as_deref(),
        StoreKind::Memory => None,
    });

    match path {
        Some(path) => {
            debug!(path = %path.display(), "Opening SQLite record store");
            let store = SqliteRecordStore::open(path)
                .with_context(|| format!("Failed to open record database {}", path.display()))?;
            Ok((Arc::new(store), true))
        }
        None => Ok((Arc::new(InMemoryRecordStore::new()), false)),
    }
}
