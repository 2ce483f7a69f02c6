//! Storage reconciliation service for Flowdesk.
//!
//! This module provides the [`SyncService`] struct, the context object that wires the
//! local cache, the remote store, the mode manager, the operation router and the
//! migration engine together. It is the only data layer the rest of the application
//! talks to:
//! - Entity reads and writes routed by the current storage mode
//! - Silent per-operation fallback to the local cache when the remote store fails
//! - Connectivity handling and bounded automatic reconnects
//! - Migration of offline changes once the remote store is reachable again

pub mod entity;
pub mod migration;
pub mod mode;
pub mod prober;
pub mod retry;
pub mod router;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backend::{factory, RemoteStore};
use crate::config::{Config, StorageConfig};
use crate::constants::{LAST_MIGRATION_KEY, MIN_SYNC_INTERVAL_MS};
use crate::logger::Logger;
use crate::records::EntityType;
use crate::storage::LocalStorage;

pub use entity::EntityStore;
pub use migration::{
    CancellationFlag, EntityMigrationCount, MigrationEngine, MigrationError, MigrationJob, MigrationProgress,
    MigrationRecordError, MigrationStage, MigrationSummary, ValidationIssue, ValidationReport,
};
pub use mode::{
    ConnectivityEvent, MigrationRequest, ModeManager, ModeSettings, ModeStatus, ReconnectTrigger, StorageMode,
    TransitionOutcome,
};
pub use prober::{AvailabilityProber, AvailabilityStatus};
pub use retry::RetryPolicy;
pub use router::{OperationRouter, Routed, ServedBy};

/// Diagnostics snapshot of the whole service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub mode: ModeStatus,
    /// Running on the local cache although the remote store was wanted.
    pub degraded: bool,
    pub fallback_enabled: bool,
    pub remote_backend: Option<String>,
    pub migration_running: bool,
    pub last_migration: Option<MigrationSummary>,
}

/// Service that routes entity operations between the remote store and the local cache.
///
/// `SyncService` is cheap to clone; every clone shares the same mode manager, router
/// and migration engine. Several independent services can coexist in one process.
///
/// # Features
/// - Mode selection at startup (forced, local-only, or probed)
/// - Remote-then-local fallback with a failure threshold that switches modes
/// - Connectivity events and periodic reconnect attempts with backoff
/// - Automatic migration of offline changes after reconnecting
/// - Hot reload of the storage settings
///
/// # Example
/// ```rust,no_run
/// use flowdesk::config::Config;
/// use flowdesk::records::{EntityType, Record};
/// use flowdesk::sync::SyncService;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load()?;
/// let service = SyncService::from_config(&config).await?;
///
/// let tasks = service.entity(EntityType::Task);
/// tasks.write(Record::new(EntityType::Task, serde_json::json!({"title": "Plan sprint"}))).await?;
///
/// println!("running in {} mode", service.current_mode());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncService {
    local: LocalStorage,
    remote: Option<Arc<dyn RemoteStore>>,
    manager: Arc<ModeManager>,
    router: Arc<OperationRouter>,
    migration: Option<Arc<MigrationEngine>>,
    sync_interval: Duration,
    logger: Logger,
}

impl SyncService {
    /// Creates a new `SyncService` over the given backends.
    ///
    /// # Arguments
    /// * `config` - Storage settings
    /// * `local` - Local cache store
    /// * `remote` - Remote store, `None` when no credentials are configured
    /// * `logger` - In-memory log receiving degradation events
    ///
    /// # Returns
    /// A service whose initial mode is already resolved
    pub async fn new(
        config: &StorageConfig,
        local: LocalStorage,
        remote: Option<Arc<dyn RemoteStore>>,
        logger: Logger,
    ) -> Self {
        let migration = remote.clone().map(|remote| {
            Arc::new(MigrationEngine::new(
                local.clone(),
                remote,
                config.clear_local_after_migration,
            ))
        });

        let migration_tx = migration.as_ref().map(|engine| {
            let (tx, rx) = mpsc::unbounded_channel();
            spawn_migration_worker(engine.clone(), local.clone(), rx, logger.clone());
            tx
        });

        let prober = AvailabilityProber::new(remote.clone(), config.probe_cache_ttl(), config.remote_timeout());
        let manager = Arc::new(
            ModeManager::start(prober, ModeSettings::from_config(config), logger.clone(), migration_tx).await,
        );
        let router = Arc::new(OperationRouter::new(
            manager.clone(),
            config.enable_fallback,
            config.remote_timeout(),
            logger.clone(),
        ));

        Self {
            local,
            remote,
            manager,
            router,
            migration,
            sync_interval: config.sync_interval().max(Duration::from_millis(MIN_SYNC_INTERVAL_MS)),
            logger,
        }
    }

    /// Build the service from the application configuration.
    ///
    /// Opens the file-backed local cache and, when a database URL is configured, a
    /// lazily connected remote store.
    ///
    /// # Errors
    /// Returns an error if the cache directory cannot be opened or the database URL is invalid
    pub async fn from_config(config: &Config) -> Result<Self> {
        let cache_dir = config.local.resolve_cache_dir()?;
        let local = LocalStorage::open(&cache_dir, config.local.quota_bytes)
            .with_context(|| format!("Failed to open local cache: {}", cache_dir.display()))?;

        let identity = factory::identity_from_config(config);
        let remote = factory::connect_remote(config, identity)
            .await
            .context("Failed to configure remote store")?;

        Ok(Self::new(&config.storage, local, remote, Logger::new()).await)
    }

    /// Entity API for one entity type.
    pub fn entity(&self, entity_type: EntityType) -> EntityStore {
        EntityStore::new(entity_type, self.router.clone(), self.local.clone(), self.remote.clone())
    }

    pub fn current_mode(&self) -> StorageMode {
        self.manager.current_mode()
    }

    /// Observe mode changes, e.g. to drive a degraded-mode indicator.
    pub fn subscribe(&self) -> watch::Receiver<StorageMode> {
        self.manager.subscribe()
    }

    pub fn manager(&self) -> &Arc<ModeManager> {
        &self.manager
    }

    pub fn router(&self) -> &Arc<OperationRouter> {
        &self.router
    }

    pub fn local(&self) -> &LocalStorage {
        &self.local
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn status(&self) -> ServiceStatus {
        let mode = self.manager.status();
        ServiceStatus {
            degraded: mode.is_degraded(),
            mode,
            fallback_enabled: self.router.fallback_enabled(),
            remote_backend: self.remote.as_ref().map(|r| r.backend_type().to_string()),
            migration_running: self.migration.as_ref().is_some_and(|m| m.is_running()),
            last_migration: self.last_migration(),
        }
    }

    /// Feed a host connectivity transition into the mode manager.
    pub async fn handle_connectivity(&self, event: ConnectivityEvent) -> TransitionOutcome {
        info!("Connectivity event: {event:?}");
        self.manager.handle_connectivity(event).await
    }

    /// Consume connectivity events until the sender side closes.
    ///
    /// The online flag is updated as each event arrives. Reconnect loops run in their own
    /// task so that a later `Offline` event is applied without waiting for them.
    pub fn spawn_connectivity_listener(&self, mut events: mpsc::Receiver<ConnectivityEvent>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ConnectivityEvent::Online => {
                        info!("Connectivity event: {event:?}");
                        service.manager.mark_online();
                        let manager = service.manager.clone();
                        tokio::spawn(async move {
                            let outcome = manager.reconnect_after_online().await;
                            debug!("Connectivity event {event:?} handled: {outcome:?}");
                        });
                    }
                    ConnectivityEvent::Offline => {
                        let outcome = service.handle_connectivity(event).await;
                        debug!("Connectivity event {event:?} handled: {outcome:?}");
                    }
                }
            }
            debug!("Connectivity listener stopped");
        })
    }

    /// Manual reconnect request. Resets the retry counter.
    pub async fn retry_remote(&self) -> TransitionOutcome {
        self.manager.retry_now().await
    }

    /// Periodically attempt to leave `Local` mode, every `sync_interval_ms`
    /// (at least `MIN_SYNC_INTERVAL_MS`).
    pub fn spawn_background_sync(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let period = self.sync_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if manager.current_mode() != StorageMode::Local {
                    continue;
                }
                match manager.auto_retry().await {
                    TransitionOutcome::Switched(mode) => info!("✅ Background sync reconnected, now in {mode} mode"),
                    outcome => debug!("Background sync tick: {outcome:?}"),
                }
            }
        })
    }

    fn engine(&self) -> Result<&Arc<MigrationEngine>, MigrationError> {
        self.migration.as_ref().ok_or(MigrationError::RemoteUnavailable)
    }

    /// Migrate every local record to the remote store.
    ///
    /// # Errors
    /// * `MigrationError::RemoteUnavailable` without a configured remote store
    /// * `MigrationError::AlreadyRunning` while another run is in progress
    /// * `MigrationError::Export` if the local cache cannot be read
    pub async fn migrate(
        &self,
        progress: Option<mpsc::UnboundedSender<MigrationProgress>>,
    ) -> Result<MigrationSummary, MigrationError> {
        self.migrate_with(None, progress, None).await
    }

    /// Migrate with an optional single-entity scope and a cancellation flag.
    pub async fn migrate_with(
        &self,
        entity_type: Option<EntityType>,
        progress: Option<mpsc::UnboundedSender<MigrationProgress>>,
        cancel: Option<CancellationFlag>,
    ) -> Result<MigrationSummary, MigrationError> {
        let engine = self.engine()?;
        let summary = match entity_type {
            Some(entity_type) => engine.migrate_entity(entity_type, progress, cancel).await?,
            None => engine.migrate(progress, cancel).await?,
        };

        self.logger.log(format!(
            "Migration {}: {}/{} records, {} errors",
            if summary.success { "succeeded" } else { "incomplete" },
            summary.migrated_records,
            summary.total_records,
            summary.errors.len()
        ));
        record_summary(&self.local, &summary);
        Ok(summary)
    }

    /// Advisory count comparison for a finished migration.
    pub async fn validate_migration(
        &self,
        summary: &MigrationSummary,
        progress: Option<mpsc::UnboundedSender<MigrationProgress>>,
    ) -> Result<ValidationReport, MigrationError> {
        Ok(self.engine()?.validate(summary, progress).await)
    }

    /// Summary of the most recent migration, persisted in the local cache.
    pub fn last_migration(&self) -> Option<MigrationSummary> {
        match self.local.get_value::<Option<MigrationSummary>>(LAST_MIGRATION_KEY) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("⚠️  Could not read last migration summary: {e}");
                None
            }
        }
    }

    /// Apply the hot-reloadable subset of the storage settings.
    pub async fn reload(&self, config: &StorageConfig) {
        self.router.set_fallback_enabled(config.enable_fallback);
        if let Some(engine) = &self.migration {
            engine.set_clear_local_after(config.clear_local_after_migration);
        }
        self.manager.apply_settings(ModeSettings::from_config(config)).await;
        info!("Storage settings reloaded");
    }
}

fn record_summary(local: &LocalStorage, summary: &MigrationSummary) {
    if let Err(e) = local.set_value(LAST_MIGRATION_KEY, &Some(summary)) {
        warn!("⚠️  Could not persist migration summary: {e}");
    }
}

/// Run queued migrations one at a time. Requests queued during a run collapse into one.
fn spawn_migration_worker(
    engine: Arc<MigrationEngine>,
    local: LocalStorage,
    mut requests: mpsc::UnboundedReceiver<MigrationRequest>,
    logger: Logger,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            while requests.try_recv().is_ok() {}

            info!("Starting queued migration ({})", request.trigger);
            match engine.migrate(None, None).await {
                Ok(summary) => {
                    logger.log(format!(
                        "Queued migration after {}: {}/{} records, {} errors",
                        request.trigger,
                        summary.migrated_records,
                        summary.total_records,
                        summary.errors.len()
                    ));
                    record_summary(&local, &summary);
                }
                Err(MigrationError::AlreadyRunning) => {
                    debug!("Migration already running, queued request dropped");
                }
                Err(e) => {
                    error!("❌ Queued migration failed: {e}");
                    logger.log(format!("Queued migration failed: {e}"));
                }
            }
        }
    })
}
