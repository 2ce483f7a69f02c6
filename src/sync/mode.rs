//! Mode manager: owns the storage mode state machine.
//!
//! The current mode lives in a `watch` channel so that readers always see the last
//! settled mode without waiting on an in-flight transition. Transitions themselves are
//! serialized by an async mutex, and reconnect requests that arrive while a reconnect
//! loop is already running are coalesced into it.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};

use super::prober::{AvailabilityProber, AvailabilityStatus};
use super::retry::RetryPolicy;
use crate::config::StorageConfig;
use crate::error::RemoteError;
use crate::logger::Logger;

/// Which backend serves operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Remote store first, local cache as per-operation fallback.
    Remote,
    /// Local cache only.
    Local,
    /// Remote store first with silent per-operation fallback, never switching fully.
    Hybrid,
}

impl StorageMode {
    /// Whether operations try the remote store first.
    pub fn prefers_remote(&self) -> bool {
        !matches!(self, StorageMode::Local)
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Remote => write!(f, "remote"),
            StorageMode::Local => write!(f, "local"),
            StorageMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Host-level network transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// What started a Local -> Remote attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectTrigger {
    ConnectivityRestored,
    Manual,
    Automatic,
    /// A remote call succeeded after writes fell back to the local cache.
    RemoteRecovered,
}

impl fmt::Display for ReconnectTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectTrigger::ConnectivityRestored => write!(f, "connectivity restored"),
            ReconnectTrigger::Manual => write!(f, "manual retry"),
            ReconnectTrigger::Automatic => write!(f, "automatic retry"),
            ReconnectTrigger::RemoteRecovered => write!(f, "remote recovered"),
        }
    }
}

/// Result of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Switched(StorageMode),
    Unchanged(StorageMode),
    /// A reconnect loop was already running; this request joined it.
    Coalesced,
    /// Automatic retries stopped until a manual retry or a connectivity-restored signal.
    RetriesExhausted,
}

/// Request for a migration pass, sent after a successful Local -> Remote switch or once
/// the remote store answers again after writes fell back to the local cache.
#[derive(Debug, Clone)]
pub struct MigrationRequest {
    pub requested_at: DateTime<Utc>,
    pub trigger: ReconnectTrigger,
}

/// Diagnostics snapshot of the mode manager.
#[derive(Debug, Clone, Serialize)]
pub struct ModeStatus {
    pub current_mode: StorageMode,
    pub forced_mode: Option<StorageMode>,
    pub last_switch: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub is_online: bool,
    pub retry_attempts: u32,
    pub retries_exhausted: bool,
    /// Writes served by the local cache that no migration has picked up yet.
    pub local_changes_pending: bool,
    pub availability: AvailabilityStatus,
}

impl ModeStatus {
    /// Running on the local cache although the remote store was wanted.
    pub fn is_degraded(&self) -> bool {
        self.current_mode == StorageMode::Local && self.forced_mode != Some(StorageMode::Local)
    }
}

/// Hot-reloadable mode manager settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSettings {
    pub forced: Option<StorageMode>,
    pub failure_threshold: u32,
    pub offline_sync_enabled: bool,
    pub probe_ttl: Duration,
    pub retry: RetryPolicy,
}

impl ModeSettings {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            forced: config.storage_mode.forced(),
            failure_threshold: config.failure_threshold.max(1),
            offline_sync_enabled: config.offline_sync_enabled,
            probe_ttl: config.probe_cache_ttl(),
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

/// Resets the reconnecting flag even if the reconnect future is dropped.
struct ReconnectGuard<'a>(&'a AtomicBool);

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sole owner of the storage mode and the availability status.
pub struct ModeManager {
    prober: AvailabilityProber,
    mode_tx: watch::Sender<StorageMode>,
    settings: RwLock<ModeSettings>,
    transition: Mutex<()>,
    consecutive_failures: AtomicU32,
    retry_attempts: AtomicU32,
    is_online: AtomicBool,
    offline: Notify,
    reconnecting: AtomicBool,
    local_changes: AtomicBool,
    last_switch: RwLock<Option<DateTime<Utc>>>,
    migration_tx: Option<mpsc::UnboundedSender<MigrationRequest>>,
    logger: Logger,
}

impl ModeManager {
    /// Resolve the initial mode and build the manager.
    ///
    /// A forced mode wins; without a configured remote store the manager starts in
    /// `Local` without probing; otherwise one probe decides between `Remote` and `Local`.
    pub async fn start(
        prober: AvailabilityProber,
        settings: ModeSettings,
        logger: Logger,
        migration_tx: Option<mpsc::UnboundedSender<MigrationRequest>>,
    ) -> Self {
        prober.set_ttl(settings.probe_ttl);

        let initial = if let Some(forced) = settings.forced {
            info!("Storage mode forced to {forced} by configuration");
            forced
        } else if !prober.has_remote() {
            info!("No remote credentials configured, starting in local mode");
            StorageMode::Local
        } else if prober.probe().await {
            info!("✅ Remote store reachable, starting in remote mode");
            StorageMode::Remote
        } else {
            warn!("⚠️  Remote store unreachable, starting in local mode");
            logger.log("Remote store unreachable at startup, using local cache".to_string());
            StorageMode::Local
        };

        let (mode_tx, _) = watch::channel(initial);

        Self {
            prober,
            mode_tx,
            settings: RwLock::new(settings),
            transition: Mutex::new(()),
            consecutive_failures: AtomicU32::new(0),
            retry_attempts: AtomicU32::new(0),
            is_online: AtomicBool::new(true),
            offline: Notify::new(),
            reconnecting: AtomicBool::new(false),
            local_changes: AtomicBool::new(false),
            last_switch: RwLock::new(None),
            migration_tx,
            logger,
        }
    }

    /// The last settled mode. Never waits on an in-flight transition.
    pub fn current_mode(&self) -> StorageMode {
        *self.mode_tx.borrow()
    }

    /// Observe mode changes.
    pub fn subscribe(&self) -> watch::Receiver<StorageMode> {
        self.mode_tx.subscribe()
    }

    pub fn prober(&self) -> &AvailabilityProber {
        &self.prober
    }

    pub fn settings(&self) -> ModeSettings {
        match self.settings.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn forced_mode(&self) -> Option<StorageMode> {
        self.settings().forced
    }

    pub fn is_online(&self) -> bool {
        self.is_online.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts.load(Ordering::SeqCst)
    }

    pub fn last_switch(&self) -> Option<DateTime<Utc>> {
        self.last_switch.read().map(|last| *last).unwrap_or(None)
    }

    pub fn status(&self) -> ModeStatus {
        let settings = self.settings();
        let retry_attempts = self.retry_attempts();
        ModeStatus {
            current_mode: self.current_mode(),
            forced_mode: settings.forced,
            last_switch: self.last_switch(),
            consecutive_failures: self.consecutive_failures(),
            is_online: self.is_online(),
            retry_attempts,
            retries_exhausted: settings.retry.is_exhausted(retry_attempts),
            local_changes_pending: self.has_local_changes(),
            availability: self.prober.status(),
        }
    }

    /// Publish a new mode. Callers hold the transition lock.
    fn set_mode(&self, mode: StorageMode, reason: &str) -> bool {
        let previous = self.current_mode();
        if previous == mode {
            return false;
        }

        self.mode_tx.send_replace(mode);
        if let Ok(mut last) = self.last_switch.write() {
            *last = Some(Utc::now());
        }

        info!("Storage mode {previous} -> {mode} ({reason})");
        self.logger.log(format!("Storage mode {previous} -> {mode}: {reason}"));
        true
    }

    pub fn has_local_changes(&self) -> bool {
        self.local_changes.load(Ordering::SeqCst)
    }

    /// A write was served by the local cache instead of the remote store.
    pub fn mark_local_changes(&self) {
        self.local_changes.store(true, Ordering::SeqCst);
    }

    /// A remote operation succeeded.
    ///
    /// With offline sync enabled, the first success after writes fell back to the local
    /// cache queues a migration so those writes reach the remote store.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);

        if self.has_local_changes()
            && self.settings().offline_sync_enabled
            && self.local_changes.swap(false, Ordering::SeqCst)
        {
            self.request_migration(ReconnectTrigger::RemoteRecovered);
        }
    }

    /// A remote operation failed. Returns whether this failure switched the mode to `Local`.
    ///
    /// Only transport and server failures count. Reaching the failure threshold in
    /// `Remote` mode switches to `Local`; a forced mode or `Hybrid` absorbs failures
    /// without switching.
    pub async fn record_failure(&self, error: &RemoteError) -> bool {
        if !error.is_transient() {
            return false;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        self.prober.invalidate();

        let settings = self.settings();
        if settings.forced.is_some() || self.current_mode() != StorageMode::Remote {
            return false;
        }
        if failures < settings.failure_threshold {
            debug!("Remote failure {failures}/{}: {error}", settings.failure_threshold);
            return false;
        }

        warn!("⚠️  {failures} consecutive remote failures, switching to local cache");
        self.switch_to_local(&format!("{failures} consecutive remote failures")).await
    }

    /// Enter `Local`. Always succeeds; returns whether the mode changed.
    pub async fn switch_to_local(&self, reason: &str) -> bool {
        let _transition = self.transition.lock().await;
        self.set_mode(StorageMode::Local, reason)
    }

    /// Apply a connectivity transition.
    pub async fn handle_connectivity(&self, event: ConnectivityEvent) -> TransitionOutcome {
        match event {
            ConnectivityEvent::Offline => {
                self.is_online.store(false, Ordering::SeqCst);
                self.offline.notify_waiters();
                self.prober.invalidate();

                if self.forced_mode().is_none()
                    && self.current_mode() == StorageMode::Remote
                    && self.switch_to_local("connectivity lost").await
                {
                    return TransitionOutcome::Switched(StorageMode::Local);
                }
                TransitionOutcome::Unchanged(self.current_mode())
            }
            ConnectivityEvent::Online => {
                self.mark_online();
                self.reconnect_after_online().await
            }
        }
    }

    /// Record that the host is online again. Resets the automatic retry budget.
    pub fn mark_online(&self) {
        self.is_online.store(true, Ordering::SeqCst);
        self.prober.invalidate();
        self.retry_attempts.store(0, Ordering::SeqCst);
    }

    /// Reconnect loop for a connectivity-restored signal already recorded by `mark_online`.
    ///
    /// Stops as soon as the host goes offline again.
    pub async fn reconnect_after_online(&self) -> TransitionOutcome {
        self.reconnect(ReconnectTrigger::ConnectivityRestored).await
    }

    /// Operator-requested reconnect. Resets the retry counter.
    pub async fn retry_now(&self) -> TransitionOutcome {
        self.retry_attempts.store(0, Ordering::SeqCst);
        self.prober.invalidate();
        self.reconnect(ReconnectTrigger::Manual).await
    }

    /// Periodic reconnect attempt. Does nothing once automatic retries are exhausted.
    pub async fn auto_retry(&self) -> TransitionOutcome {
        let mode = self.current_mode();
        if mode != StorageMode::Local || self.forced_mode().is_some() || !self.prober.has_remote() {
            return TransitionOutcome::Unchanged(mode);
        }
        if self.settings().retry.is_exhausted(self.retry_attempts()) {
            return TransitionOutcome::RetriesExhausted;
        }
        self.reconnect(ReconnectTrigger::Automatic).await
    }

    async fn reconnect(&self, trigger: ReconnectTrigger) -> TransitionOutcome {
        let mode = self.current_mode();
        if mode != StorageMode::Local || self.forced_mode().is_some() {
            return TransitionOutcome::Unchanged(mode);
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already in progress, coalescing {trigger}");
            return TransitionOutcome::Coalesced;
        }
        let _guard = ReconnectGuard(&self.reconnecting);

        // A manual retry gets one attempt even while offline
        if trigger != ReconnectTrigger::Manual && !self.is_online() {
            debug!("Offline, skipping {trigger}");
            return TransitionOutcome::Unchanged(mode);
        }

        loop {
            if self.try_switch_to_remote(trigger).await {
                return TransitionOutcome::Switched(StorageMode::Remote);
            }

            let mode = self.current_mode();
            if mode != StorageMode::Local {
                return TransitionOutcome::Unchanged(mode);
            }

            let failed = self.retry_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let policy = self.settings().retry;
            if policy.is_exhausted(failed) {
                warn!("⚠️  Remote store still unavailable after {failed} attempts, automatic retries stopped");
                self.logger
                    .log(format!("Reconnect gave up after {failed} attempts ({trigger})"));
                return TransitionOutcome::RetriesExhausted;
            }
            if !self.is_online() {
                debug!("Offline, waiting for a connectivity signal before retrying");
                return TransitionOutcome::Unchanged(mode);
            }

            let delay = policy.delay_for(failed);
            debug!("Reconnect attempt {failed} failed, retrying in {delay:?}");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.offline.notified() => {}
            }
            if !self.is_online() {
                debug!("Connectivity lost, reconnect loop stopped");
                return TransitionOutcome::Unchanged(self.current_mode());
            }
            self.prober.invalidate();
        }
    }

    /// Probe under the transition lock and enter `Remote` when available.
    async fn try_switch_to_remote(&self, trigger: ReconnectTrigger) -> bool {
        let _transition = self.transition.lock().await;

        if self.current_mode() != StorageMode::Local || self.forced_mode().is_some() {
            return false;
        }
        if !self.prober.probe().await {
            return false;
        }

        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.retry_attempts.store(0, Ordering::SeqCst);
        self.set_mode(StorageMode::Remote, &trigger.to_string());

        if self.settings().offline_sync_enabled {
            self.local_changes.store(false, Ordering::SeqCst);
            self.request_migration(trigger);
        }
        true
    }

    fn request_migration(&self, trigger: ReconnectTrigger) {
        let Some(tx) = &self.migration_tx else {
            return;
        };
        let request = MigrationRequest {
            requested_at: Utc::now(),
            trigger,
        };
        if tx.send(request).is_ok() {
            info!("Queued migration of offline changes ({trigger})");
        } else {
            warn!("⚠️  Migration queue closed, offline changes were not queued");
        }
    }

    /// Apply reloaded settings. A changed forced mode takes effect immediately.
    pub async fn apply_settings(&self, settings: ModeSettings) {
        let previous_forced = self.forced_mode();
        self.prober.set_ttl(settings.probe_ttl);
        let forced = settings.forced;

        match self.settings.write() {
            Ok(mut current) => *current = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }

        if forced == previous_forced {
            return;
        }
        match forced {
            Some(mode) => {
                let _transition = self.transition.lock().await;
                self.set_mode(mode, "storage mode forced by configuration");
            }
            None => info!("Automatic storage mode selection resumed in {} mode", self.current_mode()),
        }
    }
}
