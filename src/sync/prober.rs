//! Availability prober for the remote store.
//!
//! A probe is the cheapest remote read available. Results are cached for a bounded
//! interval so a burst of operations triggers at most one network check; concurrent
//! callers queue behind the in-flight probe and reuse its result.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::backend::RemoteStore;
use crate::error::RemoteError;

/// Last known availability of the remote store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityStatus {
    pub available: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

struct ProbeCache {
    checked_at: Option<Instant>,
    available: bool,
}

/// Probes the remote store and caches the answer.
pub struct AvailabilityProber {
    remote: Option<Arc<dyn RemoteStore>>,
    ttl: RwLock<Duration>,
    timeout: Duration,
    cache: Mutex<ProbeCache>,
    snapshot: RwLock<AvailabilityStatus>,
    invalidated: AtomicBool,
    network_checks: AtomicU64,
}

impl AvailabilityProber {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            remote,
            ttl: RwLock::new(ttl),
            timeout,
            cache: Mutex::new(ProbeCache {
                checked_at: None,
                available: false,
            }),
            snapshot: RwLock::new(AvailabilityStatus::default()),
            invalidated: AtomicBool::new(false),
            network_checks: AtomicU64::new(0),
        }
    }

    /// Whether a remote store is configured at all.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.read().map(|ttl| *ttl).unwrap_or_default()
    }

    pub fn set_ttl(&self, ttl: Duration) {
        if let Ok(mut current) = self.ttl.write() {
            *current = ttl;
        }
    }

    /// Is the remote store reachable and usable?
    pub async fn probe(&self) -> bool {
        let mut cache = self.cache.lock().await;
        let forced = self.invalidated.swap(false, Ordering::SeqCst);

        if !forced {
            if let Some(checked_at) = cache.checked_at {
                if checked_at.elapsed() < self.ttl() {
                    return cache.available;
                }
            }
        }

        let available = match self.check().await {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️  Remote store unavailable: {e}");
                false
            }
        };

        cache.checked_at = Some(Instant::now());
        cache.available = available;

        if let Ok(mut snapshot) = self.snapshot.write() {
            snapshot.available = available;
            snapshot.last_checked = Some(Utc::now());
            snapshot.consecutive_failures = if available { 0 } else { snapshot.consecutive_failures + 1 };
        }

        available
    }

    /// One network round trip, bounded by the probe timeout.
    async fn check(&self) -> Result<(), RemoteError> {
        let Some(remote) = &self.remote else {
            return Err(RemoteError::Transport("no remote store configured".to_string()));
        };

        self.network_checks.fetch_add(1, Ordering::SeqCst);
        debug!("Probing remote store ({})", remote.backend_type());

        match tokio::time::timeout(self.timeout, remote.probe()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transport(format!("probe timed out after {:?}", self.timeout))),
        }
    }

    /// Force the next probe to bypass the cache.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    /// Last recorded availability. Never blocks on an in-flight probe.
    pub fn status(&self) -> AvailabilityStatus {
        self.snapshot.read().map(|status| status.clone()).unwrap_or_default()
    }

    /// Whether the last result is too old to be trusted.
    pub fn is_stale(&self) -> bool {
        if self.invalidated.load(Ordering::SeqCst) {
            return true;
        }
        match self.status().last_checked {
            Some(checked) => {
                let age = Utc::now().signed_duration_since(checked);
                age.to_std().map(|age| age >= self.ttl()).unwrap_or(false)
            }
            None => true,
        }
    }

    /// Number of network checks performed so far.
    pub fn network_checks(&self) -> u64 {
        self.network_checks.load(Ordering::SeqCst)
    }
}
