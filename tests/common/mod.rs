#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowdesk::backend::RemoteStore;
use flowdesk::config::StorageConfig;
use flowdesk::error::RemoteError;
use flowdesk::logger::Logger;
use flowdesk::records::{EntityType, Record};
use flowdesk::storage::LocalStorage;
use flowdesk::sync::SyncService;

pub const OWNER: &str = "owner-1";

/// In-memory remote store whose availability and failures are scripted by the test.
#[derive(Default)]
pub struct ScriptedRemote {
    records: Mutex<HashMap<(EntityType, String), Record>>,
    unavailable: AtomicBool,
    failure: Mutex<Option<RemoteError>>,
    rejected: Mutex<HashSet<String>>,
    attempted: Mutex<Vec<String>>,
    probes: AtomicUsize,
    calls: AtomicUsize,
    upsert_delay_ms: AtomicU64,
    probe_delay_ms: AtomicU64,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unreachable() -> Arc<Self> {
        let remote = Self::new();
        remote.set_available(false);
        remote
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make every data call (not probes) fail with `error`.
    pub fn fail_with(&self, error: Option<RemoteError>) {
        *self.failure.lock().unwrap() = error;
    }

    /// Reject upserts of this id with a validation error.
    pub fn reject(&self, id: &str) {
        self.rejected.lock().unwrap().insert(id.to_string());
    }

    /// Slow every upsert down so tests can observe a run in progress.
    pub fn set_upsert_delay(&self, delay: Duration) {
        self.upsert_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every probe take `delay` before answering.
    pub fn set_probe_delay(&self, delay: Duration) {
        self.probe_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Ids passed to `upsert`, in call order.
    pub fn attempted_ids(&self) -> Vec<String> {
        self.attempted.lock().unwrap().clone()
    }

    pub fn stored(&self, entity_type: EntityType) -> usize {
        self.records
            .lock()
            .unwrap()
            .keys()
            .filter(|(entity, _)| *entity == entity_type)
            .count()
    }

    pub fn contains(&self, entity_type: EntityType, id: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .contains_key(&(entity_type, id.to_string()))
    }

    fn check(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("network unreachable".to_string()));
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    fn backend_type(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, entity_type: EntityType, id: &str) -> Result<Record, RemoteError> {
        self.check()?;
        self.records
            .lock()
            .unwrap()
            .get(&(entity_type, id.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("{entity_type} '{id}'")))
    }

    async fn list(&self, entity_type: EntityType) -> Result<Vec<Record>, RemoteError> {
        self.check()?;
        let mut records: Vec<Record> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|record| record.entity_type == entity_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn upsert(&self, entity_type: EntityType, mut record: Record) -> Result<Record, RemoteError> {
        self.attempted.lock().unwrap().push(record.id.clone());
        let delay = self.upsert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check()?;
        if self.rejected.lock().unwrap().contains(&record.id) {
            return Err(RemoteError::Validation(format!("record '{}' rejected", record.id)));
        }
        record.entity_type = entity_type;
        record.owner_id = Some(OWNER.to_string());
        self.records
            .lock()
            .unwrap()
            .insert((entity_type, record.id.clone()), record.clone());
        Ok(record)
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError> {
        self.check()?;
        match self.records.lock().unwrap().remove(&(entity_type, id.to_string())) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(format!("{entity_type} '{id}'"))),
        }
    }

    async fn count(&self, entity_type: EntityType) -> Result<u64, RemoteError> {
        self.check()?;
        Ok(self.stored(entity_type) as u64)
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let delay = self.probe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RemoteError::Transport("network unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Storage settings with delays short enough for tests.
pub fn storage_config() -> StorageConfig {
    StorageConfig {
        retry_delay_ms: 1,
        probe_cache_ttl_ms: 60_000,
        remote_connect_timeout_ms: 1_000,
        offline_sync_enabled: false,
        ..StorageConfig::default()
    }
}

pub async fn service_with(remote: Option<Arc<ScriptedRemote>>, config: &StorageConfig) -> (SyncService, LocalStorage) {
    let local = LocalStorage::in_memory();
    let remote = remote.map(|remote| remote as Arc<dyn RemoteStore>);
    let service = SyncService::new(config, local.clone(), remote, Logger::new()).await;
    (service, local)
}
