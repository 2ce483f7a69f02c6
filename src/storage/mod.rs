//! Local cache store.
//!
//! Key-namespaced persistent storage for every entity type, usable without any
//! network. All operations are synchronous. Each entity type lives under its own key
//! (`flowdesk_task`, `flowdesk_session`, ...) as a JSON array of records.
//!
//! Unparseable stored data never surfaces as an error: the anomaly is logged and the
//! type's default value is returned. A medium that rejects a read or write yields
//! [`LocalError::StorageUnavailable`].

pub mod medium;

use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::constants::{LOCAL_KEY_PREFIX, LOCAL_VALUE_PREFIX};
use crate::error::LocalError;
use crate::records::{EntityType, Record};

pub use medium::{CacheMedium, FileMedium, MemoryMedium};

/// Every record of one entity type, as captured by [`LocalStorage::export_snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_type: EntityType,
    pub records: Vec<Record>,
}

/// Point-in-time copy of the whole local cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSnapshot {
    pub taken_at: DateTime<Utc>,
    pub entities: Vec<EntitySnapshot>,
}

impl LocalSnapshot {
    /// Number of records captured for `entity_type`.
    pub fn count(&self, entity_type: EntityType) -> usize {
        self.entities
            .iter()
            .find(|snapshot| snapshot.entity_type == entity_type)
            .map(|snapshot| snapshot.records.len())
            .unwrap_or(0)
    }

    pub fn total_records(&self) -> usize {
        self.entities.iter().map(|snapshot| snapshot.records.len()).sum()
    }
}

/// Local cache store over a [`CacheMedium`].
#[derive(Clone)]
pub struct LocalStorage {
    medium: Arc<dyn CacheMedium>,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Arc<Mutex<()>>,
}

impl LocalStorage {
    pub fn new(medium: Arc<dyn CacheMedium>) -> Self {
        Self {
            medium,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Local storage backed by an in-process map.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryMedium::new()))
    }

    /// Local storage persisted as JSON files under `dir`.
    pub fn open<P: AsRef<Path>>(dir: P, quota_bytes: Option<u64>) -> Result<Self, LocalError> {
        Ok(Self::new(Arc::new(FileMedium::open(dir, quota_bytes)?)))
    }

    fn entity_key(entity_type: EntityType) -> String {
        format!("{LOCAL_KEY_PREFIX}{}", entity_type.as_str())
    }

    fn value_key(name: &str) -> String {
        format!("{LOCAL_VALUE_PREFIX}{name}")
    }

    /// Load and decode `key`, falling back to `T::default()` on missing or corrupted data.
    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, LocalError> {
        let Some(raw) = self.medium.read(key)? else {
            return Ok(T::default());
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("⚠️  Corrupted local data under '{key}', using default value: {e}");
                Ok(T::default())
            }
        }
    }

    fn store<T: Serialize>(&self, key: &str, entity_type: EntityType, value: &T) -> Result<(), LocalError> {
        let raw = serde_json::to_string(value).map_err(|e| LocalError::Serialization {
            entity_type,
            message: e.to_string(),
        })?;
        self.medium.write(key, &raw)
    }

    fn lock_writes(&self) -> Result<std::sync::MutexGuard<'_, ()>, LocalError> {
        self.write_lock
            .lock()
            .map_err(|_| LocalError::StorageUnavailable("local write lock poisoned".to_string()))
    }

    /// Get a single record by id.
    pub fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Record>, LocalError> {
        Ok(self.list(entity_type)?.into_iter().find(|record| record.id == id))
    }

    /// List every record of an entity type.
    pub fn list(&self, entity_type: EntityType) -> Result<Vec<Record>, LocalError> {
        let records: Vec<Record> = self.load(&Self::entity_key(entity_type))?;
        Ok(records
            .into_iter()
            .filter(|record| record.entity_type == entity_type)
            .collect())
    }

    /// Insert or replace a record (keyed by id). Returns the stored record.
    pub fn put(&self, entity_type: EntityType, mut record: Record) -> Result<Record, LocalError> {
        record.entity_type = entity_type;

        let _guard = self.lock_writes()?;
        let key = Self::entity_key(entity_type);
        let mut records = self.list(entity_type)?;

        match records.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }

        self.store(&key, entity_type, &records)?;
        Ok(record)
    }

    /// Delete a record. Returns whether it existed.
    pub fn delete(&self, entity_type: EntityType, id: &str) -> Result<bool, LocalError> {
        let _guard = self.lock_writes()?;
        let key = Self::entity_key(entity_type);
        let mut records = self.list(entity_type)?;
        let before = records.len();
        records.retain(|record| record.id != id);

        if records.len() == before {
            return Ok(false);
        }
        self.store(&key, entity_type, &records)?;
        Ok(true)
    }

    pub fn count(&self, entity_type: EntityType) -> Result<usize, LocalError> {
        Ok(self.list(entity_type)?.len())
    }

    /// Remove every record of an entity type.
    pub fn clear(&self, entity_type: EntityType) -> Result<(), LocalError> {
        let _guard = self.lock_writes()?;
        self.medium.remove(&Self::entity_key(entity_type))
    }

    /// Read every record of every entity type.
    pub fn export_snapshot(&self) -> Result<LocalSnapshot, LocalError> {
        let mut entities = Vec::with_capacity(EntityType::ALL.len());
        for entity_type in EntityType::ALL {
            entities.push(EntitySnapshot {
                entity_type,
                records: self.list(entity_type)?,
            });
        }
        Ok(LocalSnapshot {
            taken_at: Utc::now(),
            entities,
        })
    }

    /// Read a typed auxiliary value (defaults when missing or corrupted).
    pub fn get_value<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, LocalError> {
        self.load(&Self::value_key(name))
    }

    /// Store a typed auxiliary value under the setting-set namespace.
    pub fn set_value<T: Serialize>(&self, name: &str, value: &T) -> Result<(), LocalError> {
        let _guard = self.lock_writes()?;
        self.store(&Self::value_key(name), EntityType::SettingSet, value)
    }
}
