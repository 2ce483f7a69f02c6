//! Entity read/write API used by the rest of the application.
//!
//! Each store wires one entity type's remote and local operations through the
//! operation router. Callers never pick a backend themselves.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use super::router::{OperationRouter, ServedBy};
use crate::backend::RemoteStore;
use crate::error::{RemoteError, StoreError};
use crate::records::{EntityType, Record};
use crate::storage::LocalStorage;

#[derive(Clone)]
pub struct EntityStore {
    entity_type: EntityType,
    router: Arc<OperationRouter>,
    local: LocalStorage,
    remote: Option<Arc<dyn RemoteStore>>,
}

fn no_remote() -> RemoteError {
    RemoteError::Transport("no remote store configured".to_string())
}

impl EntityStore {
    pub fn new(
        entity_type: EntityType,
        router: Arc<OperationRouter>,
        local: LocalStorage,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Self {
        Self {
            entity_type,
            router,
            local,
            remote,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Read a record. A record missing on the serving backend is `Ok(None)`.
    pub async fn read(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let entity_type = self.entity_type;
        let operation = format!("read {entity_type}");
        let remote = self.remote.clone();
        self.router
            .execute(
                &operation,
                move || async move {
                    let remote = remote.ok_or_else(no_remote)?;
                    match remote.fetch(entity_type, id).await {
                        Ok(record) => Ok(Some(record)),
                        Err(RemoteError::NotFound(_)) => Ok(None),
                        Err(e) => Err(e),
                    }
                },
                || self.local.get(entity_type, id),
            )
            .await
    }

    pub async fn list(&self) -> Result<Vec<Record>, StoreError> {
        let entity_type = self.entity_type;
        let operation = format!("list {entity_type}");
        let remote = self.remote.clone();
        self.router
            .execute(
                &operation,
                move || async move {
                    let remote = remote.ok_or_else(no_remote)?;
                    remote.list(entity_type).await
                },
                || self.local.list(entity_type),
            )
            .await
    }

    /// Create or replace a record, stamping `updated_at`. Returns the stored record.
    ///
    /// Records without an id or with a non-object payload are rejected before either
    /// backend sees them. A write served by the local cache is flagged for migration.
    pub async fn write(&self, mut record: Record) -> Result<Record, StoreError> {
        let entity_type = self.entity_type;
        record
            .validate()
            .map_err(|e| StoreError::Payload(format!("invalid {entity_type}: {e}")))?;
        record.entity_type = entity_type;
        record.touch();

        let operation = format!("write {entity_type} '{}'", record.id);
        let local_copy = record.clone();
        let remote = self.remote.clone();
        let routed = self
            .router
            .execute_routed(
                &operation,
                move || async move {
                    let remote = remote.ok_or_else(no_remote)?;
                    remote.upsert(entity_type, record).await
                },
                || self.local.put(entity_type, local_copy),
            )
            .await?;

        if routed.served_by == ServedBy::Local {
            self.router.manager().mark_local_changes();
        }
        Ok(routed.value)
    }

    /// Delete a record. Returns whether it existed on the serving backend.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let entity_type = self.entity_type;
        let operation = format!("delete {entity_type} '{id}'");
        let remote = self.remote.clone();
        self.router
            .execute(
                &operation,
                move || async move {
                    let remote = remote.ok_or_else(no_remote)?;
                    match remote.delete(entity_type, id).await {
                        Ok(()) => Ok(true),
                        Err(RemoteError::NotFound(_)) => Ok(false),
                        Err(e) => Err(e),
                    }
                },
                || self.local.delete(entity_type, id),
            )
            .await
    }

    /// Read and decode a typed payload.
    pub async fn read_as<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, StoreError> {
        let Some(record) = self.read(id).await? else {
            return Ok(None);
        };
        record
            .decode()
            .map(Some)
            .map_err(|e| StoreError::Payload(format!("undecodable {} '{id}': {e}", self.entity_type)))
    }

    /// Encode and write a typed payload under `id`.
    pub async fn write_as<T: Serialize>(&self, id: &str, payload: &T) -> Result<Record, StoreError> {
        let record = Record::from_payload(id, self.entity_type, payload)
            .map_err(|e| StoreError::Payload(format!("unencodable {} '{id}': {e}", self.entity_type)))?;
        self.write(record).await
    }
}
