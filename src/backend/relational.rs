//! Relational remote store backed by SeaORM.
//!
//! Postgres in production; any SeaORM-supported database works, SQLite is used in
//! tests. Every call is bounded by the configured timeout and every `DbErr` is
//! classified into a [`RemoteError`] here.

use async_trait::async_trait;
use log::{debug, info};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{IdentityProvider, RemoteStore};
use crate::entities::remote_record;
use crate::error::RemoteError;
use crate::records::{EntityType, Record};
use crate::repositories::RemoteRecordRepository;

/// Remote store over a SeaORM connection.
pub struct RelationalRemote {
    conn: DatabaseConnection,
    identity: Arc<dyn IdentityProvider>,
    timeout: Duration,
    backend_type: String,
    schema_ready: OnceCell<()>,
}

impl RelationalRemote {
    /// Create a lazily connected remote store for `database_url`.
    ///
    /// No round trip happens here; the pool connects on first use, so a store created
    /// while offline becomes usable once the network returns.
    pub async fn connect(
        database_url: &str,
        identity: Arc<dyn IdentityProvider>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options
            .connect_timeout(timeout)
            .acquire_timeout(timeout)
            .connect_lazy(true)
            .sqlx_logging(false);

        let conn = Database::connect(options).await.map_err(classify_db_error)?;
        Ok(Self::from_connection(conn, identity, timeout))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: DatabaseConnection, identity: Arc<dyn IdentityProvider>, timeout: Duration) -> Self {
        let backend_type = match conn.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => "postgres",
            sea_orm::DatabaseBackend::MySql => "mysql",
            sea_orm::DatabaseBackend::Sqlite => "sqlite",
        }
        .to_string();

        Self {
            conn,
            identity,
            timeout,
            backend_type,
            schema_ready: OnceCell::new(),
        }
    }

    /// Create the records table on first successful contact.
    async fn ensure_schema(&self) -> Result<(), RemoteError> {
        self.schema_ready
            .get_or_try_init(|| async {
                self.bounded("ensure schema", RemoteRecordRepository::ensure_schema(&self.conn))
                    .await?;
                info!("✅ Remote store ready ({})", self.backend_type);
                Ok::<(), RemoteError>(())
            })
            .await?;
        Ok(())
    }

    /// Resolve the owner or fail fast without touching the network.
    fn owner(&self) -> Result<String, RemoteError> {
        self.identity
            .current_owner()
            .ok_or_else(|| RemoteError::Unauthenticated("no owner identity available".to_string()))
    }

    /// Run a database future under the call timeout.
    async fn bounded<T, F>(&self, operation: &str, future: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, DbErr>>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result.map_err(classify_db_error),
            Err(_) => Err(RemoteError::Transport(format!(
                "{operation} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    fn to_record(model: remote_record::Model) -> Result<Record, RemoteError> {
        let entity_type = model
            .entity_type
            .parse::<EntityType>()
            .map_err(|e| RemoteError::Server(format!("corrupt remote row '{}': {e}", model.id)))?;

        Ok(Record {
            id: model.id,
            entity_type,
            owner_id: Some(model.owner_id),
            updated_at: model.updated_at,
            payload: model.payload,
        })
    }
}

/// Server-side normalization rules applied before a write.
fn validate_record(record: &Record) -> Result<(), RemoteError> {
    record.validate().map_err(RemoteError::Validation)
}

/// Map a SeaORM error onto the closed remote error set.
pub(crate) fn classify_db_error(err: DbErr) -> RemoteError {
    match err {
        DbErr::Conn(e) => RemoteError::Transport(e.to_string()),
        DbErr::ConnectionAcquire(e) => RemoteError::Transport(e.to_string()),
        DbErr::RecordNotFound(what) => RemoteError::NotFound(what),
        DbErr::RecordNotUpdated => RemoteError::NotFound("record not updated".to_string()),
        DbErr::Json(message) | DbErr::Type(message) => RemoteError::Validation(message),
        other => RemoteError::Server(other.to_string()),
    }
}

#[async_trait]
impl RemoteStore for RelationalRemote {
    fn backend_type(&self) -> &str {
        &self.backend_type
    }

    async fn fetch(&self, entity_type: EntityType, id: &str) -> Result<Record, RemoteError> {
        let owner = self.owner()?;
        self.ensure_schema().await?;
        let model = self
            .bounded(
                "fetch",
                RemoteRecordRepository::get(&self.conn, &owner, entity_type.as_str(), id),
            )
            .await?
            .ok_or_else(|| RemoteError::NotFound(format!("{entity_type} '{id}'")))?;
        Self::to_record(model)
    }

    async fn list(&self, entity_type: EntityType) -> Result<Vec<Record>, RemoteError> {
        let owner = self.owner()?;
        self.ensure_schema().await?;
        let models = self
            .bounded(
                "list",
                RemoteRecordRepository::get_all(&self.conn, &owner, entity_type.as_str()),
            )
            .await?;
        models.into_iter().map(Self::to_record).collect()
    }

    async fn upsert(&self, entity_type: EntityType, mut record: Record) -> Result<Record, RemoteError> {
        let owner = self.owner()?;
        validate_record(&record)?;
        self.ensure_schema().await?;

        record.entity_type = entity_type;
        record.owner_id = Some(owner.clone());

        let model = remote_record::Model {
            owner_id: owner,
            entity_type: entity_type.as_str().to_string(),
            id: record.id.clone(),
            payload: record.payload.clone(),
            updated_at: record.updated_at,
        };
        self.bounded("upsert", RemoteRecordRepository::upsert(&self.conn, model))
            .await?;
        debug!("Upserted remote {} '{}'", entity_type, record.id);
        Ok(record)
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError> {
        let owner = self.owner()?;
        self.ensure_schema().await?;
        let removed = self
            .bounded(
                "delete",
                RemoteRecordRepository::delete(&self.conn, &owner, entity_type.as_str(), id),
            )
            .await?;
        if removed {
            Ok(())
        } else {
            Err(RemoteError::NotFound(format!("{entity_type} '{id}'")))
        }
    }

    async fn count(&self, entity_type: EntityType) -> Result<u64, RemoteError> {
        let owner = self.owner()?;
        self.ensure_schema().await?;
        self.bounded(
            "count",
            RemoteRecordRepository::count(&self.conn, &owner, entity_type.as_str()),
        )
        .await
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        let owner = self.owner()?;
        self.ensure_schema().await?;
        self.bounded("probe", RemoteRecordRepository::probe(&self.conn, &owner))
            .await
    }
}
