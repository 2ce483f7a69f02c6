//! Remote store abstraction.
//!
//! This module defines the interface every remote backend implements, plus the
//! owner identity seam. Implementations convert their native failures into the
//! closed [`RemoteError`] set before anything upstream sees them.

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::records::{EntityType, Record};

pub mod factory;
pub mod identity;
pub mod relational;

pub use identity::{IdentityProvider, StaticIdentity};
pub use relational::RelationalRemote;

/// Remote store trait that all remote backends must implement.
///
/// One CRUD set, parameterized by entity type. Every call resolves the owner
/// identity first and fails with [`RemoteError::Unauthenticated`] without a round
/// trip when none is available.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the backend type identifier (e.g., "postgres", "sqlite").
    fn backend_type(&self) -> &str;

    /// Fetch a single record.
    async fn fetch(&self, entity_type: EntityType, id: &str) -> Result<Record, RemoteError>;

    /// Fetch every record of an entity type for the current owner.
    async fn list(&self, entity_type: EntityType) -> Result<Vec<Record>, RemoteError>;

    /// Create or replace a record keyed by its id. Returns the normalized record.
    async fn upsert(&self, entity_type: EntityType, record: Record) -> Result<Record, RemoteError>;

    /// Delete a record.
    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError>;

    /// Number of stored records of an entity type for the current owner.
    async fn count(&self, entity_type: EntityType) -> Result<u64, RemoteError>;

    /// Cheapest available round trip, used for availability probing.
    async fn probe(&self) -> Result<(), RemoteError>;
}
