//! Repository layer for database operations.
//!
//! Repositories encapsulate SeaORM queries so entities stay pure data models,
//! following the Data Mapper pattern recommended by SeaORM.

pub mod remote_record;

pub use remote_record::RemoteRecordRepository;
