//! Flowdesk - dual-mode storage layer for the Flowdesk productivity app
//!
//! This library keeps the app usable without a network: every entity operation is
//! routed to a remote relational store when it is reachable and to a local cache
//! when it is not, and offline changes are migrated back once connectivity returns.
//!
//! # Modules
//!
//! The library is organized into several key modules:
//!
//! * [`config`] - Application configuration management
//! * [`storage`] - Local cache store
//! * [`backend`] - Remote store abstraction and its SeaORM implementation
//! * [`sync`] - Mode manager, operation router, migration engine and the service wiring them
//! * [`records`] - Backend-agnostic record model
//! * [`error`] - Error kinds shared by every layer

/// Remote store abstraction and implementations
pub mod backend;

/// Configuration module for managing application settings
pub mod config;

/// Application constants and default values
pub mod constants;

/// SeaORM entity models for the remote database
pub mod entities;

/// Error kinds for the remote store, the local cache and routed operations
pub mod error;

/// Logging setup and the in-memory degradation log
pub mod logger;

/// Backend-agnostic record model
pub mod records;

/// Repository layer for remote database operations
pub mod repositories;

/// Local cache store
pub mod storage;

/// Storage mode management, routing and migration
pub mod sync;

// Re-export the types most callers need
pub use error::{LocalError, RemoteError, StoreError};
pub use records::{EntityType, Record};
pub use sync::{StorageMode, SyncService};
