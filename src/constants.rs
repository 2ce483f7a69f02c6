//! Constants used throughout the storage layer
//!
//! This module centralizes key names, defaults and configuration bounds.

// Local cache keys
pub const LOCAL_KEY_PREFIX: &str = "flowdesk_";
pub const LOCAL_VALUE_PREFIX: &str = "flowdesk_value_";
pub const LAST_MIGRATION_KEY: &str = "last_migration";

// Remote store
pub const DEFAULT_DATABASE_URL_ENV: &str = "FLOWDESK_DATABASE_URL";
pub const DEFAULT_OWNER_ID_ENV: &str = "FLOWDESK_OWNER_ID";

// Storage defaults
pub const DEFAULT_REMOTE_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_REMOTE_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_PROBE_CACHE_TTL_MS: u64 = 5_000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

// Configuration bounds
pub const MAX_REMOTE_RETRY_ATTEMPTS: u32 = 10;
pub const MIN_REMOTE_CONNECT_TIMEOUT_MS: u64 = 1_000;
pub const MIN_SYNC_INTERVAL_MS: u64 = 5_000;

// Files
pub const APP_DIR_NAME: &str = "flowdesk";
pub const LOCAL_CONFIG_FILE: &str = "flowdesk.toml";
pub const LOG_FILE_NAME: &str = "flowdesk.log";
pub const CONFIG_GENERATED: &str = "✅ Generated default configuration";

// Diagnostics
pub const MAX_IN_MEMORY_LOG_LINES: usize = 500;
