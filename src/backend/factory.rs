//! Remote store factory: builds the remote backend from configuration.

use log::info;
use std::sync::Arc;

use super::{IdentityProvider, RelationalRemote, RemoteStore, StaticIdentity};
use crate::config::Config;
use crate::error::RemoteError;

/// Identity provider seeded from the configured owner environment variable.
pub fn identity_from_config(config: &Config) -> Arc<StaticIdentity> {
    Arc::new(StaticIdentity::new(config.remote.owner_id()))
}

/// Create the remote store from configuration.
///
/// Returns `Ok(None)` when no database URL is configured, which selects local-only
/// operation. The store connects lazily, so an unreachable database is not an error
/// here; the availability prober discovers it.
///
/// # Errors
/// Returns an error if the configured URL cannot be turned into a connection pool
/// (unsupported scheme, malformed URL).
pub async fn connect_remote(
    config: &Config,
    identity: Arc<dyn IdentityProvider>,
) -> Result<Option<Arc<dyn RemoteStore>>, RemoteError> {
    let Some(database_url) = config.remote.database_url() else {
        info!(
            "No remote database configured ({} unset), running on local cache",
            config.remote.database_url_env
        );
        return Ok(None);
    };

    let remote = RelationalRemote::connect(&database_url, identity, config.storage.remote_timeout()).await?;
    Ok(Some(Arc::new(remote)))
}
