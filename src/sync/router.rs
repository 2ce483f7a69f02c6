//! Operation router with sequential fallback.
//!
//! Every entity operation is a pair of closures: an async remote call and a
//! synchronous local call. The router picks one based on the current mode and, in
//! remote-preferring modes, runs the local call only after the remote call has
//! definitively failed with a transient error.

use log::{debug, error, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::mode::{ModeManager, StorageMode};
use crate::error::{LocalError, RemoteError, StoreError};
use crate::logger::Logger;

/// Backend that produced a routed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedBy {
    Remote,
    Local,
}

/// A routed result plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed<T> {
    pub value: T,
    pub served_by: ServedBy,
    /// The remote call failed and the local cache answered instead.
    pub fell_back: bool,
}

impl<T> Routed<T> {
    fn remote(value: T) -> Self {
        Self {
            value,
            served_by: ServedBy::Remote,
            fell_back: false,
        }
    }

    fn local(value: T, fell_back: bool) -> Self {
        Self {
            value,
            served_by: ServedBy::Local,
            fell_back,
        }
    }
}

pub struct OperationRouter {
    manager: Arc<ModeManager>,
    fallback_enabled: AtomicBool,
    remote_timeout: Duration,
    logger: Logger,
}

impl OperationRouter {
    pub fn new(manager: Arc<ModeManager>, fallback_enabled: bool, remote_timeout: Duration, logger: Logger) -> Self {
        Self {
            manager,
            fallback_enabled: AtomicBool::new(fallback_enabled),
            remote_timeout,
            logger,
        }
    }

    pub fn manager(&self) -> &Arc<ModeManager> {
        &self.manager
    }

    pub fn fallback_enabled(&self) -> bool {
        self.fallback_enabled.load(Ordering::SeqCst)
    }

    pub fn set_fallback_enabled(&self, enabled: bool) {
        self.fallback_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Run `operation` against the backend selected by the current mode.
    ///
    /// # Arguments
    /// * `operation` - Name used in logs
    /// * `remote_fn` - Remote call, only awaited in `Remote` and `Hybrid` modes
    /// * `local_fn` - Local call, run in `Local` mode or after a transient remote failure
    ///
    /// # Errors
    /// * `StoreError::Remote` for non-transient remote failures, or transient ones with fallback disabled
    /// * `StoreError::Local` when the local cache fails in `Local` mode
    /// * `StoreError::BothUnavailable` when the remote call and its fallback both fail
    pub async fn execute<T, RF, RFut, LF>(&self, operation: &str, remote_fn: RF, local_fn: LF) -> Result<T, StoreError>
    where
        RF: FnOnce() -> RFut,
        RFut: Future<Output = Result<T, RemoteError>>,
        LF: FnOnce() -> Result<T, LocalError>,
    {
        self.execute_routed(operation, remote_fn, local_fn)
            .await
            .map(|routed| routed.value)
    }

    /// Same as [`OperationRouter::execute`], also reporting which backend answered.
    pub async fn execute_routed<T, RF, RFut, LF>(
        &self,
        operation: &str,
        remote_fn: RF,
        local_fn: LF,
    ) -> Result<Routed<T>, StoreError>
    where
        RF: FnOnce() -> RFut,
        RFut: Future<Output = Result<T, RemoteError>>,
        LF: FnOnce() -> Result<T, LocalError>,
    {
        let mode = self.manager.current_mode();

        if mode == StorageMode::Local {
            return match local_fn() {
                Ok(value) => Ok(Routed::local(value, false)),
                Err(e) => {
                    error!("❌ {operation} failed on local cache: {e}");
                    self.logger.log(format!("{operation} failed on local cache: {e}"));
                    Err(StoreError::Local(e))
                }
            };
        }

        let remote_err = match self.call_remote(remote_fn).await {
            Ok(value) => {
                self.manager.record_success();
                return Ok(Routed::remote(value));
            }
            Err(e) => e,
        };

        if !remote_err.triggers_fallback() {
            debug!("{operation} rejected by remote store: {remote_err}");
            return Err(StoreError::Remote(remote_err));
        }

        self.manager.record_failure(&remote_err).await;

        if !self.fallback_enabled() {
            warn!("⚠️  {operation} failed on remote store, fallback disabled: {remote_err}");
            self.logger
                .log(format!("{operation} failed on remote store (no fallback): {remote_err}"));
            return Err(StoreError::Remote(remote_err));
        }

        warn!("⚠️  {operation} failed on remote store, using local cache: {remote_err}");
        self.logger
            .log(format!("{operation} fell back to local cache ({mode} mode): {remote_err}"));

        match local_fn() {
            Ok(value) => Ok(Routed::local(value, true)),
            Err(local_err) => {
                error!("❌ {operation} failed on both backends: remote {remote_err}; local {local_err}");
                self.logger
                    .log(format!("{operation} failed on both backends: {local_err}"));
                Err(StoreError::BothUnavailable {
                    remote: remote_err,
                    local: local_err,
                })
            }
        }
    }

    /// Await the remote call under the remote timeout.
    async fn call_remote<T, RF, RFut>(&self, remote_fn: RF) -> Result<T, RemoteError>
    where
        RF: FnOnce() -> RFut,
        RFut: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.remote_timeout, remote_fn()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transport(format!(
                "remote call timed out after {:?}",
                self.remote_timeout
            ))),
        }
    }
}
