//! Error taxonomy shared by the storage layer.
//!
//! Each backend reports a closed set of error kinds so that the router and the mode
//! manager decide control flow on the kind, never on message text.

use crate::records::EntityType;

/// Errors reported by the remote store client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("ValidationError: {0}")]
    Validation(String),

    #[error("TransportError: {0}")]
    Transport(String),

    #[error("ServerError: {0}")]
    Server(String),
}

impl RemoteError {
    /// Network or backend-side failures. These count toward the failure threshold.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transport(_) | RemoteError::Server(_))
    }

    /// Whether re-running the operation against the local cache can help.
    pub fn triggers_fallback(&self) -> bool {
        self.is_transient()
    }
}

/// Errors reported by the local cache store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocalError {
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Failed to serialize {entity_type} record: {message}")]
    Serialization { entity_type: EntityType, message: String },
}

/// Result error of a routed operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Local(#[from] LocalError),

    #[error("Both backends unavailable (remote: {remote}; local: {local})")]
    BothUnavailable { remote: RemoteError, local: LocalError },

    /// A payload could not be converted to or from its typed form.
    #[error("Payload error: {0}")]
    Payload(String),
}

impl StoreError {
    /// Errors that block the user: nothing could serve the operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::BothUnavailable { .. } | StoreError::Local(LocalError::StorageUnavailable(_))
        )
    }
}
