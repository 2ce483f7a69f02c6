//! Owner identity resolution for remote calls.

use std::sync::RwLock;

/// Supplies the logical owner of remote records.
pub trait IdentityProvider: Send + Sync {
    /// The current owner id, or `None` when nobody is signed in.
    fn current_owner(&self) -> Option<String>;
}

/// Identity held in memory. Sign-in flows set it; sign-out clears it.
#[derive(Default)]
pub struct StaticIdentity {
    owner: RwLock<Option<String>>,
}

impl StaticIdentity {
    pub fn new(owner: Option<String>) -> Self {
        Self {
            owner: RwLock::new(owner),
        }
    }

    pub fn set_owner(&self, owner: Option<String>) {
        if let Ok(mut current) = self.owner.write() {
            *current = owner;
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_owner(&self) -> Option<String> {
        self.owner.read().ok().and_then(|owner| owner.clone())
    }
}
