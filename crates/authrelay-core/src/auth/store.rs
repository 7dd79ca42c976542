use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::backend::{CredentialBackend, MemoryBackend, StoredCredentials};
use super::claims;
use crate::api::Result;

/// Capacity of the change notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Notification sent to subscribers whenever the stored credentials change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialChange {
    TokenSet,
    ProfileSet,
    Cleared,
    /// The backing store was re-read and differed from the cached copy.
    Reloaded,
}

/// Holder of the current bearer token and cached profile.
///
/// Reads come from an in-memory copy; writes go through to the backing
/// store. Clone is cheap and every clone observes the same state.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Box<dyn CredentialBackend>,
    cached: RwLock<Option<StoredCredentials>>,
    changes: broadcast::Sender<CredentialChange>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("backend", &self.inner.backend)
            .field("has_token", &self.token().is_some())
            .finish()
    }
}

impl CredentialStore {
    /// Create a store over `backend`, loading whatever it already holds.
    /// An unreadable backend starts out empty.
    pub fn new(backend: impl CredentialBackend + 'static) -> Self {
        let cached = match backend.load() {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable stored credentials");
                None
            }
        };
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(StoreInner {
                backend: Box::new(backend),
                cached: RwLock::new(cached),
                changes,
            }),
        }
    }

    /// Store that lives only for this process.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<StoredCredentials>> {
        self.inner.cached.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<StoredCredentials>> {
        self.inner.cached.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn token(&self) -> Option<String> {
        self.read().as_ref().and_then(|c| c.token.clone())
    }

    pub fn profile(&self) -> Option<Value> {
        self.read().as_ref().and_then(|c| c.profile.clone())
    }

    /// Replace the bearer token, keeping the cached profile.
    pub fn set_token(&self, token: &str) -> Result<()> {
        self.update(CredentialChange::TokenSet, |creds| {
            creds.token = Some(token.to_string());
        })
    }

    pub fn set_profile(&self, profile: Value) -> Result<()> {
        self.update(CredentialChange::ProfileSet, |creds| {
            creds.profile = Some(profile);
        })
    }

    /// Replace token and profile together, as after a login.
    pub fn set_session(&self, token: &str, profile: Option<Value>) -> Result<()> {
        self.update(CredentialChange::TokenSet, |creds| {
            creds.token = Some(token.to_string());
            creds.profile = profile;
        })
    }

    fn update(
        &self,
        change: CredentialChange,
        apply: impl FnOnce(&mut StoredCredentials),
    ) -> Result<()> {
        let snapshot = {
            let mut cached = self.write();
            let creds = cached.get_or_insert_with(|| StoredCredentials {
                token: None,
                profile: None,
                updated_at: Utc::now(),
            });
            apply(creds);
            creds.updated_at = Utc::now();
            creds.clone()
        };

        let _ = self.inner.changes.send(change);
        self.inner.backend.save(&snapshot)
    }

    /// Remove token and cached profile.
    pub fn clear_all(&self) -> Result<()> {
        *self.write() = None;
        let _ = self.inner.changes.send(CredentialChange::Cleared);
        debug!("Credentials cleared");
        self.inner.backend.clear()
    }

    /// Re-read the backing store, picking up writes made by other processes
    /// sharing it. Returns true if anything changed.
    pub fn reload(&self) -> Result<bool> {
        let fresh = self.inner.backend.load()?;
        let changed = {
            let mut cached = self.write();
            if *cached == fresh {
                false
            } else {
                *cached = fresh;
                true
            }
        };
        if changed {
            let _ = self.inner.changes.send(CredentialChange::Reloaded);
        }
        Ok(changed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CredentialChange> {
        self.inner.changes.subscribe()
    }

    /// True if there is no token, its expiry cannot be decoded, or it
    /// expires within `buffer`.
    pub fn is_expired(&self, buffer: Duration) -> bool {
        claims::is_expired_at(self.token().as_deref(), buffer, Utc::now())
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        claims::time_until_expiry_at(self.token().as_deref(), Utc::now())
    }
}
