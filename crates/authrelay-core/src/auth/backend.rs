use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{ApiError, Result};

/// Credentials file name in the cache directory
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// What the backing store persists: the bearer token and the cached profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub token: Option<String>,
    #[serde(default)]
    pub profile: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

/// Backing storage for the credential store.
///
/// Implementations are synchronous; every operation is a small local read or
/// write.
pub trait CredentialBackend: Send + Sync + fmt::Debug {
    fn load(&self) -> Result<Option<StoredCredentials>>;
    fn save(&self, credentials: &StoredCredentials) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-lifetime storage. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    slot: Arc<Mutex<Option<StoredCredentials>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialBackend for MemoryBackend {
    fn load(&self) -> Result<Option<StoredCredentials>> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// Persistent storage as a JSON file, visible to every process using the
/// same path.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store `credentials.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialBackend for FileBackend {
    fn load(&self) -> Result<Option<StoredCredentials>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| ApiError::Storage(format!("Failed to read credentials file: {}", e)))?;
        let credentials = serde_json::from_str(&contents)
            .map_err(|e| ApiError::Storage(format!("Failed to parse credentials file: {}", e)))?;
        Ok(Some(credentials))
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ApiError::Storage(format!("Failed to create credentials directory: {}", e))
            })?;
        }
        let contents = serde_json::to_string_pretty(credentials)
            .map_err(|e| ApiError::Storage(format!("Failed to serialize credentials: {}", e)))?;
        std::fs::write(&self.path, contents)
            .map_err(|e| ApiError::Storage(format!("Failed to write credentials file: {}", e)))
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                ApiError::Storage(format!("Failed to delete credentials file: {}", e))
            })?;
        }
        Ok(())
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Persistent storage in the OS keychain; the JSON record is the secret.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
    account: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.account)
            .map_err(|e| ApiError::Storage(format!("Failed to create keyring entry: {}", e)))
    }
}

impl CredentialBackend for KeyringBackend {
    fn load(&self) -> Result<Option<StoredCredentials>> {
        let secret = match self.entry()?.get_password() {
            Ok(secret) => secret,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => {
                return Err(ApiError::Storage(format!(
                    "Failed to retrieve credentials from keychain: {}",
                    e
                )))
            }
        };
        serde_json::from_str(&secret)
            .map(Some)
            .map_err(|e| ApiError::Storage(format!("Failed to parse keychain credentials: {}", e)))
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        let secret = serde_json::to_string(credentials)
            .map_err(|e| ApiError::Storage(format!("Failed to serialize credentials: {}", e)))?;
        self.entry()?
            .set_password(&secret)
            .map_err(|e| ApiError::Storage(format!("Failed to store credentials in keychain: {}", e)))
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ApiError::Storage(format!(
                "Failed to delete credentials from keychain: {}",
                e
            ))),
        }
    }
}
