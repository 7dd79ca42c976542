//! Client configuration management.
//!
//! Configuration is read from `~/.config/authrelay/config.json` and then
//! overridden by `AUTHRELAY_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::auth::{CredentialStore, FileBackend, KeyringBackend};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "authrelay";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Matches the authentication endpoints that must never trigger a refresh.
pub const DEFAULT_AUTH_ENDPOINT_PATTERN: &str =
    r"^/?auth/(login|register|signup|refresh|logout|forgot-password|reset-password|verify)\b";

/// 30s allows for slow API responses while failing fast enough for interactive use.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Refresh this long before the token's expiry.
const DEFAULT_REFRESH_BUFFER_SECS: u64 = 60;

/// Where the credential store persists the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// JSON file in the cache directory
    #[default]
    File,
    /// OS keychain entry
    Keychain,
    /// Process memory only
    Memory,
}

impl std::str::FromStr for StorageMode {
    type Err = ApiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" | "persistent" => Ok(StorageMode::File),
            "keychain" | "keyring" => Ok(StorageMode::Keychain),
            "memory" | "session" => Ok(StorageMode::Memory),
            other => Err(ApiError::Config(format!("Unknown storage mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    /// Platform API key, sent with every request
    pub api_key: Option<String>,
    /// Static bearer token used when no session token is stored
    pub access_token: Option<String>,
    pub refresh_path: String,
    pub login_path: String,
    pub logout_path: String,
    pub profile_path: String,
    pub auth_endpoint_pattern: String,
    pub request_timeout_secs: u64,
    pub refresh_buffer_secs: u64,
    pub storage: StorageMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            access_token: None,
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/auth/login".to_string(),
            logout_path: "/auth/logout".to_string(),
            profile_path: "/auth/me".to_string(),
            auth_endpoint_pattern: DEFAULT_AUTH_ENDPOINT_PATTERN.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
            storage: StorageMode::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `AUTHRELAY_*` variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("AUTHRELAY_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = var("AUTHRELAY_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = var("AUTHRELAY_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = var("AUTHRELAY_REFRESH_PATH") {
            self.refresh_path = v;
        }
        if let Some(v) = var("AUTHRELAY_STORAGE") {
            self.storage = v.parse()?;
        }
        if let Some(v) = var("AUTHRELAY_TIMEOUT_SECS") {
            self.request_timeout_secs = v
                .parse()
                .with_context(|| format!("Invalid AUTHRELAY_TIMEOUT_SECS: {}", v))?;
        }
        Ok(())
    }

    /// Fail fast on configurations the client cannot work with.
    pub fn validate(&self) -> std::result::Result<(), ApiError> {
        let has_key = self.api_key.as_deref().is_some_and(|k| !k.is_empty());
        let has_token = self.access_token.as_deref().is_some_and(|t| !t.is_empty());
        if !has_key && !has_token {
            return Err(ApiError::Config(
                "Either an API key or an access token must be configured".to_string(),
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| ApiError::Config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        self.auth_endpoint_regex()?;
        Ok(())
    }

    pub fn auth_endpoint_regex(&self) -> std::result::Result<Regex, ApiError> {
        Regex::new(&self.auth_endpoint_pattern)
            .map_err(|e| ApiError::Config(format!("Invalid auth endpoint pattern: {}", e)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_secs as i64)
    }

    /// Open the credential store selected by `storage`.
    pub fn open_credential_store(&self) -> Result<CredentialStore> {
        Ok(match self.storage {
            StorageMode::File => CredentialStore::new(FileBackend::in_dir(&Self::cache_dir()?)),
            StorageMode::Keychain => {
                CredentialStore::new(KeyringBackend::new(APP_NAME, self.base_url.clone()))
            }
            StorageMode::Memory => CredentialStore::in_memory(),
        })
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
