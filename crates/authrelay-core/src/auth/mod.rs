//! Credential storage and token inspection.
//!
//! This module provides:
//! - `CredentialStore`: current bearer token and cached profile, shared by clones
//! - `CredentialBackend`: pluggable persistence (file, OS keychain, memory)
//! - `TokenClaims`: unverified expiry inspection of JWT bearer tokens

pub mod backend;
pub mod claims;
pub mod store;

pub use backend::{CredentialBackend, FileBackend, KeyringBackend, MemoryBackend, StoredCredentials};
pub use claims::TokenClaims;
pub use store::{CredentialChange, CredentialStore};
