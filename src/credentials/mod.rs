//! Encrypted at-rest storage for session bearer tokens.
//!
//! This module keeps the access/refresh token pair encrypted in a plain
//! string-keyed store, with the master key held behind a [`Keystore`] alias.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - save / read / clear token pair        │
//! │  - transparent seal/open per token       │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!       (seal)              (open)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - AES-256-GCM                           │
//! │  - fresh nonce per seal, never reused    │
//! │  - blob = base64(len ++ nonce ++ ct)     │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       StorageBackend (SQLite)            │
//! │  - opaque strings, insecure at rest      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use authgate::credentials::{CredentialStore, FileKeystore, SqliteBackend, DEFAULT_KEY_ALIAS};
//!
//! # fn main() -> anyhow::Result<()> {
//! let backend = SqliteBackend::open("session.db")?;
//! let keystore = FileKeystore::new("/var/lib/myapp/keys");
//! let store = CredentialStore::new(Box::new(backend), &keystore, DEFAULT_KEY_ALIAS)?;
//!
//! store.save_tokens("access-token", "refresh-token");
//! assert!(store.is_logged_in());
//!
//! if let Some(token) = store.access_token() {
//!     println!("Bearer {}", token);
//! }
//!
//! store.clear_tokens();
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Both tokens encrypted at rest with AES-256-GCM
//! - Each seal uses a unique nonce (never reused under the same key)
//! - The nonce is length-prefixed into the blob, so storage is self-describing
//! - Master key is generated once per installation and only ever referenced
//!   by alias; raw key bytes never cross the store's API
//! - Authenticated encryption: a tampered blob reads as "no credential"

use serde::Deserialize;

mod backend;
mod encryption;
mod keystore;
mod store;

pub use backend::{SqliteBackend, StorageBackend};
pub use keystore::{FileKeystore, Keystore, MasterKey};
pub use store::{CredentialStore, DEFAULT_KEY_ALIAS};

/// An access/refresh token pair as issued by the auth server.
///
/// Immutable once issued; a refresh or sign-in replaces the pair wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    /// Short-lived bearer token for ordinary authenticated requests.
    pub access_token: String,
    /// Long-lived token used to obtain a new pair or end the session.
    pub refresh_token: String,
}
