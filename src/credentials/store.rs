//! Encrypted at-rest storage for the session token pair.

use anyhow::{Context, Result};

use super::backend::StorageBackend;
use super::encryption;
use super::keystore::{Keystore, MasterKey};
use super::Credentials;

/// Storage key for the sealed access token blob
const ACCESS_TOKEN_KEY: &str = "session.access_token";

/// Storage key for the sealed refresh token blob
const REFRESH_TOKEN_KEY: &str = "session.refresh_token";

/// Default alias for the master encryption key
pub const DEFAULT_KEY_ALIAS: &str = "authgate.master";

/// Encrypted credential store for a single session's bearer tokens.
///
/// Both tokens are sealed independently with fresh nonces on every save and
/// written to a [`StorageBackend`] that is assumed to be insecure at rest.
/// Reads are fail-soft: a missing, corrupted, or undecryptable blob is
/// reported as "no credential", never as an error. The only hard failure is
/// construction, which must obtain the master key.
pub struct CredentialStore {
    backend: Box<dyn StorageBackend>,
    master_key: MasterKey,
}

impl CredentialStore {
    /// Creates a store, obtaining (or generating) the master key under the
    /// given alias. Failure here is fatal for the session core: without the
    /// key there is nothing meaningful the store could do.
    pub fn new(
        backend: Box<dyn StorageBackend>,
        keystore: &dyn Keystore,
        key_alias: &str,
    ) -> Result<Self> {
        let master_key = keystore
            .obtain(key_alias)
            .context("Failed to obtain master encryption key")?;

        Ok(Self {
            backend,
            master_key,
        })
    }

    /// Seals and persists a token pair, replacing any previous pair wholesale.
    ///
    /// Each token is sealed with its own fresh nonce. Storage write failures
    /// are logged and swallowed: callers are not in a position to do anything
    /// about a broken preference store, and the next read will simply report
    /// no credential.
    pub fn save_tokens(&self, access_token: &str, refresh_token: &str) {
        self.write_token(ACCESS_TOKEN_KEY, access_token);
        self.write_token(REFRESH_TOKEN_KEY, refresh_token);
    }

    /// Saves a [`Credentials`] pair. Equivalent to [`Self::save_tokens`].
    pub fn save(&self, credentials: &Credentials) {
        self.save_tokens(&credentials.access_token, &credentials.refresh_token);
    }

    /// Returns the stored access token, or `None` if absent or unreadable.
    pub fn access_token(&self) -> Option<String> {
        self.read_token(ACCESS_TOKEN_KEY)
    }

    /// Returns the stored refresh token, or `None` if absent or unreadable.
    pub fn refresh_token(&self) -> Option<String> {
        self.read_token(REFRESH_TOKEN_KEY)
    }

    /// True iff a non-blank access token is currently stored.
    pub fn is_logged_in(&self) -> bool {
        self.access_token()
            .map_or(false, |token| !token.trim().is_empty())
    }

    /// Deletes both stored tokens. Idempotent; delete failures are logged
    /// and swallowed.
    pub fn clear_tokens(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.backend.delete(key) {
                tracing::warn!("Failed to delete stored credential '{}': {:#}", key, e);
            }
        }
    }

    fn write_token(&self, key: &str, token: &str) {
        let blob = match encryption::seal(self.master_key.cipher(), token) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!("Failed to seal credential '{}': {:#}", key, e);
                return;
            }
        };
        if let Err(e) = self.backend.put(key, &blob) {
            tracing::warn!("Failed to persist credential '{}': {:#}", key, e);
        }
    }

    fn read_token(&self, key: &str) -> Option<String> {
        let blob = match self.backend.get(key) {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!("Failed to read credential '{}': {:#}", key, e);
                return None;
            }
        };

        match encryption::open(self.master_key.cipher(), &blob) {
            Ok(token) => Some(token),
            Err(e) => {
                // Corrupted or foreign-key blobs are treated as absent
                tracing::debug!("Failed to open credential '{}': {:#}", key, e);
                None
            }
        }
    }
}
