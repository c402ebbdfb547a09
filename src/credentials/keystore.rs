//! Master encryption key lifecycle.
//!
//! The credential store never handles raw key material directly: it asks a
//! [`Keystore`] for a [`MasterKey`] under a fixed alias, and the keystore
//! generates the key once per installation if it does not exist yet. The
//! returned handle only exposes the ready-to-use cipher, not the key bytes.

use std::fs;
use std::path::PathBuf;

use aes_gcm::{
    aead::{KeyInit, OsRng},
    Aes256Gcm,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Handle to a symmetric master key, restricted to encrypt/decrypt use.
pub struct MasterKey {
    cipher: Aes256Gcm,
}

impl MasterKey {
    fn from_bytes(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            ));
        }
        let cipher = Aes256Gcm::new_from_slice(key_bytes)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
        Ok(Self { cipher })
    }

    pub(crate) fn cipher(&self) -> &Aes256Gcm {
        &self.cipher
    }
}

/// Validates that a stored key is exactly 32 bytes when base64 decoded.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Source of master keys, addressed by alias.
///
/// Implementations own the key material; callers only ever receive a
/// [`MasterKey`] handle. `obtain` must be generate-if-absent: the first call
/// for an alias creates the key, later calls return the same key.
pub trait Keystore: Send + Sync {
    fn obtain(&self, alias: &str) -> Result<MasterKey>;
}

/// Keystore persisting one key file per alias under a directory.
///
/// Keys are generated from the OS CSPRNG on first use and stored
/// base64-encoded with owner-only permissions on unix. The file plays the
/// role a hardware keystore does on platforms that have one: the rest of the
/// crate references the key by alias and never sees the bytes.
pub struct FileKeystore {
    dir: PathBuf,
}

impl FileKeystore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{}.key", alias))
    }
}

impl Keystore for FileKeystore {
    fn obtain(&self, alias: &str) -> Result<MasterKey> {
        let path = self.key_path(alias);

        if path.exists() {
            let encoded = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read key file for alias '{}'", alias))?;
            let key_bytes = validate_key(&encoded)
                .with_context(|| format!("Invalid key file for alias '{}'", alias))?;
            return MasterKey::from_bytes(&key_bytes);
        }

        fs::create_dir_all(&self.dir).context("Failed to create keystore directory")?;

        let key = Aes256Gcm::generate_key(&mut OsRng);
        fs::write(&path, BASE64.encode(key.as_slice()))
            .with_context(|| format!("Failed to write key file for alias '{}'", alias))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .context("Failed to restrict key file permissions")?;
        }

        tracing::info!("Generated new master key for alias '{}'", alias);
        MasterKey::from_bytes(key.as_slice())
    }
}
