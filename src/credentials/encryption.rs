//! AES-256-GCM sealing for credential tokens.
//!
//! Each token is sealed separately with a unique nonce. The stored form is
//! self-describing: `base64(1-byte nonce length ++ nonce ++ ciphertext+tag)`,
//! so decryption needs no side channel for nonce transport and the format can
//! survive a future nonce-size change without a storage migration.

use aes_gcm::{
    aead::{Aead, AeadCore, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the nonce in bytes (96 bits, standard for GCM)
pub(crate) const NONCE_SIZE: usize = 12;

/// Encrypts plaintext using AES-256-GCM with a random nonce and packs the
/// result into a single base64 string for storage.
///
/// # Security
/// - Uses a cryptographically secure random nonce (never reuse)
/// - Authenticated encryption (tampering detected)
pub fn seal(cipher: &Aes256Gcm, plaintext: &str) -> Result<String> {
    // Generate random nonce (never reuse!)
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    // Pack: 1-byte nonce length, nonce, ciphertext (includes the auth tag)
    let mut blob = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
    blob.push(NONCE_SIZE as u8);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&blob))
}

/// Decrypts a sealed blob produced by [`seal`].
///
/// # Returns
/// * `Ok(String)` - Decrypted plaintext
/// * `Err` - If the blob is malformed, truncated, tampered with, or was
///   sealed under a different key
pub fn open(cipher: &Aes256Gcm, blob: &str) -> Result<String> {
    let bytes = BASE64.decode(blob).context("Failed to decode stored blob")?;

    let (&nonce_len, rest) = bytes
        .split_first()
        .ok_or_else(|| anyhow!("Stored blob is empty"))?;
    let nonce_len = nonce_len as usize;

    if nonce_len != NONCE_SIZE {
        return Err(anyhow!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_len
        ));
    }
    if rest.len() <= nonce_len {
        return Err(anyhow!("Stored blob is truncated"));
    }

    let (nonce_bytes, ciphertext) = rest.split_at(nonce_len);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
}
