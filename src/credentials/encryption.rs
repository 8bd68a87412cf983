//! AES-256-GCM encryption for individual credential values.
//!
//! Every value gets its own random nonce. The master key is 32 bytes, supplied
//! base64-encoded through the environment and held in memory only.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// One encrypted credential value as it appears in the persisted blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedValue {
    /// Base64 ciphertext (includes the GCM tag)
    pub ciphertext: String,
    /// Base64 nonce used for this value only
    pub nonce: String,
}

/// Validated master key with seal/open operations.
#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher(..)")
    }
}

impl Cipher {
    /// Builds a cipher from a base64-encoded 32-byte key.
    pub fn from_base64(key_base64: &str) -> Result<Self> {
        let key = validate_key(key_base64)?;
        Self::from_bytes(&key)
    }

    /// Builds a cipher from raw key bytes.
    pub fn from_bytes(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        Ok(Self { cipher })
    }

    /// Encrypts one value under a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<SealedValue> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(SealedValue {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce),
        })
    }

    /// Decrypts a value sealed with the same key.
    ///
    /// Fails on a wrong key, a wrong nonce or any tampering with the ciphertext.
    pub fn open(&self, sealed: &SealedValue) -> Result<String> {
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .context("Failed to decode ciphertext")?;
        let nonce_bytes = BASE64
            .decode(&sealed.nonce)
            .context("Failed to decode nonce")?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
    }
}

/// Decodes a base64 master key and checks that it is exactly 32 bytes.
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

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> Cipher {
        Cipher::from_bytes(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key(&BASE64.encode([0u8; 32])).is_ok());
        assert!(validate_key(&BASE64.encode([0u8; 16])).is_err());
        assert!(validate_key(&BASE64.encode([0u8; 64])).is_err());
        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = test_cipher();

        let sealed = cipher.seal("client-secret-value").unwrap();
        assert_ne!(sealed.ciphertext, "client-secret-value");

        assert_eq!(cipher.open(&sealed).unwrap(), "client-secret-value");
    }

    #[test]
    fn test_same_plaintext_gets_distinct_nonces() {
        let cipher = test_cipher();

        let first = cipher.seal("same").unwrap();
        let second = cipher.seal("same").unwrap();

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = test_cipher().seal("secret").unwrap();
        let other = Cipher::from_bytes(&[9u8; 32]).unwrap();

        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = test_cipher();
        let mut sealed = cipher.seal("secret").unwrap();
        sealed.ciphertext = BASE64.encode(b"definitely not the original bytes");

        assert!(cipher.open(&sealed).is_err());
    }

    #[test]
    fn test_short_nonce_rejected() {
        let cipher = test_cipher();
        let mut sealed = cipher.seal("secret").unwrap();
        sealed.nonce = BASE64.encode([0u8; 4]);

        assert!(cipher.open(&sealed).is_err());
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        assert_eq!(format!("{:?}", test_cipher()), "Cipher(..)");
    }
}
