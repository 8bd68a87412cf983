//! Serialization of a credential mapping into its persisted blob.
//!
//! The blob is a JSON object keyed by credential name whose values are
//! [`SealedValue`]s. Sealing always re-encrypts every value under new nonces.

use super::{Cipher, Credentials, SealedValue};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// Encrypts every value of `credentials` and serializes the result.
pub fn seal_all(credentials: &Credentials, cipher: &Cipher) -> Result<String> {
    let mut sealed = BTreeMap::new();
    for (key, value) in credentials.iter() {
        let value = cipher
            .seal(value)
            .with_context(|| format!("Failed to encrypt credential '{}'", key))?;
        sealed.insert(key.to_string(), value);
    }

    serde_json::to_string(&sealed).context("Failed to serialize credentials")
}

/// Parses and decrypts a blob written by [`seal_all`].
///
/// An empty or missing blob yields an empty mapping.
pub fn open_all(blob: Option<&str>, cipher: &Cipher) -> Result<Credentials> {
    let Some(blob) = blob.filter(|b| !b.trim().is_empty()) else {
        return Ok(Credentials::new());
    };

    let sealed: BTreeMap<String, SealedValue> =
        serde_json::from_str(blob).context("Failed to parse credentials blob")?;

    let mut credentials = Credentials::new();
    for (key, value) in sealed {
        let plaintext = cipher
            .open(&value)
            .with_context(|| format!("Failed to decrypt credential '{}'", key))?;
        credentials.insert(key, plaintext);
    }

    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::keys;

    fn cipher() -> Cipher {
        Cipher::from_bytes(&[3u8; 32]).unwrap()
    }

    #[test]
    fn test_blob_roundtrip() {
        let cipher = cipher();
        let creds: Credentials = [("foo", "bar"), (keys::CLIENT_ID, "client-1")]
            .into_iter()
            .collect();

        let blob = seal_all(&creds, &cipher).unwrap();
        let opened = open_all(Some(&blob), &cipher).unwrap();

        assert_eq!(opened.get("foo"), Some("bar"));
        assert_eq!(opened, creds);
    }

    #[test]
    fn test_blob_never_contains_plaintext() {
        let creds: Credentials = [(keys::CLIENT_SECRET, "very-secret-value")]
            .into_iter()
            .collect();

        let blob = seal_all(&creds, &cipher()).unwrap();

        assert!(blob.contains("client_secret"));
        assert!(!blob.contains("very-secret-value"));
    }

    #[test]
    fn test_resealing_changes_every_value() {
        let cipher = cipher();
        let creds: Credentials = [("a", "1"), ("b", "2")].into_iter().collect();

        let first = seal_all(&creds, &cipher).unwrap();
        let second = seal_all(&creds, &cipher).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_missing_blob_is_empty_mapping() {
        assert!(open_all(None, &cipher()).unwrap().is_empty());
        assert!(open_all(Some("  "), &cipher()).unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_blob_fails() {
        assert!(open_all(Some("{not json"), &cipher()).is_err());
    }

    #[test]
    fn test_blob_from_other_key_fails() {
        let creds: Credentials = [("foo", "bar")].into_iter().collect();
        let blob = seal_all(&creds, &cipher()).unwrap();

        let other = Cipher::from_bytes(&[4u8; 32]).unwrap();
        assert!(open_all(Some(&blob), &other).is_err());
    }
}
