//! Encrypted credential mappings for integrations.
//!
//! Each integration owns a flat mapping of credential names to secret strings
//! (`client_id`, `access_token`, ...). Values are encrypted one by one with
//! AES-256-GCM and the whole mapping is persisted as a single JSON blob.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (trait)            │
//! │  - get / set / remove / replace_all      │
//! │  - every mutation rewrites the mapping   │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!      (seal_all)          (open_all)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Cipher                             │
//! │  - AES-256-GCM, one nonce per value      │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       integrations.credentials (TEXT)    │
//! │  {"key": {"ciphertext", "nonce"}, ...}   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The SQLite-backed implementation is
//! [`IntegrationCredentials`](crate::integration::IntegrationCredentials).

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod blob;
mod encryption;

pub use blob::{open_all, seal_all};
pub use encryption::{validate_key, Cipher, SealedValue};

/// Credential names recognized by the authentication flows.
pub mod keys {
    pub const CLIENT_ID: &str = "client_id";
    pub const CLIENT_SECRET: &str = "client_secret";
    pub const SCOPE: &str = "scope";
    pub const STATE: &str = "state";
    pub const CODE: &str = "code";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// Absolute expiry timestamp (RFC 3339), not a duration.
    pub const EXPIRES_IN: &str = "expires_in";

    /// Everything an authorization failure must purge.
    pub const TOKEN_STATE: [&str; 5] = [STATE, CODE, ACCESS_TOKEN, REFRESH_TOKEN, EXPIRES_IN];
}

/// Plaintext credential mapping for one integration.
///
/// A missing key is a normal state. `Debug` prints key names only.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Stored access token, ignoring empty values.
    pub fn access_token(&self) -> Option<&str> {
        self.get(keys::ACCESS_TOKEN).filter(|t| !t.is_empty())
    }

    /// Stored refresh token, ignoring empty values.
    pub fn refresh_token(&self) -> Option<&str> {
        self.get(keys::REFRESH_TOKEN).filter(|t| !t.is_empty())
    }

    /// Raw stored expiry string, if any.
    pub fn expires_in(&self) -> Option<&str> {
        self.get(keys::EXPIRES_IN).filter(|e| !e.is_empty())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Formats an absolute expiry the way it is stored under `expires_in`.
pub fn format_expiry(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a stored expiry.
///
/// Accepts RFC 3339 and the legacy `YYYY-MM-DD HH:MM:SS` form (read as UTC).
pub fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Access to the credential mapping of exactly one integration.
///
/// Implementations persist the full mapping on every mutation: there are no
/// partial updates. Callers that mutate several keys should build the new
/// mapping and call [`replace_all`](CredentialStore::replace_all) once.
pub trait CredentialStore: Send + Sync {
    /// Reads and decrypts the whole mapping.
    fn all(&self) -> Result<Credentials>;

    /// Re-encrypts and persists `credentials` as the complete mapping.
    fn replace_all(&self, credentials: &Credentials) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.all()?.get(key).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut credentials = self.all()?;
        credentials.insert(key, value);
        self.replace_all(&credentials)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.remove_all(&[key])
    }

    /// Removes several keys with a single rewrite.
    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        let mut credentials = self.all()?;
        for key in keys {
            credentials.remove(key);
        }
        self.replace_all(&credentials)
    }
}
