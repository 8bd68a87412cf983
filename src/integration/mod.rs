//! Integration records and their persistence.
//!
//! An integration is one configured connection to an external system: where
//! its API lives, which OAuth grant it uses, who owns it, and its encrypted
//! credential mapping. Each integration belongs to an [`IntegrationOption`]
//! (the provider type); deleting the option deletes its integrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::credentials::Credentials;

mod credentials;
mod store;

pub use credentials::IntegrationCredentials;
pub use store::IntegrationStore;


/// OAuth grant an integration authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::ClientCredentials => "client_credentials",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            other => Err(anyhow::anyhow!("Unknown grant type '{}'", other)),
        }
    }
}

/// Polymorphic owner reference: any entity type plus its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub owner_type: String,
    pub owner_id: String,
}

impl Owner {
    pub fn new(owner_type: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id: owner_id.into(),
        }
    }
}

/// Provider type shared by integrations (e.g. "exact_online").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrationOption {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable identity and endpoint configuration of one integration.
///
/// Credentials are not part of the record; they are reached
/// through [`IntegrationStore::credentials`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Integration {
    pub id: i64,
    pub owner: Option<Owner>,
    pub option_id: i64,
    /// Base URL for business calls.
    pub base_url: String,
    /// Base URL for authentication calls; falls back to `base_url`.
    pub auth_url: Option<String>,
    /// Authorization endpoint path (or absolute URL) the user is sent to.
    pub authorization_endpoint: Option<String>,
    /// Token endpoint path (or absolute URL).
    pub authentication_endpoint: Option<String>,
    pub grant_type: GrantType,
    /// Issue and verify a `state` nonce on the authorization redirect.
    pub use_state: bool,
    /// Send token requests form-encoded instead of JSON.
    pub form_encoded: bool,
    /// Explicit redirect URL, overriding the computed default.
    pub redirect_url: Option<String>,
    /// Headers sent with every request to this integration.
    pub default_headers: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    /// Host used for authentication calls.
    pub fn auth_url(&self) -> &str {
        self.auth_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.base_url)
    }

    /// Configured token endpoint, ignoring empty values.
    pub fn token_endpoint(&self) -> Option<&str> {
        self.authentication_endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
    }
}

/// Input for [`IntegrationStore::create`].
#[derive(Debug, Clone)]
pub struct NewIntegration {
    pub owner: Option<Owner>,
    pub option_id: i64,
    pub base_url: String,
    pub auth_url: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub authentication_endpoint: Option<String>,
    pub grant_type: GrantType,
    pub use_state: bool,
    pub form_encoded: bool,
    pub redirect_url: Option<String>,
    pub default_headers: BTreeMap<String, String>,
    /// Initial credentials (typically `client_id`, `client_secret`, `scope`).
    pub credentials: Credentials,
}

impl NewIntegration {
    pub fn new(option_id: i64, base_url: impl Into<String>, grant_type: GrantType) -> Self {
        Self {
            owner: None,
            option_id,
            base_url: base_url.into(),
            auth_url: None,
            authorization_endpoint: None,
            authentication_endpoint: None,
            grant_type,
            use_state: false,
            form_encoded: false,
            redirect_url: None,
            default_headers: BTreeMap::new(),
            credentials: Credentials::new(),
        }
    }
}
