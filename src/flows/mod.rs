//! OAuth 2.0 authentication flows.
//!
//! A flow keeps one integration's token state valid: it reads the
//! integration's [`CredentialStore`](crate::credentials::CredentialStore),
//! decides whether a token is missing, fresh or due, and talks to the token
//! endpoint through the integration's [`RequestExecutor`](crate::http::RequestExecutor).
//!
//! # Flow
//!
//! ```text
//! authenticate()
//!   ├─ Unauthenticated ─→ authorization code: build authorization URL (+ state)
//!   │                   └→ client credentials: acquire_token()
//!   ├─ Authenticated ───→ prime executor Authorization header
//!   └─ Expired ─────────→ acquire_token() (refresh grant, code grant, or
//!                          client credentials)
//!
//! acquire_token() failure ─→ purge token state, return error
//! ```
//!
//! Flows do not serialize themselves; callers that share an integration
//! across tasks hold a per-integration lock around `authenticate()` (see
//! [`IntegrationService`](crate::service::IntegrationService)).

use async_trait::async_trait;

use crate::http::Headers;

mod authorization_code;
mod client_credentials;
mod error;
mod status;
mod token;

pub use authorization_code::{AuthorizationCodeFlow, AuthorizationCodeOptions};
pub use client_credentials::{ClientCredentialsFlow, ClientCredentialsOptions};
pub use error::FlowError;
pub use status::AuthStatus;
pub use token::{apply_token_response, bearer_headers, TokenGrant};

/// Result of a successful `authenticate()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    /// Stored token is valid; the executor header is primed.
    Authenticated,
    /// A first token was obtained.
    Acquired,
    /// An expired token was replaced.
    Renewed,
    /// A user must visit `url` and grant access before tokens exist.
    AuthorizationRequired { url: String },
}

impl AuthenticationOutcome {
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, AuthenticationOutcome::AuthorizationRequired { .. })
    }
}

/// Common contract of the grant-specific flows.
#[async_trait]
pub trait AuthenticationFlow: Send + Sync {
    /// Current status of the stored token, without side effects.
    fn status(&self) -> Result<AuthStatus, FlowError>;

    /// Brings the integration to an authenticated state if it can.
    ///
    /// Makes no network call when the stored token is still valid.
    async fn authenticate(&self) -> Result<AuthenticationOutcome, FlowError>;

    /// Exchanges the available grant at the token endpoint and stores the
    /// result. On failure the flow's token state is purged before returning.
    async fn acquire_token(&self) -> Result<(), FlowError>;

    /// Headers for business calls: `Connection: Keep-Alive` plus the bearer
    /// `Authorization` header when a token is stored.
    fn authentication_headers(&self) -> Result<Headers, FlowError>;
}
