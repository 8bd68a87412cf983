//! Client-credentials grant.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::token::{apply_token_response, bearer_headers, token_request};
use super::{AuthStatus, AuthenticationFlow, AuthenticationOutcome, FlowError};
use crate::credentials::{keys, CredentialStore, Credentials};
use crate::http::{Headers, RequestExecutor};
use crate::integration::Integration;

/// An expired token is cleared and re-acquired at most this many times per
/// `authenticate()` call.
const MAX_RENEWALS: usize = 1;

/// Keys dropped when a client-credentials token expires or fails.
const ACCESS_STATE: [&str; 2] = [keys::ACCESS_TOKEN, keys::EXPIRES_IN];

#[derive(Debug, Clone)]
pub struct ClientCredentialsOptions {
    pub form_encoded: bool,
    pub renewal_window: Duration,
}

impl ClientCredentialsOptions {
    pub fn from_integration(integration: &Integration) -> Self {
        Self {
            form_encoded: integration.form_encoded,
            renewal_window: Duration::zero(),
        }
    }

    pub fn with_renewal_window(mut self, renewal_window: Duration) -> Self {
        self.renewal_window = renewal_window;
        self
    }
}

/// Client-credentials flow for one integration.
pub struct ClientCredentialsFlow {
    integration: Integration,
    credentials: Arc<dyn CredentialStore>,
    executor: Arc<RequestExecutor>,
    options: ClientCredentialsOptions,
}

impl ClientCredentialsFlow {
    pub fn new(
        integration: Integration,
        credentials: Arc<dyn CredentialStore>,
        executor: Arc<RequestExecutor>,
        options: ClientCredentialsOptions,
    ) -> Self {
        Self {
            integration,
            credentials,
            executor,
            options,
        }
    }

    async fn exchange(&self) -> Result<(), FlowError> {
        let endpoint = self.integration.token_endpoint().ok_or_else(|| {
            FlowError::AuthenticationConfig("token endpoint not configured".to_string())
        })?;

        let mut credentials = self.credentials.all()?;

        let client_id = required(&credentials, keys::CLIENT_ID)?;
        let client_secret = required(&credentials, keys::CLIENT_SECRET)?;

        let mut params = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = credentials.get(keys::SCOPE).filter(|s| !s.is_empty()) {
            params.push(("scope", scope.to_string()));
        }

        debug!(integration_id = self.integration.id, "Requesting client-credentials token");

        let request = token_request(endpoint, params, self.options.form_encoded);
        let response = self.executor.execute(&request).await?;

        let issued = apply_token_response(&mut credentials, &response, Utc::now())?;
        self.credentials.replace_all(&credentials)?;
        self.prime(&credentials);

        info!(
            integration_id = self.integration.id,
            expires_at = ?issued.expires_at,
            "Access token stored"
        );

        Ok(())
    }

    fn prime(&self, credentials: &Credentials) {
        self.executor.set_authentication_headers(bearer_headers(credentials));
    }

    fn purge(&self) {
        self.executor.clear_authentication_headers();
        if let Err(e) = self.credentials.remove_all(&ACCESS_STATE) {
            error!(
                integration_id = self.integration.id,
                error = %e,
                "Failed to purge access token"
            );
        }
    }
}

fn required(credentials: &Credentials, key: &str) -> Result<String, FlowError> {
    credentials
        .get(key)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FlowError::MissingGrant(format!("{} not stored", key)))
}

#[async_trait]
impl AuthenticationFlow for ClientCredentialsFlow {
    fn status(&self) -> Result<AuthStatus, FlowError> {
        let credentials = self.credentials.all()?;
        Ok(AuthStatus::evaluate(&credentials, Utc::now(), self.options.renewal_window))
    }

    async fn authenticate(&self) -> Result<AuthenticationOutcome, FlowError> {
        let mut renewed = false;

        for _ in 0..=MAX_RENEWALS {
            let credentials = self.credentials.all()?;

            match AuthStatus::evaluate(&credentials, Utc::now(), self.options.renewal_window) {
                AuthStatus::Authenticated { .. } => {
                    self.prime(&credentials);
                    return Ok(AuthenticationOutcome::Authenticated);
                }
                AuthStatus::Unauthenticated => {
                    self.acquire_token().await?;
                    return Ok(if renewed {
                        AuthenticationOutcome::Renewed
                    } else {
                        AuthenticationOutcome::Acquired
                    });
                }
                AuthStatus::Expired { expires_at } => {
                    info!(
                        integration_id = self.integration.id,
                        expires_at = ?expires_at,
                        "Access token expired, clearing"
                    );
                    self.executor.clear_authentication_headers();
                    self.credentials.remove_all(&ACCESS_STATE)?;
                    renewed = true;
                }
            }
        }

        Err(FlowError::RenewalExhausted)
    }

    async fn acquire_token(&self) -> Result<(), FlowError> {
        match self.exchange().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    integration_id = self.integration.id,
                    kind = e.kind(),
                    error = %e,
                    "Token acquisition failed, purging access token"
                );
                self.purge();
                Err(e)
            }
        }
    }

    fn authentication_headers(&self) -> Result<Headers, FlowError> {
        Ok(bearer_headers(&self.credentials.all()?))
    }
}
