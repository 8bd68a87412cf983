//! Authorization-code grant: authorization URL, redirect handling and
//! refresh-or-code token acquisition.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::token::{apply_token_response, bearer_headers, token_request};
use super::{AuthStatus, AuthenticationFlow, AuthenticationOutcome, FlowError};
use crate::credentials::{keys, CredentialStore, Credentials};
use crate::http::{Headers, RequestExecutor};
use crate::integration::Integration;

/// Settings of one authorization-code integration.
#[derive(Debug, Clone)]
pub struct AuthorizationCodeOptions {
    /// Issue and verify a `state` nonce.
    pub use_state: bool,
    /// Send token requests form-encoded instead of JSON.
    pub form_encoded: bool,
    /// Absolute redirect URI registered with the provider.
    pub redirect_url: String,
    pub state_length: usize,
    /// How long before expiry a token is already treated as expired.
    pub renewal_window: Duration,
}

impl AuthorizationCodeOptions {
    /// Takes flags from `integration`; its own redirect URL wins over
    /// `default_redirect_url`.
    pub fn from_integration(integration: &Integration, default_redirect_url: String) -> Self {
        let redirect_url = integration
            .redirect_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(default_redirect_url);

        Self {
            use_state: integration.use_state,
            form_encoded: integration.form_encoded,
            redirect_url,
            state_length: 16,
            renewal_window: Duration::zero(),
        }
    }

    pub fn with_state_length(mut self, state_length: usize) -> Self {
        self.state_length = state_length;
        self
    }

    pub fn with_renewal_window(mut self, renewal_window: Duration) -> Self {
        self.renewal_window = renewal_window;
        self
    }
}

enum Grant {
    RefreshToken(String),
    Code(String),
}

impl Grant {
    fn name(&self) -> &'static str {
        match self {
            Grant::RefreshToken(_) => "refresh_token",
            Grant::Code(_) => "authorization_code",
        }
    }
}

/// Authorization-code flow for one integration.
pub struct AuthorizationCodeFlow {
    integration: Integration,
    credentials: Arc<dyn CredentialStore>,
    executor: Arc<RequestExecutor>,
    options: AuthorizationCodeOptions,
}

impl AuthorizationCodeFlow {
    pub fn new(
        integration: Integration,
        credentials: Arc<dyn CredentialStore>,
        executor: Arc<RequestExecutor>,
        options: AuthorizationCodeOptions,
    ) -> Self {
        Self {
            integration,
            credentials,
            executor,
            options,
        }
    }

    pub fn redirect_url(&self) -> &str {
        &self.options.redirect_url
    }

    /// Builds the URL a user visits to grant access.
    ///
    /// With `use_state`, a fresh nonce is generated and stored first, replacing
    /// any earlier one.
    pub fn authorization_url(&self) -> Result<String, FlowError> {
        let endpoint = self
            .integration
            .authorization_endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                FlowError::AuthenticationConfig("authorization endpoint not configured".to_string())
            })?;

        let mut credentials = self.credentials.all()?;
        let client_id = credentials
            .get(keys::CLIENT_ID)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FlowError::AuthenticationConfig("client_id not configured".to_string()))?
            .to_string();

        let mut params = vec![
            ("response_type", "code".to_string()),
            ("client_id", client_id),
            ("redirect_uri", self.options.redirect_url.clone()),
        ];
        if let Some(scope) = credentials.get(keys::SCOPE).filter(|s| !s.is_empty()) {
            params.push(("scope", scope.to_string()));
        }

        if self.options.use_state {
            let state = generate_state(self.options.state_length);
            credentials.insert(keys::STATE, state.clone());
            self.credentials.replace_all(&credentials)?;
            params.push(("state", state));
        }

        let query = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        let base = self.executor.resolve_url(endpoint, true);
        let separator = if base.contains('?') { '&' } else { '?' };

        Ok(format!("{}{}{}", base, separator, query))
    }

    /// Handles the provider redirect carrying `code` and `state`.
    ///
    /// The code is checked first, then the state against the stored nonce (if
    /// one was issued). Every rejection purges the token state. On success the
    /// nonce is consumed, the code stored and exchanged immediately. A refresh
    /// token left from an earlier authorization is dropped; it never takes
    /// precedence over the fresh code.
    pub async fn handle_redirect(&self, code: Option<&str>, state: Option<&str>) -> Result<(), FlowError> {
        let integration_id = self.integration.id;
        let mut credentials = self.credentials.all()?;

        let Some(code) = code.filter(|c| !c.is_empty()) else {
            warn!(integration_id, "Redirect without authorization code");
            self.purge();
            return Err(FlowError::MissingCode);
        };

        if let Some(expected) = credentials.get(keys::STATE).filter(|s| !s.is_empty()) {
            match state.filter(|s| !s.is_empty()) {
                None => {
                    warn!(integration_id, "Redirect without state");
                    self.purge();
                    return Err(FlowError::MissingState);
                }
                Some(received) if received != expected => {
                    warn!(integration_id, "Redirect state mismatch");
                    self.purge();
                    return Err(FlowError::InvalidState);
                }
                Some(_) => debug!(integration_id, "Redirect state verified"),
            }
        }

        credentials.remove(keys::STATE);
        credentials.remove(keys::REFRESH_TOKEN);
        credentials.insert(keys::CODE, code);
        self.credentials.replace_all(&credentials)?;

        self.acquire(Some(Grant::Code(code.to_string()))).await
    }

    /// Exchanges `grant`, or the stored refresh token / code when `None`.
    /// Any failure purges the token state.
    async fn acquire(&self, grant: Option<Grant>) -> Result<(), FlowError> {
        match self.exchange(grant).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    integration_id = self.integration.id,
                    kind = e.kind(),
                    error = %e,
                    "Token acquisition failed, purging token state"
                );
                self.purge();
                Err(e)
            }
        }
    }

    async fn exchange(&self, grant: Option<Grant>) -> Result<(), FlowError> {
        let endpoint = self.integration.token_endpoint().ok_or_else(|| {
            FlowError::AuthenticationConfig("token endpoint not configured".to_string())
        })?;

        let mut credentials = self.credentials.all()?;

        let grant = if let Some(grant) = grant {
            grant
        } else if let Some(refresh_token) = credentials.refresh_token() {
            Grant::RefreshToken(refresh_token.to_string())
        } else if let Some(code) = credentials.get(keys::CODE).filter(|c| !c.is_empty()) {
            Grant::Code(code.to_string())
        } else {
            return Err(FlowError::MissingGrant(
                "no refresh token or authorization code stored".to_string(),
            ));
        };

        let mut params = vec![("grant_type", grant.name().to_string())];
        match &grant {
            Grant::RefreshToken(token) => params.push(("refresh_token", token.clone())),
            Grant::Code(code) => {
                params.push(("code", code.clone()));
                params.push(("redirect_uri", self.options.redirect_url.clone()));
            }
        }
        for key in [keys::CLIENT_ID, keys::CLIENT_SECRET] {
            if let Some(value) = credentials.get(key).filter(|v| !v.is_empty()) {
                params.push((key, value.to_string()));
            }
        }

        debug!(
            integration_id = self.integration.id,
            grant = grant.name(),
            "Requesting access token"
        );

        let request = token_request(endpoint, params, self.options.form_encoded);
        let response = self.executor.execute(&request).await?;

        let issued = apply_token_response(&mut credentials, &response, Utc::now())?;
        if let Grant::Code(_) = grant {
            credentials.remove(keys::CODE);
        }
        self.credentials.replace_all(&credentials)?;
        self.prime(&credentials);

        info!(
            integration_id = self.integration.id,
            grant = grant.name(),
            expires_at = ?issued.expires_at,
            refresh_token_rotated = issued.refresh_token_rotated,
            "Access token stored"
        );

        Ok(())
    }

    fn prime(&self, credentials: &Credentials) {
        self.executor.set_authentication_headers(bearer_headers(credentials));
    }

    /// Drops all token state. A storage failure here is logged; the caller's
    /// original error is what gets reported.
    fn purge(&self) {
        self.executor.clear_authentication_headers();
        if let Err(e) = self.credentials.remove_all(&keys::TOKEN_STATE) {
            error!(
                integration_id = self.integration.id,
                error = %e,
                "Failed to purge token state"
            );
        }
    }
}

#[async_trait]
impl AuthenticationFlow for AuthorizationCodeFlow {
    fn status(&self) -> Result<AuthStatus, FlowError> {
        let credentials = self.credentials.all()?;
        Ok(AuthStatus::evaluate(&credentials, Utc::now(), self.options.renewal_window))
    }

    async fn authenticate(&self) -> Result<AuthenticationOutcome, FlowError> {
        let credentials = self.credentials.all()?;

        match AuthStatus::evaluate(&credentials, Utc::now(), self.options.renewal_window) {
            AuthStatus::Authenticated { .. } => {
                self.prime(&credentials);
                Ok(AuthenticationOutcome::Authenticated)
            }
            AuthStatus::Unauthenticated => {
                self.executor.clear_authentication_headers();
                let url = self.authorization_url()?;
                info!(integration_id = self.integration.id, "Authorization required");
                Ok(AuthenticationOutcome::AuthorizationRequired { url })
            }
            AuthStatus::Expired { expires_at } => {
                info!(
                    integration_id = self.integration.id,
                    expires_at = ?expires_at,
                    "Access token expired, renewing"
                );
                self.acquire_token().await?;
                Ok(AuthenticationOutcome::Renewed)
            }
        }
    }

    async fn acquire_token(&self) -> Result<(), FlowError> {
        self.acquire(None).await
    }

    fn authentication_headers(&self) -> Result<Headers, FlowError> {
        Ok(bearer_headers(&self.credentials.all()?))
    }
}

fn generate_state(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_state() {
        let state = generate_state(16);
        assert_eq!(state.len(), 16);
        assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(state, generate_state(16));
    }
}
