//! Integration service: builds the executor and flow for an integration and
//! serializes authentication per integration.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, AuthConfig, Config, HttpConfig};
use crate::credentials::{keys, CredentialStore};
use crate::flows::{
    AuthenticationFlow, AuthenticationOutcome, AuthorizationCodeFlow, AuthorizationCodeOptions,
    ClientCredentialsFlow, ClientCredentialsOptions, FlowError,
};
use crate::http::{ApiRequest, RequestExecutor, TransportError};
use crate::integration::{GrantType, Integration, IntegrationStore};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Integration {0} not found")]
    NotFound(i64),

    #[error("Integration {id} uses the {grant} grant, which does not support this operation")]
    UnsupportedGrant { id: i64, grant: GrantType },

    /// The user must visit `url` before the integration can be used.
    #[error("Authorization required: {url}")]
    AuthorizationRequired { url: String },

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Entry point for everything that touches an integration's tokens.
///
/// Authentication of one integration is serialized through a per-integration
/// lock so concurrent callers never run two token exchanges against the same
/// stored grant. Different integrations proceed in parallel.
pub struct IntegrationService {
    store: Arc<IntegrationStore>,
    app: AppConfig,
    http: HttpConfig,
    auth: AuthConfig,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl IntegrationService {
    pub fn new(store: Arc<IntegrationStore>, config: &Config) -> Self {
        Self {
            store,
            app: config.app.clone(),
            http: config.http.clone(),
            auth: config.auth.clone(),
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<IntegrationStore> {
        &self.store
    }

    fn lock_for(&self, id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn integration(&self, id: i64) -> ServiceResult<Integration> {
        self.store.get(id)?.ok_or(ServiceError::NotFound(id))
    }

    fn executor(&self, integration: &Integration) -> ServiceResult<Arc<RequestExecutor>> {
        let executor = RequestExecutor::new(
            integration.base_url.clone(),
            Some(integration.auth_url().to_string()),
            self.http.timeout(),
        )?
        .with_default_headers(integration.default_headers.clone());
        Ok(Arc::new(executor))
    }

    fn credentials(&self, integration: &Integration) -> Arc<dyn CredentialStore> {
        Arc::new(self.store.credentials(integration.id))
    }

    fn authorization_code_flow(
        &self,
        integration: Integration,
        executor: Arc<RequestExecutor>,
    ) -> AuthorizationCodeFlow {
        let options =
            AuthorizationCodeOptions::from_integration(&integration, self.app.redirect_url(integration.id))
                .with_state_length(self.auth.state_length)
                .with_renewal_window(self.auth.renewal_window());
        let credentials = self.credentials(&integration);
        AuthorizationCodeFlow::new(integration, credentials, executor, options)
    }

    fn flow(&self, integration: Integration, executor: Arc<RequestExecutor>) -> Box<dyn AuthenticationFlow> {
        match integration.grant_type {
            GrantType::AuthorizationCode => Box::new(self.authorization_code_flow(integration, executor)),
            GrantType::ClientCredentials => {
                let options = ClientCredentialsOptions::from_integration(&integration)
                    .with_renewal_window(self.auth.renewal_window());
                let credentials = self.credentials(&integration);
                Box::new(ClientCredentialsFlow::new(integration, credentials, executor, options))
            }
        }
    }

    fn require_authorization_code(integration: &Integration) -> ServiceResult<()> {
        match integration.grant_type {
            GrantType::AuthorizationCode => Ok(()),
            grant => Err(ServiceError::UnsupportedGrant {
                id: integration.id,
                grant,
            }),
        }
    }

    /// Runs the integration's flow `authenticate()` under its lock.
    pub async fn authenticate(&self, id: i64) -> ServiceResult<AuthenticationOutcome> {
        let integration = self.integration(id)?;
        let executor = self.executor(&integration)?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let outcome = self.flow(integration, executor).authenticate().await?;
        debug!(
            integration_id = id,
            authenticated = outcome.is_authenticated(),
            "Authentication finished"
        );
        Ok(outcome)
    }

    /// Processes the provider redirect for an authorization-code integration.
    pub async fn complete_authorization(
        &self,
        id: i64,
        code: Option<&str>,
        state: Option<&str>,
    ) -> ServiceResult<()> {
        let integration = self.integration(id)?;
        Self::require_authorization_code(&integration)?;
        let executor = self.executor(&integration)?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        self.authorization_code_flow(integration, executor)
            .handle_redirect(code, state)
            .await?;

        info!(integration_id = id, "Authorization completed");
        Ok(())
    }

    /// Handles a redirect where the provider reported an error instead of a
    /// code: all token state is dropped.
    pub async fn reject_authorization(&self, id: i64, error: &str) -> ServiceResult<()> {
        let integration = self.integration(id)?;
        Self::require_authorization_code(&integration)?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        warn!(integration_id = id, provider_error = %error, "Provider denied authorization");
        self.credentials(&integration).remove_all(&keys::TOKEN_STATE)?;
        Ok(())
    }

    /// Fresh authorization URL (new state nonce) for an authorization-code
    /// integration.
    pub async fn authorization_url(&self, id: i64) -> ServiceResult<String> {
        let integration = self.integration(id)?;
        Self::require_authorization_code(&integration)?;
        let executor = self.executor(&integration)?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        Ok(self.authorization_code_flow(integration, executor).authorization_url()?)
    }

    /// Executes a business request against the integration.
    ///
    /// Requests that include authentication authenticate first; when the user
    /// still has to authorize, `AuthorizationRequired` is returned and nothing
    /// is sent.
    pub async fn call(&self, id: i64, request: ApiRequest) -> ServiceResult<Value> {
        let integration = self.integration(id)?;
        let executor = self.executor(&integration)?;

        if request.include_auth_headers {
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;

            let outcome = self
                .flow(integration, Arc::clone(&executor))
                .authenticate()
                .await?;
            if let AuthenticationOutcome::AuthorizationRequired { url } = outcome {
                return Err(ServiceError::AuthorizationRequired { url });
            }
        }

        Ok(executor.execute(&request).await?)
    }
}
