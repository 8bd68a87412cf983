// Integration tests for the client-credentials flow against a mock token endpoint

use chrono::{Duration, Utc};
use integration_manager::credentials::{format_expiry, keys, Cipher, CredentialStore, Credentials};
use integration_manager::flows::{
    AuthStatus, AuthenticationFlow, AuthenticationOutcome, ClientCredentialsFlow, ClientCredentialsOptions,
    FlowError,
};
use integration_manager::http::RequestExecutor;
use integration_manager::integration::{GrantType, Integration, IntegrationStore, NewIntegration};
use mockito::Matcher;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn store() -> Arc<IntegrationStore> {
    let cipher = Cipher::from_bytes(&[5u8; 32]).unwrap();
    Arc::new(IntegrationStore::with_cipher(":memory:", cipher).unwrap())
}

fn create_integration(
    store: &IntegrationStore,
    base_url: &str,
    auth_url: Option<&str>,
    credentials: &[(&str, &str)],
) -> Integration {
    let option = store.ensure_option("payments").unwrap();
    let mut new = NewIntegration::new(option.id, base_url, GrantType::ClientCredentials);
    new.auth_url = auth_url.map(str::to_string);
    new.authentication_endpoint = Some("/oauth/token".to_string());
    new.credentials = credentials.iter().copied().collect::<Credentials>();
    store.create(&new).unwrap()
}

fn flow(store: &Arc<IntegrationStore>, integration: &Integration) -> (ClientCredentialsFlow, Arc<RequestExecutor>) {
    let executor = Arc::new(
        RequestExecutor::new(integration.base_url.clone(), integration.auth_url.clone(), std::time::Duration::from_secs(5))
            .unwrap(),
    );
    let credentials: Arc<dyn CredentialStore> = Arc::new(store.credentials(integration.id));
    let options = ClientCredentialsOptions::from_integration(integration);
    (
        ClientCredentialsFlow::new(integration.clone(), credentials, Arc::clone(&executor), options),
        executor,
    )
}

const CLIENT: [(&str, &str); 3] = [
    (keys::CLIENT_ID, "client-1"),
    (keys::CLIENT_SECRET, "secret-1"),
    (keys::SCOPE, "payments:read"),
];

/// Without a token, authenticate() acquires one immediately from the auth URL.
#[tokio::test]
async fn test_acquires_token_on_auth_url() {
    let mut auth_server = mockito::Server::new_async().await;
    let mut api_server = mockito::Server::new_async().await;
    let token = auth_server
        .mock("POST", "/oauth/token")
        .match_body(Matcher::PartialJson(json!({
            "grant_type": "client_credentials",
            "client_id": "client-1",
            "client_secret": "secret-1",
            "scope": "payments:read"
        })))
        .with_status(200)
        .with_body(r#"{"access_token":"cc1","expires_in":"1800"}"#)
        .expect(1)
        .create_async()
        .await;
    let wrong_host = api_server.mock("POST", "/oauth/token").expect(0).create_async().await;

    let auth_url = auth_server.url();
    let store = store();
    let integration = create_integration(&store, &api_server.url(), Some(auth_url.as_str()), &CLIENT);
    let (flow, executor) = flow(&store, &integration);

    let outcome = flow.authenticate().await.unwrap();

    assert_eq!(outcome, AuthenticationOutcome::Acquired);
    let stored = store.load_credentials(integration.id).unwrap();
    assert_eq!(stored.access_token(), Some("cc1"));
    assert!(stored.expires_in().is_some());
    assert_eq!(
        executor.authentication_headers().get("Authorization").map(String::as_str),
        Some("Bearer cc1")
    );
    token.assert_async().await;
    wrong_host.assert_async().await;
}

#[tokio::test]
async fn test_valid_token_makes_no_network_call() {
    let mut server = mockito::Server::new_async().await;
    let token = server.mock("POST", "/oauth/token").expect(0).create_async().await;

    let expiry = format_expiry(Utc::now() + Duration::hours(2));
    let mut creds = CLIENT.to_vec();
    creds.push((keys::ACCESS_TOKEN, "cc1"));
    creds.push((keys::EXPIRES_IN, expiry.as_str()));

    let store = store();
    let integration = create_integration(&store, &server.url(), None, &creds);
    let (flow, _) = flow(&store, &integration);

    assert_eq!(flow.authenticate().await.unwrap(), AuthenticationOutcome::Authenticated);
    token.assert_async().await;
}

/// An expired token is dropped and replaced by exactly one new acquisition.
#[tokio::test]
async fn test_expired_token_renewed_once() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_body(r#"{"access_token":"cc2","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let expired = format_expiry(Utc::now() - Duration::seconds(30));
    let mut creds = CLIENT.to_vec();
    creds.push((keys::ACCESS_TOKEN, "cc1"));
    creds.push((keys::EXPIRES_IN, expired.as_str()));

    let store = store();
    let integration = create_integration(&store, &server.url(), None, &creds);
    let (flow, _) = flow(&store, &integration);

    assert_eq!(flow.status().unwrap().as_str(), "expired");
    assert_eq!(flow.authenticate().await.unwrap(), AuthenticationOutcome::Renewed);
    assert_eq!(
        store.load_credentials(integration.id).unwrap().access_token(),
        Some("cc2")
    );
    assert!(flow.status().unwrap().is_authenticated());
    token.assert_async().await;
}

#[tokio::test]
async fn test_failed_acquisition_clears_access_token() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/oauth/token")
        .with_status(401)
        .with_body(r#"{"error":"invalid_client"}"#)
        .expect(1)
        .create_async()
        .await;

    let expired = format_expiry(Utc::now() - Duration::seconds(30));
    let mut creds = CLIENT.to_vec();
    creds.push((keys::ACCESS_TOKEN, "cc1"));
    creds.push((keys::EXPIRES_IN, expired.as_str()));

    let store = store();
    let integration = create_integration(&store, &server.url(), None, &creds);
    let (flow, _) = flow(&store, &integration);

    let result = flow.authenticate().await;

    assert!(matches!(result, Err(FlowError::Transport(_))));
    let stored = store.load_credentials(integration.id).unwrap();
    assert!(!stored.contains(keys::ACCESS_TOKEN));
    assert!(!stored.contains(keys::EXPIRES_IN));
    assert_eq!(stored.get(keys::CLIENT_SECRET), Some("secret-1"));
    assert_eq!(flow.status().unwrap(), AuthStatus::Unauthenticated);
    token.assert_async().await;
}

#[tokio::test]
async fn test_missing_client_secret_is_missing_grant() {
    let mut server = mockito::Server::new_async().await;
    let token = server.mock("POST", "/oauth/token").expect(0).create_async().await;

    let store = store();
    let integration = create_integration(&store, &server.url(), None, &[(keys::CLIENT_ID, "client-1")]);
    let (flow, _) = flow(&store, &integration);

    assert!(matches!(flow.authenticate().await, Err(FlowError::MissingGrant(_))));
    token.assert_async().await;
}

#[tokio::test]
async fn test_missing_token_endpoint_is_config_error() {
    let store = store();
    let option = store.ensure_option("payments").unwrap();
    let mut new = NewIntegration::new(option.id, "http://127.0.0.1:9", GrantType::ClientCredentials);
    new.credentials = CLIENT.into_iter().collect();
    let integration = store.create(&new).unwrap();
    let (flow, _) = flow(&store, &integration);

    assert!(matches!(
        flow.acquire_token().await,
        Err(FlowError::AuthenticationConfig(_))
    ));
}

#[tokio::test]
async fn test_form_encoded_token_request() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/oauth/token")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_header("accept", "application/json")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()))
        .with_status(200)
        .with_body(r#"{"access_token":"cc1"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = store();
    let option = store.ensure_option("payments").unwrap();
    let mut new = NewIntegration::new(option.id, server.url(), GrantType::ClientCredentials);
    new.authentication_endpoint = Some("/oauth/token".to_string());
    new.form_encoded = true;
    new.credentials = CLIENT.into_iter().collect();
    let integration = store.create(&new).unwrap();
    let (flow, _) = flow(&store, &integration);

    flow.acquire_token().await.unwrap();

    // no expires_in: the token never expires on its own
    assert_eq!(flow.status().unwrap(), AuthStatus::Authenticated { expires_at: None });
    token.assert_async().await;
}

/// Credential store whose removals are lost, so an expired token never goes
/// away.
struct StickyCredentials(Mutex<Credentials>);

impl CredentialStore for StickyCredentials {
    fn all(&self) -> anyhow::Result<Credentials> {
        Ok(self.0.lock().unwrap().clone())
    }

    fn replace_all(&self, credentials: &Credentials) -> anyhow::Result<()> {
        *self.0.lock().unwrap() = credentials.clone();
        Ok(())
    }

    fn remove_all(&self, _keys: &[&str]) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_renewal_is_bounded() {
    let mut server = mockito::Server::new_async().await;
    let token = server.mock("POST", "/oauth/token").expect(0).create_async().await;

    let expired = format_expiry(Utc::now() - Duration::seconds(30));
    let mut creds = CLIENT.to_vec();
    creds.push((keys::ACCESS_TOKEN, "cc1"));
    creds.push((keys::EXPIRES_IN, expired.as_str()));

    let store = store();
    let integration = create_integration(&store, &server.url(), None, &creds);
    let executor = Arc::new(
        RequestExecutor::new(integration.base_url.clone(), None, std::time::Duration::from_secs(5)).unwrap(),
    );
    let sticky: Arc<dyn CredentialStore> =
        Arc::new(StickyCredentials(Mutex::new(creds.iter().copied().collect())));
    let flow = ClientCredentialsFlow::new(
        integration.clone(),
        sticky,
        executor,
        ClientCredentialsOptions::from_integration(&integration),
    );

    assert!(matches!(flow.authenticate().await, Err(FlowError::RenewalExhausted)));
    token.assert_async().await;
}
