// Integration tests for GET /integration/:id/authorization and /authorize

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use integration_manager::api::create_router;
use integration_manager::config::Config;
use integration_manager::credentials::{keys, Cipher, Credentials};
use integration_manager::integration::{GrantType, Integration, IntegrationStore, NewIntegration};
use integration_manager::service::IntegrationService;
use mockito::Matcher;
use std::sync::Arc;
use tower::ServiceExt;

fn setup() -> (Router, Arc<IntegrationStore>) {
    let cipher = Cipher::from_bytes(&[9u8; 32]).unwrap();
    let store = Arc::new(IntegrationStore::with_cipher(":memory:", cipher).unwrap());

    let mut config = Config::default();
    config.app.base_url = "https://app.example.com".to_string();

    let service = Arc::new(IntegrationService::new(Arc::clone(&store), &config));
    (create_router(service), store)
}

fn create_integration(store: &IntegrationStore, base_url: &str, credentials: &[(&str, &str)]) -> Integration {
    let option = store.ensure_option("exact_online").unwrap();
    let mut new = NewIntegration::new(option.id, base_url, GrantType::AuthorizationCode);
    new.authorization_endpoint = Some("/oauth/authorize".to_string());
    new.authentication_endpoint = Some("/oauth/token".to_string());
    new.use_state = true;
    new.credentials = [(keys::CLIENT_ID, "client-1"), (keys::CLIENT_SECRET, "secret-1")]
        .into_iter()
        .chain(credentials.iter().copied())
        .collect::<Credentials>();
    store.create(&new).unwrap()
}

async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app
        .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8_lossy(&body).to_string())
}

fn assert_token_state_purged(store: &IntegrationStore, id: i64) {
    let remaining = store.load_credentials(id).unwrap();
    for key in keys::TOKEN_STATE {
        assert!(!remaining.contains(key), "{} should have been purged", key);
    }
}

/// Valid code and state: token exchanged with the configured redirect URI.
#[tokio::test]
async fn test_callback_success() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/oauth/token")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "grant_type": "authorization_code",
            "code": "XYZ",
            "redirect_uri": "https://app.example.com/integration/1/authorization"
        })))
        .with_status(200)
        .with_body(r#"{"access_token":"t1","refresh_token":"r1","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let (app, store) = setup();
    let integration = create_integration(&store, &server.url(), &[(keys::STATE, "abc123")]);
    assert_eq!(integration.id, 1);

    let (status, _, body) = get(app, "/integration/1/authorization?code=XYZ&state=abc123").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Authorized.");
    let stored = store.load_credentials(integration.id).unwrap();
    assert_eq!(stored.access_token(), Some("t1"));
    assert_eq!(stored.refresh_token(), Some("r1"));
    assert!(!stored.contains(keys::STATE));
    token.assert_async().await;
}

#[tokio::test]
async fn test_callback_missing_state() {
    let mut server = mockito::Server::new_async().await;
    let token = server.mock("POST", "/oauth/token").expect(0).create_async().await;

    let (app, store) = setup();
    let integration = create_integration(
        &store,
        &server.url(),
        &[(keys::STATE, "abc123"), (keys::ACCESS_TOKEN, "old")],
    );

    let (status, _, body) = get(app, &format!("/integration/{}/authorization?code=XYZ", integration.id)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["error"], "Integration requires state");
    assert_token_state_purged(&store, integration.id);
    token.assert_async().await;
}

#[tokio::test]
async fn test_callback_invalid_state() {
    let (app, store) = setup();
    let integration = create_integration(&store, "http://127.0.0.1:9", &[(keys::STATE, "abc123")]);

    let (status, _, body) = get(
        app,
        &format!("/integration/{}/authorization?code=XYZ&state=forged", integration.id),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("Redirect contains invalid state"));
    assert_token_state_purged(&store, integration.id);
}

#[tokio::test]
async fn test_callback_missing_code() {
    let (app, store) = setup();
    let integration = create_integration(&store, "http://127.0.0.1:9", &[(keys::STATE, "abc123")]);

    let (status, _, _) = get(
        app,
        &format!("/integration/{}/authorization?state=abc123", integration.id),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_token_state_purged(&store, integration.id);
}

#[tokio::test]
async fn test_callback_provider_error_purges() {
    let (app, store) = setup();
    let integration = create_integration(
        &store,
        "http://127.0.0.1:9",
        &[(keys::STATE, "abc123"), (keys::REFRESH_TOKEN, "r1")],
    );

    let (status, _, body) = get(
        app,
        &format!(
            "/integration/{}/authorization?error=access_denied&error_description=User+cancelled",
            integration.id
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("access_denied"));
    assert_token_state_purged(&store, integration.id);
}

#[tokio::test]
async fn test_callback_unknown_integration() {
    let (app, _store) = setup();

    let (status, _, body) = get(app, "/integration/999/authorization?code=XYZ").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("999"));
}

#[tokio::test]
async fn test_authorize_redirects_to_provider() {
    let (app, store) = setup();
    let integration = create_integration(&store, "https://login.example.com", &[]);

    let (status, headers, _) = get(app, &format!("/integration/{}/authorize", integration.id)).await;

    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
    let location = headers.get(header::LOCATION).unwrap().to_str().unwrap();
    assert!(location.starts_with("https://login.example.com/oauth/authorize?response_type=code"));

    let state = store
        .load_credentials(integration.id)
        .unwrap()
        .get(keys::STATE)
        .map(str::to_string)
        .expect("state stored");
    assert!(location.contains(&format!("state={}", state)));
}

#[tokio::test]
async fn test_authorize_when_already_authenticated() {
    let (app, store) = setup();
    let integration = create_integration(&store, "https://login.example.com", &[(keys::ACCESS_TOKEN, "t1")]);

    let (status, _, body) = get(app, &format!("/integration/{}/authorize", integration.id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Authenticated.");
}
