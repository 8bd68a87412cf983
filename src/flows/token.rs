//! Token endpoint requests and responses shared by both grant flows.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::FlowError;
use crate::credentials::{format_expiry, keys, Credentials};
use crate::http::{ApiRequest, Headers};

/// Token endpoint response (standard OAuth 2.0, lenient about types).
#[derive(Deserialize, Debug)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<ExpiresIn>,
}

/// Some providers send `expires_in` as a string, and form-encoded responses
/// always do.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Option<i64> {
        match self {
            ExpiresIn::Seconds(s) => Some(*s),
            ExpiresIn::Fractional(s) => Some(*s as i64),
            ExpiresIn::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// What a successful token response changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_token_rotated: bool,
}

/// Builds a POST to the token endpoint on the auth URL.
pub(crate) fn token_request(endpoint: &str, params: Vec<(&str, String)>, form_encoded: bool) -> ApiRequest {
    let body: Map<String, Value> = params
        .into_iter()
        .map(|(name, value)| (name.to_string(), Value::String(value)))
        .collect();

    ApiRequest::post(endpoint)
        .with_body(Value::Object(body))
        .with_header("Accept", "application/json")
        .without_authentication()
        .on_auth_url()
        .form_encoded(form_encoded)
}

/// Applies a token endpoint response to `credentials`.
///
/// `access_token` is required. `expires_in` (seconds) becomes an absolute
/// expiry relative to `now`; when the provider omits it any previous expiry is
/// dropped so it cannot outlive the token it belonged to. A missing
/// `refresh_token` keeps the stored one.
pub fn apply_token_response(
    credentials: &mut Credentials,
    response: &Value,
    now: DateTime<Utc>,
) -> Result<TokenGrant, FlowError> {
    let parsed: TokenResponse =
        serde_json::from_value(response.clone()).map_err(|_| FlowError::TokenNotReceived)?;

    let access_token = parsed
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or(FlowError::TokenNotReceived)?;

    let expires_at = parsed
        .expires_in
        .as_ref()
        .and_then(ExpiresIn::seconds)
        .map(|seconds| expiry_after(now, seconds))
        .transpose()?;

    credentials.insert(keys::ACCESS_TOKEN, access_token);
    match expires_at {
        Some(at) => {
            credentials.insert(keys::EXPIRES_IN, format_expiry(at));
        }
        None => {
            credentials.remove(keys::EXPIRES_IN);
        }
    }

    let refresh_token = parsed.refresh_token.filter(|token| !token.is_empty());
    let refresh_token_rotated = refresh_token.is_some();
    if let Some(token) = refresh_token {
        credentials.insert(keys::REFRESH_TOKEN, token);
    }

    Ok(TokenGrant {
        expires_at,
        refresh_token_rotated,
    })
}

/// `now + seconds`, rejecting lifetimes chrono cannot represent.
fn expiry_after(now: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>, FlowError> {
    Duration::try_seconds(seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| FlowError::MalformedTokenResponse(format!("expires_in {} out of range", seconds)))
}

/// Headers that authenticate business calls with the stored token.
///
/// `Authorization` is left out when no access token is stored.
pub fn bearer_headers(credentials: &Credentials) -> Headers {
    let mut headers = Headers::new();
    headers.insert("Connection".to_string(), "Keep-Alive".to_string());
    if let Some(token) = credentials.access_token() {
        headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    }
    headers
}
