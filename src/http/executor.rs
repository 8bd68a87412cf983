//! Generic request executor used by flows and business calls.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::Headers;

/// Failure of an outbound request.
///
/// Connection problems, timeouts and rejected responses all surface through
/// this one type; callers do not branch on the variant.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Bad integration response ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Invalid header '{name}'")]
    InvalidHeader { name: String },
}

/// One call to execute.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the chosen base URL, or an absolute URL.
    pub endpoint: String,
    pub body: Option<Value>,
    /// Call-specific headers; they win over default and auth headers.
    pub headers: Headers,
    pub include_auth_headers: bool,
    pub use_auth_url: bool,
    pub form_encoded: bool,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body: None,
            headers: Headers::new(),
            include_auth_headers: true,
            use_auth_url: false,
            form_encoded: false,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Skips the stored authentication headers for this call.
    pub fn without_authentication(mut self) -> Self {
        self.include_auth_headers = false;
        self
    }

    /// Sends the call to the auth URL instead of the base URL.
    pub fn on_auth_url(mut self) -> Self {
        self.use_auth_url = true;
        self
    }

    /// Encodes the body as `application/x-www-form-urlencoded` instead of JSON.
    pub fn form_encoded(mut self, form_encoded: bool) -> Self {
        self.form_encoded = form_encoded;
        self
    }
}

/// HTTP executor bound to one integration's endpoints.
///
/// The authentication headers are primed by the authentication flows and
/// applied to every call that asks for them.
pub struct RequestExecutor {
    client: Client,
    base_url: String,
    auth_url: String,
    default_headers: Headers,
    auth_headers: RwLock<Headers>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("auth_url", &self.auth_url)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Creates an executor. `auth_url` falls back to `base_url` when `None`.
    pub fn new(
        base_url: impl Into<String>,
        auth_url: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.into();
        let auth_url = auth_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| base_url.clone());

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            auth_url,
            default_headers: Headers::new(),
            auth_headers: RwLock::new(Headers::new()),
        })
    }

    pub fn with_default_headers(mut self, headers: Headers) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    /// Replaces the authentication headers applied to subsequent calls.
    pub fn set_authentication_headers(&self, headers: Headers) {
        *self.auth_headers.write().unwrap_or_else(PoisonError::into_inner) = headers;
    }

    pub fn authentication_headers(&self) -> Headers {
        self.auth_headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_authentication_headers(&self) {
        self.set_authentication_headers(Headers::new());
    }

    /// Joins `endpoint` onto the chosen host. Absolute URLs pass through.
    pub fn resolve_url(&self, endpoint: &str, use_auth_url: bool) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }

        let host = if use_auth_url {
            &self.auth_url
        } else {
            &self.base_url
        };

        if endpoint.is_empty() {
            return host.to_string();
        }

        format!(
            "{}/{}",
            host.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn merged_headers(&self, request: &ApiRequest) -> Result<HeaderMap, TransportError> {
        let auth_headers = if request.include_auth_headers {
            self.authentication_headers()
        } else {
            Headers::new()
        };

        let mut merged = HeaderMap::new();
        for (name, value) in self
            .default_headers
            .iter()
            .chain(auth_headers.iter())
            .chain(request.headers.iter())
        {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::InvalidHeader { name: name.clone() })?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| TransportError::InvalidHeader { name: name.clone() })?;
            merged.insert(header_name, header_value);
        }

        Ok(merged)
    }

    /// Executes `request` and returns the parsed response body.
    ///
    /// Only 200 and 202 count as success. Bodies are parsed as JSON, then as a
    /// form-encoded map; anything else comes back as a JSON string, and an
    /// empty body as `null`.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        let url = self.resolve_url(&request.endpoint, request.use_auth_url);
        let headers = self.merged_headers(request)?;

        debug!(
            method = %request.method,
            url = %url,
            form_encoded = request.form_encoded,
            "Executing integration request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers);

        if let Some(body) = &request.body {
            builder = if request.form_encoded {
                builder.form(body)
            } else {
                builder.json(body)
            };
        }

        let response = builder.send().await.map_err(|source| {
            warn!(url = %url, error = %source, "Integration request failed");
            TransportError::Request {
                url: url.clone(),
                source,
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            warn!(url = %url, status = status.as_u16(), "Bad integration response");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(parse_body(&body))
    }
}

fn parse_body(body: &str) -> Value {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }

    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        return json;
    }

    if trimmed.contains('=') {
        if let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(trimmed) {
            return Value::Object(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            );
        }
    }

    Value::String(body.to_string())
}
