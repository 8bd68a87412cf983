//! HTTP surface: the OAuth redirect callback and a browser entry point that
//! starts authorization.
//!
//! 1. Browser opens GET /integration/:id/authorize → redirect to provider
//! 2. User grants access on the provider's site
//! 3. Provider redirects to GET /integration/:id/authorization?code&state
//! 4. State is verified, the code exchanged and tokens stored encrypted

mod authorization;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::{IntegrationService, ServiceError};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for integration endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(_) => AppError::NotFound(err.to_string()),
            ServiceError::UnsupportedGrant { .. } => AppError::BadRequest(err.to_string()),
            ServiceError::AuthorizationRequired { .. } => AppError::Unauthorized(err.to_string()),
            ServiceError::Transport(_) => AppError::BadGateway(err.to_string()),
            // flow failures (state, code, token endpoint) are server errors on
            // the callback
            ServiceError::Flow(_) | ServiceError::Storage(_) => AppError::ServerError(err.to_string()),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IntegrationService>,
}

/// Create the integration router
pub fn create_router(service: Arc<IntegrationService>) -> Router {
    Router::new()
        .route(
            "/integration/:id/authorization",
            get(authorization::authorization_callback),
        )
        .route("/integration/:id/authorize", get(authorization::authorize))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}
