use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::{AppError, AppState};
use crate::flows::AuthenticationOutcome;

/// Redirect query parameters
#[derive(Debug, Deserialize)]
pub struct AuthorizationCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /integration/:id/authorization
///
/// Provider redirect target. Verifies the state nonce, exchanges the code and
/// stores the tokens. A provider-reported `error` purges the token state.
pub async fn authorization_callback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(callback): Query<AuthorizationCallback>,
) -> Result<Response, AppError> {
    debug!(integration_id = id, "Authorization redirect received");

    if let Some(provider_error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(
            integration_id = id,
            error = %provider_error,
            description = %description,
            "Authorization denied by provider"
        );
        state
            .service
            .reject_authorization(id, &provider_error)
            .await?;
        return Err(AppError::ServerError(format!(
            "Authorization failed: {} - {}",
            provider_error, description
        )));
    }

    state
        .service
        .complete_authorization(id, callback.code.as_deref(), callback.state.as_deref())
        .await
        .map_err(|e| {
            error!(integration_id = id, error = %e, "Authorization redirect rejected");
            AppError::from(e)
        })?;

    info!(integration_id = id, "Integration authorized");
    Ok((StatusCode::OK, "Authorized.").into_response())
}

/// GET /integration/:id/authorize
///
/// Sends the browser to the provider when a user grant is needed; otherwise
/// the integration already holds (or just obtained) a valid token.
pub async fn authorize(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    match state.service.authenticate(id).await? {
        AuthenticationOutcome::AuthorizationRequired { url } => {
            info!(integration_id = id, "Redirecting to authorization endpoint");
            Ok(Redirect::temporary(&url).into_response())
        }
        _ => Ok((StatusCode::OK, "Authenticated.").into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_deserialization() {
        let query = "code=XYZ&state=abc123";
        let callback: AuthorizationCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.code.as_deref(), Some("XYZ"));
        assert_eq!(callback.state.as_deref(), Some("abc123"));
        assert!(callback.error.is_none());

        let query = "error=access_denied&error_description=User+cancelled";
        let callback: AuthorizationCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.error.as_deref(), Some("access_denied"));
        assert_eq!(callback.error_description.as_deref(), Some("User cancelled"));
        assert!(callback.code.is_none());
    }
}
