use crate::http::TransportError;

/// Errors raised by the authentication flows.
///
/// Every variant is logged where it occurs and returned to the caller. Token
/// acquisition failures additionally purge the token state of the integration
/// before they are returned.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Caller misconfiguration (missing token or authorization endpoint).
    #[error("Authentication configuration error: {0}")]
    AuthenticationConfig(String),

    /// No authorization code, refresh token or client credentials to exchange.
    #[error("No usable grant: {0}")]
    MissingGrant(String),

    /// Token endpoint answered successfully without an `access_token`.
    #[error("Access token not received")]
    TokenNotReceived,

    /// Token endpoint answered with a field that cannot be used.
    #[error("Malformed token response: {0}")]
    MalformedTokenResponse(String),

    /// A state nonce was issued but the redirect carried none.
    #[error("Integration requires state")]
    MissingState,

    /// The redirect's state does not match the issued nonce.
    #[error("Redirect contains invalid state")]
    InvalidState,

    /// The redirect carried no authorization code.
    #[error("No authorization code provided")]
    MissingCode,

    /// Client-credentials renewal still saw an expired token after clearing it.
    #[error("Token renewal did not converge")]
    RenewalExhausted,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl FlowError {
    /// Short machine-readable name, used in logs and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::AuthenticationConfig(_) => "authentication_config",
            FlowError::MissingGrant(_) => "missing_grant",
            FlowError::TokenNotReceived => "token_not_received",
            FlowError::MalformedTokenResponse(_) => "malformed_token_response",
            FlowError::MissingState => "missing_state",
            FlowError::InvalidState => "invalid_state",
            FlowError::MissingCode => "missing_code",
            FlowError::RenewalExhausted => "renewal_exhausted",
            FlowError::Transport(_) => "transport",
            FlowError::Storage(_) => "storage",
        }
    }
}
