//! Authentication status derived from stored credentials.

use chrono::{DateTime, Duration, Utc};

use crate::credentials::{parse_expiry, Credentials};

/// Where an integration stands, computed once per `authenticate()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// No access token stored: a grant must be obtained first.
    Unauthenticated,
    /// Access token present and not due for renewal. `None` means the
    /// provider never announced an expiry.
    Authenticated { expires_at: Option<DateTime<Utc>> },
    /// Access token present but due for renewal. `None` means the stored
    /// expiry could not be read.
    Expired { expires_at: Option<DateTime<Utc>> },
}

impl AuthStatus {
    /// Classifies `credentials` at `now`.
    ///
    /// A token is due once `now + renewal_window >= expires_in`; with a zero
    /// window that is exactly `now >= expires_in`.
    pub fn evaluate(credentials: &Credentials, now: DateTime<Utc>, renewal_window: Duration) -> Self {
        if credentials.access_token().is_none() {
            return AuthStatus::Unauthenticated;
        }

        let Some(raw) = credentials.expires_in() else {
            return AuthStatus::Authenticated { expires_at: None };
        };

        // a window reaching past chrono's range covers every expiry
        let horizon = now.checked_add_signed(renewal_window);

        match parse_expiry(raw) {
            Some(expires_at) if horizon.map_or(true, |due| due >= expires_at) => AuthStatus::Expired {
                expires_at: Some(expires_at),
            },
            Some(expires_at) => AuthStatus::Authenticated {
                expires_at: Some(expires_at),
            },
            None => AuthStatus::Expired { expires_at: None },
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthStatus::Authenticated { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Unauthenticated => "unauthenticated",
            AuthStatus::Authenticated { .. } => "authenticated",
            AuthStatus::Expired { .. } => "expired",
        }
    }
}
