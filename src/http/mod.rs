//! HTTP request execution against an integration's API.
//!
//! [`RequestExecutor`] is configured with a base URL and an auth URL, merges
//! default, authentication and per-call headers, and turns every response
//! outside {200, 202} into a [`TransportError`] carrying the raw body.

mod executor;

pub use executor::{ApiRequest, RequestExecutor, TransportError};
pub use reqwest::Method;

use std::collections::BTreeMap;

/// Header name to value, in the order they are applied.
pub type Headers = BTreeMap<String, String>;
