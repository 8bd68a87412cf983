// Service configuration
pub mod config;

// Encrypted credential mappings
pub mod credentials;

// Integration records and their SQLite store
pub mod integration;

// Outbound request execution
pub mod http;

// OAuth 2.0 authentication flows
pub mod flows;

// Per-integration orchestration and locking
pub mod service;

// Redirect callback and authorize endpoints
pub mod api;
