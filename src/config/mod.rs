use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "integrations.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Where this application is reachable, used to build redirect URIs.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Callback path; `{id}` is replaced with the integration id.
    #[serde(default = "default_redirect_path")]
    pub redirect_path: String,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_redirect_path() -> String {
    "/integration/{id}/authorization".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            redirect_path: default_redirect_path(),
        }
    }
}

impl AppConfig {
    /// Absolute redirect URI for integration `id`.
    pub fn redirect_url(&self, id: i64) -> String {
        let path = self.redirect_path.replace("{id}", &id.to_string());
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Outbound HTTP client settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    500
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_state_length")]
    pub state_length: usize,
    /// Tokens expiring within this many seconds are renewed early. 0 renews
    /// only once `now >= expiry`.
    #[serde(default)]
    pub renewal_window_seconds: i64,
}

fn default_state_length() -> usize {
    16
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            state_length: default_state_length(),
            renewal_window_seconds: 0,
        }
    }
}

impl AuthConfig {
    /// Negative values count as zero; values past chrono's range saturate.
    pub fn renewal_window(&self) -> Duration {
        Duration::try_seconds(self.renewal_window_seconds.max(0)).unwrap_or_else(Duration::max_value)
    }
}

/// Integration option names seeded at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(default)]
    pub options: Vec<String>,
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}

impl Config {
    /// Config file at `INTEGRATIONS_CONFIG` (defaults otherwise), then env
    /// overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("INTEGRATIONS_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(v) = std::env::var("INTEGRATIONS_BASE_URL") {
            cfg.app.base_url = v;
        }
        if let Ok(v) = std::env::var("INTEGRATIONS_DATABASE") {
            cfg.database.path = v;
        }
        if let Ok(v) = std::env::var("INTEGRATIONS_PORT") {
            cfg.server.port = v
                .parse::<u16>()
                .with_context(|| format!("Invalid INTEGRATIONS_PORT '{}'", v))?;
        }

        Ok(cfg)
    }
}
