use anyhow::{Context, Result};
use integration_manager::api::create_router;
use integration_manager::config::Config;
use integration_manager::integration::IntegrationStore;
use integration_manager::service::IntegrationService;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "integration_manager=info".into()),
        )
        .init();

    info!("Integration manager starting...");

    let config = Config::from_env().context("Failed to load configuration")?;

    let encryption_key = std::env::var("INTEGRATIONS_ENCRYPTION_KEY")
        .context("INTEGRATIONS_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;

    info!(
        database = %config.database.path,
        base_url = %config.app.base_url,
        port = config.server.port,
        "Configuration loaded"
    );

    let store = Arc::new(
        IntegrationStore::new(&config.database.path, &encryption_key)
            .context("Failed to initialize integration store")?,
    );

    for name in &config.integrations.options {
        let option = store
            .ensure_option(name)
            .with_context(|| format!("Failed to seed integration option '{}'", name))?;
        info!(option_id = option.id, name = %option.name, "Integration option ready");
    }

    let service = Arc::new(IntegrationService::new(Arc::clone(&store), &config));
    let router = create_router(service);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "Integration API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Integration API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Integration manager stopped");

    Ok(())
}
