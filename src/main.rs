//! aigateway server
//!
//! Loads settings and channel configuration, then serves the gateway.

use anyhow::{Context, Result};
use tracing::info;

use aigateway::{create_router, ChannelsConfig, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("Failed to load server settings")?;

    init_logging(&settings);

    let channels = ChannelsConfig::load_default().context("Failed to load channel configuration")?;
    info!(
        "Channel configuration loaded: {} channels, {} models",
        channels.channels.len(),
        channels.list_models().len()
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let app = create_router(settings, channels).await?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("aigateway listening on {}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

/// Initialize the tracing subscriber from settings
fn init_logging(settings: &Settings) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| settings.logging.level.clone());

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> =
        if settings.logging.format == "json" {
            Box::new(
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .finish(),
            )
        } else {
            Box::new(
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .finish(),
            )
        };

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Logging was already initialized");
    }
}
