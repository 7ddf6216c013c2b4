use std::sync::Arc;

use anyhow::Context;

use shopledger_api::app::{AppServices, build_app};
use shopledger_infra::config::AppConfig;
use shopledger_observability::ObservabilityConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let config = AppConfig::load().context("failed to load configuration")?;

    shopledger_observability::init(&ObservabilityConfig {
        level: config.log.level.clone(),
        json: config.log.json,
    });

    let services = AppServices::from_config(&config)
        .await
        .context("failed to initialise stock store")?;
    let app = build_app(Arc::new(services));

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!(
        address = %listener.local_addr()?,
        environment = %config.environment,
        backend = ?config.storage.backend,
        "listening"
    );

    axum::serve(listener, app).await.context("server terminated")?;
    Ok(())
}
