//! Object Store Sink Connector - Main Entry Point

use eventgate_connect_core::DestinationAdapter;
use eventgate_sink_objectstore::{ObjectStoreSinkConfig, ObjectStoreSinkConnector};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting EventGate Object Store Sink Connector");

    tracing::info!("Loading configuration from CONNECTOR_CONFIG_PATH");
    let config = ObjectStoreSinkConfig::load()?;

    tracing::info!(
        "Configuration loaded successfully: connector_name={}, provider={:?}",
        config.connector_name,
        config.store.provider
    );

    let tables = config.tables.clone();
    let mut connector = ObjectStoreSinkConnector::new(config);

    match std::env::var("CONNECTOR_MODE").as_deref() {
        Ok("drop") => {
            let summary = connector.drop_destination(&tables).await?;
            tracing::info!(
                "Dropped {} archived prefixes: {:?}",
                summary.num_resources_dropped,
                summary.resources_dropped
            );
        }
        _ => {
            let flags = connector.init(&tables).await?;
            tracing::info!("Destination ready: readiness flags {:?}", flags);
        }
    }

    tracing::info!("Object Store Sink Connector finished");
    Ok(())
}
