//! Warehouse Sink Connector - Main Entry Point
//!
//! Bootstraps the destination and leaves the adapter ready for delivery, or
//! tears the destination down when `CONNECTOR_MODE=drop`.

use eventgate_connect_core::DestinationAdapter;
use eventgate_sink_warehouse::{WarehouseSinkConfig, WarehouseSinkConnector};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting EventGate Warehouse Sink Connector");

    tracing::info!("Loading configuration from CONNECTOR_CONFIG_PATH");
    let config = WarehouseSinkConfig::load()?;

    tracing::info!(
        "Configuration loaded successfully: connector_name={}, database={}, schema={}",
        config.connector_name,
        config.warehouse.database,
        config.warehouse.schema
    );

    let tables = config.tables.clone();
    let mut connector = WarehouseSinkConnector::new(config);

    match std::env::var("CONNECTOR_MODE").as_deref() {
        Ok("drop") => {
            let summary = connector.drop_destination(&tables).await?;
            tracing::info!(
                "Dropped {} destination resources: {:?}",
                summary.num_resources_dropped,
                summary.resources_dropped
            );
        }
        _ => {
            let flags = connector.init(&tables).await?;
            tracing::info!("Destination ready: readiness flags {:?}", flags);
        }
    }

    tracing::info!("Warehouse Sink Connector finished");
    Ok(())
}
