//! Warehouse Sink Connector for EventGate Connect
//!
//! Delivers flattened analytics records to a cloud data warehouse through the
//! SQL-over-REST API, with an optional staging area and ingest pipe for bulk
//! loading.
//!
//! # Features
//!
//! - **Idempotent Bootstrap**: database, schema, tables, stage and pipes are
//!   created on first use and verified writable before delivery starts
//! - **Four Write Transports**: direct `insert`, staged `copy`, asynchronous
//!   `pipe` ingestion, and `put` for warehouse-side scheduled loads
//! - **Contention Retries**: lock contention is retried with jittered
//!   exponential backoff; everything else fails fast
//! - **Key-Pair Ingest Auth**: the pipe transport authenticates with an RSA
//!   key pair and short-lived JWTs
//!
//! # Example Configuration
//!
//! ```toml
//! connector_name = "warehouse-sink"
//!
//! [tables]
//! event_table = "ANALYTICS_EVENTS"
//! user_table = "ANALYTICS_USERS"
//! group_table = "ANALYTICS_GROUPS"
//!
//! [warehouse]
//! account = "myorg-account123"
//! user = "EVENTGATE"
//! database = "ANALYTICS"
//! schema = "PUBLIC"
//! warehouse = "LOAD_WH"
//! role = "EVENTGATE_ROLE"
//! stage_name = "EVENTGATE_STAGE"     # enables the copy transport
//!
//! [warehouse.pipe]                   # enables the pipe transport
//! pipe_name = "EVENTGATE_PIPE"
//! private_key_path = "/etc/eventgate/rsa_key.p8"
//! ```
//!
//! The password is supplied via the `WAREHOUSE_PASSWORD` environment
//! variable, never the configuration file.

pub mod client;
pub mod config;
pub mod connector;
pub mod lifecycle;
pub mod payload;
pub mod retry;
pub mod schema;
pub mod write;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::WarehouseSinkConfig;
pub use connector::WarehouseSinkConnector;
