//! Object Store Sink Connector for EventGate Connect
//!
//! Archives flattened analytics records to cloud object storage as
//! newline-delimited JSON, one object per delivered batch. Useful as a raw
//! archive next to a warehouse destination, or as a landing zone for
//! downstream batch loaders.
//!
//! # Example Configuration
//!
//! ```toml
//! connector_name = "objectstore-sink"
//!
//! [tables]
//! event_table = "ANALYTICS_EVENTS"
//! user_table = "ANALYTICS_USERS"
//! group_table = "ANALYTICS_GROUPS"
//!
//! [store]
//! provider = "s3"
//! bucket = "eventgate-archive"
//! prefix = "raw"
//! region = "us-east-1"
//! ```
//!
//! S3 credentials come from the standard AWS environment variables, or from
//! `OBJECTSTORE_ACCESS_KEY_ID` and `OBJECTSTORE_SECRET_KEY`.

pub mod config;
pub mod connector;
pub mod store;

pub use config::ObjectStoreSinkConfig;
pub use connector::ObjectStoreSinkConnector;
