//! Core contract for Eventgate Connect destination adapters
//!
//! Eventgate Connect delivers batches of already-flattened analytics event
//! records into configured data destinations (warehouses, object stores).
//! This crate holds the pieces every adapter shares:
//!
//! - the [`DestinationAdapter`] trait (`init` / `deliver` / `drop_destination`)
//! - the data model ([`RecordKind`], [`TableNames`], [`InsertResult`], ...)
//! - the error taxonomy ([`ConnectorError`])
//!
//! Adapter crates (e.g. `eventgate-sink-warehouse`) implement the trait and
//! are driven by the dispatching layer, which owns batching, requeueing and
//! dead-lettering policy.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{ConnectorError, ConnectorResult};
pub use traits::DestinationAdapter;
pub use types::{
    DropSummary, FlatRecord, InsertMeta, InsertResult, InsertStatus, RecordKind, TableNames,
};
