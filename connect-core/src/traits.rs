//! The uniform adapter contract every destination exposes
//!
//! The dispatching layer owns one adapter per configured destination and
//! drives it through this trait. Adapters are expected to bootstrap their
//! remote resources lazily and idempotently: `deliver` may arrive before
//! `init` was ever called.

use crate::error::ConnectorResult;
use crate::types::{DropSummary, FlatRecord, InsertResult, RecordKind, TableNames};
use async_trait::async_trait;

/// Contract between the dispatcher and one destination.
#[async_trait]
pub trait DestinationAdapter: Send {
    /// Verify or create the destination's durable resources.
    ///
    /// Idempotent and cheap after first success (readiness is cached for the
    /// process lifetime). Returns one readiness flag per bootstrap stage.
    /// Errors are fatal for this invocation; the caller may invoke again on a
    /// later batch, re-running only the unready stages.
    async fn init(&mut self, tables: &TableNames) -> ConnectorResult<Vec<bool>>;

    /// Deliver one batch of flat records to the table for `kind`.
    ///
    /// The steady-state hot path, called once per inbound batch. An empty
    /// batch is trivially successful and performs no backend call. Delivery
    /// is at-least-once: a returned error result means the batch was not
    /// (fully) applied, never that it must not be resubmitted.
    async fn deliver(
        &mut self,
        batch: Vec<FlatRecord>,
        kind: RecordKind,
        tables: &TableNames,
    ) -> ConnectorResult<InsertResult>;

    /// Destructively delete all durable destination resources for `tables`.
    ///
    /// Administrative operation, never called from the hot path. Best-effort:
    /// individual deletion failures are collected, not propagated.
    async fn drop_destination(&mut self, tables: &TableNames) -> ConnectorResult<DropSummary>;
}
