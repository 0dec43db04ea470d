//! Warehouse destination adapter
//!
//! Ties the lifecycle, payload shaper, write engine and retry engine together
//! behind the [`DestinationAdapter`] contract. One adapter instance serves
//! one destination configuration; `init` is safe to call on every batch and
//! only the first call per process does backend work.

use crate::config::WarehouseSinkConfig;
use crate::lifecycle::{self, pipe_name, AdapterSession};
use crate::retry::with_retry;
use crate::schema;
use crate::write::WriteEngine;
use async_trait::async_trait;
use eventgate_connect_core::{
    ConnectorError, ConnectorResult, DestinationAdapter, DropSummary, FlatRecord, InsertResult,
    RecordKind, TableNames,
};
use std::time::Instant;
use tracing::{info, warn};

pub struct WarehouseSinkConnector {
    config: WarehouseSinkConfig,
    session: AdapterSession,
}

impl WarehouseSinkConnector {
    pub fn new(config: WarehouseSinkConfig) -> Self {
        Self {
            config,
            session: AdapterSession::new(),
        }
    }

    /// `deliver` with the record kind given by its wire name.
    pub async fn deliver_named(
        &mut self,
        batch: Vec<FlatRecord>,
        kind: &str,
        tables: &TableNames,
    ) -> ConnectorResult<InsertResult> {
        let kind: RecordKind = kind.parse()?;
        self.deliver(batch, kind, tables).await
    }

    async fn drop_one(&self, statement: &str, resource: &str, summary: &mut DropSummary) {
        let backend = match self.session.backend() {
            Ok(backend) => backend,
            Err(_) => return,
        };
        match backend.execute(statement, &[]).await {
            Ok(_) => {
                info!(resource = resource, "Dropped destination resource");
                summary.record(resource);
            }
            Err(e) => {
                warn!(resource = resource, "Failed to drop resource: {}", e);
            }
        }
    }
}

#[async_trait]
impl DestinationAdapter for WarehouseSinkConnector {
    /// Bootstrap the destination end to end. Returns the readiness flags in
    /// bootstrap order; once a flag is true it stays true, so repeated calls
    /// cost nothing.
    async fn init(&mut self, tables: &TableNames) -> ConnectorResult<Vec<bool>> {
        lifecycle::ensure_ready(&mut self.session, &self.config, tables).await
    }

    /// Deliver one batch of `kind` records to its table. A batch may arrive
    /// before `init` was ever called; bootstrap runs lazily here and is free
    /// once the readiness flags are set. Recoverable contention is retried;
    /// everything else surfaces in the returned result.
    async fn deliver(
        &mut self,
        batch: Vec<FlatRecord>,
        kind: RecordKind,
        tables: &TableNames,
    ) -> ConnectorResult<InsertResult> {
        let started = Instant::now();
        let table = tables.table_for(kind);
        let method = self
            .session
            .transport
            .map(|t| t.as_str())
            .unwrap_or("insert");

        if batch.is_empty() {
            return Ok(InsertResult::success(table, 0, 0, method));
        }

        lifecycle::ensure_ready(&mut self.session, &self.config, tables).await?;
        let transport = self.session.transport.ok_or_else(|| {
            ConnectorError::invalid_state("bootstrap finished without binding a transport")
        })?;
        let engine = WriteEngine::from_session(&self.session, &self.config)?;
        let schema = schema::schema_for(kind);
        let batch_len = batch.len();

        let mut result = with_retry(
            table,
            transport.as_str(),
            batch_len,
            self.config.warehouse.max_retries,
            || engine.write(transport, &batch, table, schema),
        )
        .await;

        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Drop everything the bootstrap may have created, best effort: a
    /// resource that fails to drop is logged and skipped. Readiness flags are
    /// not reset; an adapter that had its destination dropped is done.
    async fn drop_destination(&mut self, tables: &TableNames) -> ConnectorResult<DropSummary> {
        if !self.session.connection_ready {
            lifecycle::connect(&mut self.session, &self.config).await?;
        }

        let mut summary = DropSummary::default();

        for table in tables.all() {
            if let Some(pipe) = &self.config.warehouse.pipe {
                let pipe = pipe_name(&pipe.pipe_name, table);
                self.drop_one(
                    &format!("DROP PIPE IF EXISTS {}", pipe),
                    &pipe,
                    &mut summary,
                )
                .await;
            }
            if let Some(task) = &self.config.warehouse.task {
                let task = format!("{}_{}", task.task_name, table);
                self.drop_one(
                    &format!("DROP TASK IF EXISTS {}", task),
                    &task,
                    &mut summary,
                )
                .await;
            }
            self.drop_one(
                &format!("DROP TABLE IF EXISTS {}", table),
                table,
                &mut summary,
            )
            .await;
        }

        if let Some(stage) = &self.config.warehouse.stage_name {
            self.drop_one(
                &format!("DROP STAGE IF EXISTS {}", stage),
                stage,
                &mut summary,
            )
            .await;
        }

        info!(
            dropped = summary.num_resources_dropped,
            "Destination drop finished"
        );
        Ok(summary)
    }
}
