//! Object store destination adapter
//!
//! Archives each delivered batch as one newline-delimited JSON object under
//! the destination table's prefix. Object uploads are atomic, so a batch is
//! either fully archived or not at all; there is no partial acceptance.

use crate::config::ObjectStoreSinkConfig;
use crate::store;
use async_trait::async_trait;
use chrono::Utc;
use eventgate_connect_core::{
    ConnectorError, ConnectorResult, DestinationAdapter, DropSummary, FlatRecord, InsertResult,
    RecordKind, TableNames,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct ObjectStoreSinkConnector {
    config: ObjectStoreSinkConfig,
    store: Option<Arc<dyn ObjectStore>>,
    store_ready: bool,
    write_verified: bool,
}

impl ObjectStoreSinkConnector {
    pub fn new(config: ObjectStoreSinkConfig) -> Self {
        Self {
            config,
            store: None,
            store_ready: false,
            write_verified: false,
        }
    }

    #[cfg(test)]
    fn with_store(config: ObjectStoreSinkConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            store: Some(store),
            store_ready: true,
            write_verified: true,
        }
    }

    fn store(&self) -> ConnectorResult<&Arc<dyn ObjectStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| ConnectorError::invalid_state("object store client not initialized"))
    }

    /// Serialize the batch as newline-delimited JSON, gzipped unless
    /// disabled.
    fn encode_batch(&self, batch: &[FlatRecord]) -> ConnectorResult<Vec<u8>> {
        let mut ndjson = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut ndjson, record).map_err(|e| {
                ConnectorError::fatal_with_source("Failed to serialize record as JSON", e)
            })?;
            ndjson.push(b'\n');
        }

        if !self.config.store.compress_objects {
            return Ok(ndjson);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&ndjson)
            .and_then(|_| encoder.finish())
            .map_err(|e| ConnectorError::fatal_with_source("Failed to gzip batch", e))
    }
}

#[async_trait]
impl DestinationAdapter for ObjectStoreSinkConnector {
    /// Build the store client and verify it accepts writes. Both steps are
    /// sticky; repeated calls after a successful bootstrap do nothing.
    async fn init(&mut self, _tables: &TableNames) -> ConnectorResult<Vec<bool>> {
        if !self.store_ready {
            self.store = Some(store::build_store(&self.config.store)?);
            self.store_ready = true;
            info!(provider = ?self.config.store.provider, "Object store client created");
        }

        if !self.write_verified {
            let store = self.store()?;
            let probe = ObjectPath::from(format!(".{}_ready_check", self.config.connector_name));
            store
                .put(&probe, PutPayload::from(Utc::now().to_rfc3339()))
                .await
                .map_err(|e| {
                    ConnectorError::fatal_with_source("Object store rejected probe write", e)
                })?;
            if let Err(e) = store.delete(&probe).await {
                warn!("Failed to delete probe object: {}", e);
            }
            self.write_verified = true;
            info!("Object store verified writable");
        }

        Ok(vec![self.store_ready, self.write_verified])
    }

    /// Archive one batch as a single object under the table's prefix. The
    /// upload is atomic; failures report the whole batch as failed.
    async fn deliver(
        &mut self,
        batch: Vec<FlatRecord>,
        kind: RecordKind,
        tables: &TableNames,
    ) -> ConnectorResult<InsertResult> {
        let started = Instant::now();
        let table = tables.table_for(kind);

        if batch.is_empty() {
            return Ok(InsertResult::success(table, 0, 0, "put"));
        }

        let encoded = self.encode_batch(&batch)?;
        let name = object_name(table, self.config.store.compress_objects);
        let path = ObjectPath::from(format!("{}/{}", table, name));

        let mut result = match self.store()?.put(&path, PutPayload::from(encoded)).await {
            Ok(_) => {
                info!(
                    table = table,
                    object = %path,
                    records = batch.len(),
                    "Archived batch"
                );
                InsertResult::success(table, batch.len(), 0, "put")
            }
            Err(e) => InsertResult::failure(table, batch.len(), "put", e.to_string()),
        };

        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Delete every archived object under each table's prefix, best effort.
    async fn drop_destination(&mut self, tables: &TableNames) -> ConnectorResult<DropSummary> {
        if !self.store_ready {
            self.store = Some(store::build_store(&self.config.store)?);
            self.store_ready = true;
        }
        let store = Arc::clone(self.store()?);

        let mut summary = DropSummary::default();
        for table in tables.all() {
            let prefix = ObjectPath::from(table);
            let mut objects = store.list(Some(&prefix));
            let mut deleted = 0usize;

            while let Some(meta) = objects.next().await {
                let meta = match meta {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!(table = table, "Failed to list archived objects: {}", e);
                        break;
                    }
                };
                match store.delete(&meta.location).await {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!(object = %meta.location, "Failed to delete object: {}", e),
                }
            }

            if deleted > 0 {
                info!(table = table, objects = deleted, "Dropped archived objects");
                summary.record(table);
            }
        }

        Ok(summary)
    }
}

/// `<table>_<YYYY-MM-DD>_<random>.json[.gz]`, matching the staged-file
/// naming convention used by the warehouse sink.
fn object_name(table: &str, compress: bool) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let extension = if compress { "json.gz" } else { "json" };
    format!(
        "{}_{}_{}.{}",
        table,
        Utc::now().format("%Y-%m-%d"),
        random,
        extension
    )
}
