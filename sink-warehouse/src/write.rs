//! Write strategies for the warehouse destination
//!
//! One engine, four transports. `insert` binds the shaped batch directly to
//! an INSERT statement; the other three serialize the batch into a staged
//! JSON file first and differ in who loads it afterwards: `copy` issues a
//! synchronous COPY INTO and removes the staged file, `pipe` notifies the
//! ingest pipe and leaves the file for asynchronous pickup, `put` only
//! uploads and relies on a warehouse-side task to load it.

use crate::client::{PipeNotifier, SqlBackend};
use crate::config::WarehouseSinkConfig;
use crate::lifecycle::{pipe_name, AdapterSession, Transport};
use crate::payload::{self, WirePayload};
use crate::schema::{self, TableSchema};
use chrono::Utc;
use eventgate_connect_core::{ConnectorError, ConnectorResult, FlatRecord, InsertResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Executes batch writes over the session's backend using the transport the
/// lifecycle bound at bootstrap.
pub struct WriteEngine {
    backend: Arc<dyn SqlBackend>,
    notifier: Option<Arc<dyn PipeNotifier>>,
    stage_name: Option<String>,
    pipe_base: Option<String>,
    compress: bool,
}

/// A batch serialized to a local file, ready for staging.
struct StagedBatch {
    local_path: PathBuf,
    file_name: String,
}

impl WriteEngine {
    pub fn from_session(
        session: &AdapterSession,
        config: &WarehouseSinkConfig,
    ) -> ConnectorResult<Self> {
        Ok(Self {
            backend: Arc::clone(session.backend()?),
            notifier: session
                .streaming
                .clone()
                .map(|client| client as Arc<dyn PipeNotifier>),
            stage_name: config.warehouse.stage_name.clone(),
            pipe_base: config
                .warehouse
                .pipe
                .as_ref()
                .map(|pipe| pipe.pipe_name.clone()),
            compress: config.warehouse.compress_staged_files,
        })
    }

    /// Deliver one batch to `table` via `transport`.
    ///
    /// Errors propagate so the caller can decide whether to retry; a returned
    /// result is final for this attempt.
    pub async fn write(
        &self,
        transport: Transport,
        batch: &[FlatRecord],
        table: &str,
        schema: TableSchema,
    ) -> ConnectorResult<InsertResult> {
        match transport {
            Transport::Insert => self.write_insert(batch, table, schema).await,
            Transport::Copy => self.write_copy(batch, table, schema).await,
            Transport::Pipe => self.write_pipe(batch, table, schema).await,
            Transport::Put => self.write_put(batch, table, schema).await,
        }
    }

    /// Direct parameterized insert. Row counts come from the backend's
    /// response, so partial acceptance is reported as-is.
    async fn write_insert(
        &self,
        batch: &[FlatRecord],
        table: &str,
        schema: TableSchema,
    ) -> ConnectorResult<InsertResult> {
        let payload = payload::shape(batch, schema, table)?;
        let outcome = match &payload {
            WirePayload::Rows { rows, .. } => {
                self.backend.execute(payload.statement(), rows).await?
            }
            WirePayload::VariantBlob { blob, .. } => {
                let binds = vec![vec![Value::String(blob.clone())]];
                self.backend.execute(payload.statement(), &binds).await?
            }
        };

        let inserted = (outcome.affected_rows as usize).min(batch.len());
        let failed = batch.len() - inserted;
        if failed > 0 {
            warn!(
                table = table,
                inserted = inserted,
                failed = failed,
                "Insert accepted only part of the batch"
            );
        }
        Ok(InsertResult::success(table, inserted, failed, "insert"))
    }

    /// Stage the batch, COPY it in synchronously, then clean up the staged
    /// file. The staged file is only removed after a successful COPY so a
    /// failed load can be inspected or replayed.
    async fn write_copy(
        &self,
        batch: &[FlatRecord],
        table: &str,
        schema: TableSchema,
    ) -> ConnectorResult<InsertResult> {
        let stage = self.stage_name()?;
        let staged = self.stage_batch(batch, table, schema)?;

        let outcome = async {
            self.backend
                .upload_to_stage(&staged.local_path, stage)
                .await?;

            let statement = format!(
                "COPY INTO {} ({}) FROM (SELECT {} FROM @{}/{}) FILE_FORMAT = (TYPE = 'JSON')",
                table,
                schema::column_list(schema),
                schema::staged_projection(schema),
                stage,
                staged.file_name
            );
            let result = self.backend.execute(&statement, &[]).await?;

            if let Err(e) = self.backend.remove_staged(stage, &staged.file_name).await {
                warn!(
                    stage = stage,
                    file = staged.file_name.as_str(),
                    "Failed to remove staged file after COPY: {}",
                    e
                );
            }
            Ok(result)
        }
        .await;

        remove_local(&staged.local_path);
        outcome?;

        // a COPY either loads the whole staged file or fails; row statistics
        // from the response are informational only
        info!(
            table = table,
            file = staged.file_name.as_str(),
            rows = batch.len(),
            "Copied staged batch"
        );
        Ok(InsertResult::success(table, batch.len(), 0, "copy"))
    }

    /// Stage the batch and notify the table's ingest pipe. The staged file
    /// stays in place for the pipe to consume; acceptance is asynchronous, so
    /// a delivered notification is reported as full success.
    async fn write_pipe(
        &self,
        batch: &[FlatRecord],
        table: &str,
        schema: TableSchema,
    ) -> ConnectorResult<InsertResult> {
        let stage = self.stage_name()?;
        let pipe_base = self.pipe_base.as_deref().ok_or_else(|| {
            ConnectorError::invalid_state("Pipe transport selected without a pipe configuration")
        })?;
        let notifier = self.notifier.as_ref().ok_or_else(|| {
            ConnectorError::invalid_state("Pipe transport selected without an ingest client")
        })?;

        let staged = self.stage_batch(batch, table, schema)?;

        let outcome = async {
            self.backend
                .upload_to_stage(&staged.local_path, stage)
                .await?;
            notifier
                .notify(&pipe_name(pipe_base, table), &staged.file_name)
                .await
        }
        .await;

        remove_local(&staged.local_path);
        outcome?;

        info!(
            table = table,
            file = staged.file_name.as_str(),
            "Notified pipe of staged batch"
        );
        Ok(InsertResult::success(table, batch.len(), 0, "pipe"))
    }

    /// Stage the batch and stop. A warehouse-side task picks staged files up
    /// on its own schedule; a successful upload is reported as full success.
    async fn write_put(
        &self,
        batch: &[FlatRecord],
        table: &str,
        schema: TableSchema,
    ) -> ConnectorResult<InsertResult> {
        let stage = self.stage_name()?;
        let staged = self.stage_batch(batch, table, schema)?;

        let outcome = self
            .backend
            .upload_to_stage(&staged.local_path, stage)
            .await;

        remove_local(&staged.local_path);
        outcome?;

        info!(
            table = table,
            file = staged.file_name.as_str(),
            "Staged batch for scheduled load"
        );
        Ok(InsertResult::success(table, batch.len(), 0, "put"))
    }

    fn stage_name(&self) -> ConnectorResult<&str> {
        self.stage_name.as_deref().ok_or_else(|| {
            ConnectorError::invalid_state("Staged transport selected without a stage name")
        })
    }

    /// Serialize the batch as newline-delimited JSON into a uniquely named
    /// temp file, gzip-compressed unless disabled.
    fn stage_batch(
        &self,
        batch: &[FlatRecord],
        table: &str,
        schema: TableSchema,
    ) -> ConnectorResult<StagedBatch> {
        let file_name = staged_file_name(table, self.compress);
        let local_path = std::env::temp_dir().join(&file_name);

        let file = File::create(&local_path).map_err(|e| {
            ConnectorError::fatal_with_source(
                format!("Failed to create staged file {}", local_path.display()),
                e,
            )
        })?;

        let write_result: std::io::Result<()> = if self.compress {
            let encoder = GzEncoder::new(file, Compression::default());
            write_ndjson(encoder, batch, schema).and_then(|enc| enc.finish().map(drop))
        } else {
            write_ndjson(BufWriter::new(file), batch, schema).map(drop)
        };

        if let Err(e) = write_result {
            remove_local(&local_path);
            return Err(ConnectorError::fatal_with_source(
                format!("Failed to serialize batch into {}", local_path.display()),
                e,
            ));
        }

        debug!(
            table = table,
            file = file_name.as_str(),
            records = batch.len(),
            "Serialized batch to local staged file"
        );
        Ok(StagedBatch {
            local_path,
            file_name,
        })
    }
}

fn write_ndjson<W: Write>(
    mut writer: W,
    batch: &[FlatRecord],
    schema: TableSchema,
) -> std::io::Result<W> {
    for record in batch {
        let repaired = payload::repair_record(record, schema);
        serde_json::to_writer(&mut writer, &repaired)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(writer)
}

/// `<table>_<YYYY-MM-DD>_<random>.json[.gz]`, unique per batch so concurrent
/// writers on the same stage never collide.
fn staged_file_name(table: &str, compress: bool) -> String {
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

fn remove_local(path: &PathBuf) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), "Failed to remove local staged file: {}", e);
    }
}
