//! Resource lifecycle manager for the warehouse destination
//!
//! Idempotently verifies or creates the destination's durable resources in
//! dependency order (connection, dataset, tables, stage, pipes) and blocks
//! until each is observably usable. Readiness flags on [`AdapterSession`] are
//! monotonic: once a stage is ready it is never re-checked, so calling
//! [`ensure_ready`] on every batch is cheap after the first success.
//!
//! Concurrent first calls may both attempt bootstrap; all creation statements
//! use IF NOT EXISTS semantics, so duplicate attempts are safe but wasteful.
//! This is an accepted trade-off, not guarded with locks.

use crate::client::{RestSqlClient, SqlBackend, StreamingIngestClient};
use crate::config::WarehouseSinkConfig;
use crate::schema;
use eventgate_connect_core::{ConnectorError, ConnectorResult, RecordKind, TableNames};
use rand::Rng;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded attempts for the table readiness probe.
const TABLE_PROBE_ATTEMPTS: u32 = 6;

/// Write transport bound to the session for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Direct parameterized inserts
    Insert,
    /// Stage upload followed by a synchronous bulk load
    Copy,
    /// Stage upload followed by asynchronous pipe notification
    Pipe,
    /// Stage upload only; an out-of-band job performs the load
    Put,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Insert => "insert",
            Transport::Copy => "copy",
            Transport::Pipe => "pipe",
            Transport::Put => "put",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide adapter state: the connection handles and the monotonic
/// readiness flags, in dependency order.
///
/// Created on first use and kept for the process lifetime. An explicit
/// `drop_destination` does NOT reset these flags, leaving the adapter
/// inconsistent until restart (documented behavior).
pub struct AdapterSession {
    pub backend: Option<Arc<dyn SqlBackend>>,
    pub streaming: Option<Arc<StreamingIngestClient>>,

    pub connection_ready: bool,
    pub dataset_ready: bool,
    pub tables_ready: bool,
    pub stage_ready: bool,
    pub pipe_ready: bool,
    pub streaming_client_ready: bool,

    /// Bound once during bootstrap, never re-evaluated
    pub transport: Option<Transport>,
}

impl AdapterSession {
    pub fn new() -> Self {
        Self {
            backend: None,
            streaming: None,
            connection_ready: false,
            dataset_ready: false,
            tables_ready: false,
            stage_ready: false,
            pipe_ready: false,
            streaming_client_ready: false,
            transport: None,
        }
    }

    /// The backend handle; only valid after the connection stage succeeded.
    pub fn backend(&self) -> ConnectorResult<&Arc<dyn SqlBackend>> {
        self.backend
            .as_ref()
            .ok_or_else(|| ConnectorError::invalid_state("warehouse connection not established"))
    }

    /// Readiness flags for the configured stages, in dependency order.
    pub fn readiness(&self, config: &WarehouseSinkConfig) -> Vec<bool> {
        let mut flags = vec![
            self.connection_ready,
            self.dataset_ready,
            self.tables_ready,
        ];
        if config.warehouse.stage_name.is_some() {
            flags.push(self.stage_ready);
        }
        if config.warehouse.pipe.is_some() {
            flags.push(self.pipe_ready);
            flags.push(self.streaming_client_ready);
        }
        flags
    }
}

impl Default for AdapterSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify or create all destination resources, in dependency order.
///
/// Each stage runs only while its flag is false. Any creation or verification
/// failure propagates; only the table readiness probe retries internally. On
/// success the write transport is bound to the session if not already chosen.
pub async fn ensure_ready(
    session: &mut AdapterSession,
    config: &WarehouseSinkConfig,
    tables: &TableNames,
) -> ConnectorResult<Vec<bool>> {
    if !session.connection_ready {
        connect(session, config).await?;
    }

    if !session.dataset_ready {
        ensure_dataset(session, config).await?;
    }

    if !session.tables_ready {
        ensure_tables(session, tables).await?;
    }

    if config.warehouse.stage_name.is_some() && !session.stage_ready {
        ensure_stage(session, config).await?;
    }

    if config.warehouse.pipe.is_some() {
        if !session.pipe_ready {
            ensure_pipes(session, config, tables).await?;
        }
        if !session.streaming_client_ready {
            session.streaming = Some(Arc::new(StreamingIngestClient::from_config(
                &config.warehouse,
            )?));
            session.streaming_client_ready = true;
        }
    }

    if session.transport.is_none() {
        let transport = select_transport(config);
        info!("Bound write transport: {}", transport);
        session.transport = Some(transport);
    }

    Ok(session.readiness(config))
}

/// Choose the write transport from the optional resources that were
/// configured. Happens once; the session caches the choice.
fn select_transport(config: &WarehouseSinkConfig) -> Transport {
    if config.warehouse.pipe.is_some() {
        Transport::Pipe
    } else if config.warehouse.stage_name.is_some() {
        if config.warehouse.task.is_some() {
            // staged files are loaded by the externally scheduled task
            Transport::Put
        } else {
            Transport::Copy
        }
    } else {
        Transport::Insert
    }
}

pub(crate) async fn connect(
    session: &mut AdapterSession,
    config: &WarehouseSinkConfig,
) -> ConnectorResult<()> {
    let backend: Arc<dyn SqlBackend> = Arc::new(RestSqlClient::from_config(
        &config.warehouse,
        &config.connector_name,
    )?);

    // Liveness check right after connect; a failure here means the backend
    // accepted credentials but the session is unusable, which a retry of the
    // same call cannot fix.
    let identity = backend.current_identity().await.map_err(|e| {
        ConnectorError::invalid_state(format!(
            "connection established but liveness check failed: {}",
            e
        ))
    })?;
    info!("Connected to warehouse as {}", identity);

    session.backend = Some(backend);
    session.connection_ready = true;
    Ok(())
}

async fn ensure_dataset(
    session: &mut AdapterSession,
    config: &WarehouseSinkConfig,
) -> ConnectorResult<()> {
    let backend = Arc::clone(session.backend()?);
    let database = config.warehouse.database.to_uppercase();
    let schema_name = config.warehouse.schema.to_uppercase();

    if !name_exists(backend.as_ref(), &format!("SHOW DATABASES LIKE '{}'", database), &database)
        .await?
    {
        info!("Database {} does not exist, creating", database);
        backend
            .execute(&format!("CREATE DATABASE IF NOT EXISTS {}", database), &[])
            .await?;
    }

    if !name_exists(
        backend.as_ref(),
        &format!("SHOW SCHEMAS LIKE '{}' IN DATABASE {}", schema_name, database),
        &schema_name,
    )
    .await?
    {
        info!("Schema {}.{} does not exist, creating", database, schema_name);
        backend
            .execute(
                &format!("CREATE SCHEMA IF NOT EXISTS {}.{}", database, schema_name),
                &[],
            )
            .await?;
    }

    backend
        .execute(&format!("USE SCHEMA {}.{}", database, schema_name), &[])
        .await?;

    session.dataset_ready = true;
    Ok(())
}

async fn ensure_tables(
    session: &mut AdapterSession,
    tables: &TableNames,
) -> ConnectorResult<()> {
    let backend = Arc::clone(session.backend()?);

    for kind in RecordKind::ALL {
        let table = tables.table_for(kind);
        let table_schema = schema::schema_for(kind);

        if !name_exists(
            backend.as_ref(),
            &format!("SHOW TABLES LIKE '{}'", table),
            table,
        )
        .await?
        {
            info!("Table {} does not exist, creating", table);
            backend
                .execute(&schema::create_table_ddl(table, table_schema), &[])
                .await?;
        }

        // Created or pre-existing, the table must still pass the probe: some
        // backends report a table as existing before it is queryable.
        if !await_table_ready(backend.as_ref(), table).await? {
            return Err(ConnectorError::fatal(format!(
                "table {} did not become ready after {} probe attempts",
                table, TABLE_PROBE_ATTEMPTS
            )));
        }
    }

    session.tables_ready = true;
    Ok(())
}

async fn ensure_stage(
    session: &mut AdapterSession,
    config: &WarehouseSinkConfig,
) -> ConnectorResult<()> {
    let backend = Arc::clone(session.backend()?);
    let stage = config
        .warehouse
        .stage_name
        .as_deref()
        .ok_or_else(|| ConnectorError::config("stage_name is not set"))?;

    if !name_exists(
        backend.as_ref(),
        &format!("SHOW STAGES LIKE '{}'", stage),
        stage,
    )
    .await?
    {
        info!("Stage {} does not exist, creating", stage);
        backend
            .execute(
                &format!(
                    "CREATE STAGE IF NOT EXISTS {} FILE_FORMAT = (TYPE = 'JSON')",
                    stage
                ),
                &[],
            )
            .await?;
    }

    backend
        .execute(
            &format!(
                "GRANT READ, WRITE ON STAGE {} TO ROLE {}",
                stage, config.warehouse.role
            ),
            &[],
        )
        .await?;

    session.stage_ready = true;
    Ok(())
}

async fn ensure_pipes(
    session: &mut AdapterSession,
    config: &WarehouseSinkConfig,
    tables: &TableNames,
) -> ConnectorResult<()> {
    let backend = Arc::clone(session.backend()?);
    let pipe_base = &config
        .warehouse
        .pipe
        .as_ref()
        .ok_or_else(|| ConnectorError::config("no pipe configured"))?
        .pipe_name;
    let stage = config
        .warehouse
        .stage_name
        .as_deref()
        .ok_or_else(|| ConnectorError::config("stage_name is required for pipes"))?;

    for kind in RecordKind::ALL {
        let table = tables.table_for(kind);
        let pipe = pipe_name(pipe_base, table);
        let table_schema = schema::schema_for(kind);

        if name_exists(
            backend.as_ref(),
            &format!("SHOW PIPES LIKE '{}'", pipe),
            &pipe,
        )
        .await?
        {
            continue;
        }

        info!("Pipe {} does not exist, creating", pipe);
        backend
            .execute(
                &format!(
                    "CREATE PIPE IF NOT EXISTS {} AUTO_INGEST = FALSE AS \
                     COPY INTO {} ({}) FROM (SELECT {} FROM @{}) \
                     FILE_FORMAT = (TYPE = 'JSON')",
                    pipe,
                    table,
                    schema::column_list(table_schema),
                    schema::staged_projection(table_schema),
                    stage
                ),
                &[],
            )
            .await?;
    }

    session.pipe_ready = true;
    Ok(())
}

/// Per-table pipe naming convention; pre-existing deployments depend on it.
pub fn pipe_name(pipe_base: &str, table: &str) -> String {
    format!("{}_{}", pipe_base, table)
}

/// Exact case-insensitive name match against a listing call.
///
/// Existence is decided from the listing output, never by side effect of a
/// failed create.
async fn name_exists(
    backend: &dyn SqlBackend,
    listing_statement: &str,
    name: &str,
) -> ConnectorResult<bool> {
    let outcome = backend.execute(listing_statement, &[]).await?;
    Ok(outcome.rows.iter().any(|row| {
        row.get("name")
            .and_then(Value::as_str)
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }))
}

/// Poll until `table` is observably usable, bounded.
///
/// Existence is polled first, then writability via [`probe_writable`]. Delays
/// are randomized in [1s,5s] to avoid lockstep polling across tables.
async fn await_table_ready(backend: &dyn SqlBackend, table: &str) -> ConnectorResult<bool> {
    let mut exists = false;
    for attempt in 1..=TABLE_PROBE_ATTEMPTS {
        if name_exists(backend, &format!("SHOW TABLES LIKE '{}'", table), table).await? {
            exists = true;
            break;
        }
        debug!(
            "Table {} not yet listed (attempt {}/{})",
            table, attempt, TABLE_PROBE_ATTEMPTS
        );
        tokio::time::sleep(probe_delay()).await;
    }
    if !exists {
        warn!("Table {} never appeared in listing", table);
        return Ok(false);
    }

    for attempt in 1..=TABLE_PROBE_ATTEMPTS {
        if probe_writable(backend, table).await {
            return Ok(true);
        }
        debug!(
            "Table {} not yet writable (attempt {}/{})",
            table, attempt, TABLE_PROBE_ATTEMPTS
        );
        tokio::time::sleep(probe_delay()).await;
    }

    warn!("Table {} exists but never became writable", table);
    Ok(false)
}

/// Writability probe: a dummy insert referencing a column that does not
/// exist. Receiving the backend's "unknown column" error class proves the
/// table compiles queries without mutating real data; any other outcome
/// (including success) means not-yet-ready.
///
/// This trick is tied to one backend's error taxonomy. Alternate backends
/// should replace this function with an honest readiness check.
pub(crate) async fn probe_writable(backend: &dyn SqlBackend, table: &str) -> bool {
    let statement = format!("INSERT INTO {} (EVENTGATE_READY_CHECK) VALUES (1)", table);
    match backend.execute(&statement, &[]).await {
        Ok(_) => false,
        Err(e) => is_unknown_column_error(&e),
    }
}

/// Classify the backend's "unknown column" error class.
pub(crate) fn is_unknown_column_error(err: &eventgate_connect_core::ConnectorError) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("invalid identifier") || message.contains("unknown column")
}

fn probe_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(1000..=5000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockBackend;
    use eventgate_connect_core::TableNames;

    fn test_tables() -> TableNames {
        TableNames {
            event_table: "ANALYTICS_EVENTS".to_string(),
            user_table: "ANALYTICS_USERS".to_string(),
            group_table: "ANALYTICS_GROUPS".to_string(),
        }
    }

    fn test_config(stage: bool, task: bool) -> WarehouseSinkConfig {
        let toml_str = r#"
            connector_name = "warehouse-sink"

            [tables]
            event_table = "ANALYTICS_EVENTS"
            user_table = "ANALYTICS_USERS"
            group_table = "ANALYTICS_GROUPS"

            [warehouse]
            account = "myorg-account123"
            user = "EVENTGATE_USER"
            database = "ANALYTICS"
            schema = "PUBLIC"
            warehouse = "COMPUTE_WH"
            role = "EVENTGATE_ROLE"
        "#;
        let mut config: WarehouseSinkConfig = toml::from_str(toml_str).unwrap();
        config.warehouse.password = Some("secret".to_string());
        if stage {
            config.warehouse.stage_name = Some("EVENTGATE_STAGE".to_string());
        }
        if task {
            config.warehouse.task = Some(crate::config::TaskConfig {
                task_name: "EVENTGATE_LOAD".to_string(),
                schedule: Some("5 MINUTE".to_string()),
            });
        }
        config
    }

    fn session_with(backend: Arc<MockBackend>) -> AdapterSession {
        let mut session = AdapterSession::new();
        session.backend = Some(backend);
        session.connection_ready = true;
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_ready_bootstraps_existing_resources() {
        let backend = MockBackend::happy();
        let mut session = session_with(Arc::clone(&backend));
        let config = test_config(false, false);

        let flags = ensure_ready(&mut session, &config, &test_tables())
            .await
            .unwrap();

        assert_eq!(flags, vec![true, true, true]);
        assert_eq!(session.transport, Some(Transport::Insert));
        // everything existed already, so no CREATE was issued
        assert_eq!(backend.count_matching("CREATE"), 0);
        // probe ran once per table
        assert_eq!(backend.count_matching("INSERT INTO"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flags_are_sticky_second_call_is_free() {
        let backend = MockBackend::happy();
        let mut session = session_with(Arc::clone(&backend));
        let config = test_config(true, false);

        ensure_ready(&mut session, &config, &test_tables())
            .await
            .unwrap();
        let calls_after_first = backend.calls().len();

        let flags = ensure_ready(&mut session, &config, &test_tables())
            .await
            .unwrap();

        assert_eq!(flags, vec![true, true, true, true]);
        // zero redundant verification or creation calls on the second pass
        assert_eq!(backend.calls().len(), calls_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_resources_are_created() {
        let backend = MockBackend::empty_backend();
        let mut session = session_with(Arc::clone(&backend));
        let config = test_config(true, false);

        ensure_ready(&mut session, &config, &test_tables())
            .await
            .unwrap();

        assert_eq!(backend.count_matching("CREATE DATABASE IF NOT EXISTS ANALYTICS"), 1);
        assert_eq!(backend.count_matching("CREATE SCHEMA IF NOT EXISTS ANALYTICS.PUBLIC"), 1);
        assert_eq!(backend.count_matching("CREATE TABLE IF NOT EXISTS"), 3);
        assert_eq!(backend.count_matching("CREATE STAGE IF NOT EXISTS EVENTGATE_STAGE"), 1);
        assert_eq!(
            backend.count_matching("GRANT READ, WRITE ON STAGE EVENTGATE_STAGE TO ROLE EVENTGATE_ROLE"),
            1
        );
        assert_eq!(session.transport, Some(Transport::Copy));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_selection_stage_and_task_means_put() {
        let backend = MockBackend::happy();
        let mut session = session_with(backend);
        let config = test_config(true, true);

        ensure_ready(&mut session, &config, &test_tables())
            .await
            .unwrap();

        assert_eq!(session.transport, Some(Transport::Put));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_never_reevaluated() {
        let backend = MockBackend::happy();
        let mut session = session_with(backend);
        session.transport = Some(Transport::Pipe);
        let config = test_config(true, false);

        ensure_ready(&mut session, &config, &test_tables())
            .await
            .unwrap();

        // the stage configuration would select Copy, but the binding is final
        assert_eq!(session.transport, Some(Transport::Pipe));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_positive_on_unknown_column_error() {
        let backend = MockBackend::happy();
        assert!(probe_writable(backend.as_ref(), "ANALYTICS_EVENTS").await);
        assert_eq!(backend.count_matching("EVENTGATE_READY_CHECK"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_negative_on_success_or_other_error() {
        // dummy insert unexpectedly succeeding is NOT a readiness signal
        let accepting = MockBackend::accept_all();
        assert!(!probe_writable(accepting.as_ref(), "ANALYTICS_EVENTS").await);

        let failing = MockBackend::failing_with("network unreachable");
        assert!(!probe_writable(failing.as_ref(), "ANALYTICS_EVENTS").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_table_fails_init_after_bounded_retries() {
        // table listed, but the probe always gets an unrelated error
        let backend = MockBackend::unwritable_tables();
        let mut session = session_with(Arc::clone(&backend));
        let config = test_config(false, false);

        let err = ensure_ready(&mut session, &config, &test_tables())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("did not become ready"));
        assert!(!session.tables_ready);
        // probe bounded: exactly TABLE_PROBE_ATTEMPTS dummy inserts for the first table
        assert_eq!(
            backend.count_matching("EVENTGATE_READY_CHECK"),
            TABLE_PROBE_ATTEMPTS as usize
        );
    }

    #[test]
    fn test_unknown_column_classification() {
        let err = ConnectorError::fatal(
            "SQL compilation error: error line 1 at position 27 invalid identifier 'EVENTGATE_READY_CHECK'",
        );
        assert!(is_unknown_column_error(&err));

        let err = ConnectorError::fatal("Unknown column 'EVENTGATE_READY_CHECK' in field list");
        assert!(is_unknown_column_error(&err));

        let err = ConnectorError::fatal("table is being locked by another transaction");
        assert!(!is_unknown_column_error(&err));
    }

    #[test]
    fn test_pipe_naming_convention() {
        assert_eq!(
            pipe_name("EVENTGATE_PIPE", "ANALYTICS_EVENTS"),
            "EVENTGATE_PIPE_ANALYTICS_EVENTS"
        );
    }
}
