//! Configuration module for the Warehouse Sink Connector
//!
//! Handles:
//! - Warehouse credentials and session context (database, schema, warehouse, role)
//! - Optional staging area (enables the `copy` transport)
//! - Optional ingest pipe with key-pair auth (enables the `pipe` transport)
//! - Retry bounds and environment variable overrides
//!
//! Credentials are expected to come from the environment; the TOML file only
//! carries non-secret settings.

use eventgate_connect_core::{ConnectorError, ConnectorResult, TableNames};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

/// Complete configuration for the Warehouse Sink Connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseSinkConfig {
    /// Connector instance name, used in logs and generated request ids
    pub connector_name: String,

    /// Destination table names, one per record kind
    pub tables: TableNames,

    /// Warehouse-specific configuration
    pub warehouse: WarehouseConfig,
}

/// Warehouse-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Account identifier (e.g. "myorg-account123")
    pub account: String,

    /// User name for the SQL connection
    pub user: String,

    /// Password for the SQL connection.
    /// Comes from the WAREHOUSE_PASSWORD environment variable, never from file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Target database
    pub database: String,

    /// Target schema within the database
    pub schema: String,

    /// Compute warehouse to run statements on
    pub warehouse: String,

    /// Role statements run as; also the grantee of stage privileges
    pub role: String,

    /// Explicit API base URL override (defaults to the account-derived URL)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,

    /// Staging area name. Presence enables the `copy` transport.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,

    /// Ingest pipe settings. Presence enables the `pipe` transport.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipe: Option<PipeConfig>,

    /// Scheduled-task settings. Reserved: resources named here are dropped by
    /// `drop_destination` but no task is created by this connector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskConfig>,

    /// Maximum delivery attempts for contention-classified failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Gzip staged files before upload
    #[serde(default = "default_compress_staged_files")]
    pub compress_staged_files: bool,

    /// Request timeout in seconds for SQL API calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Ingest pipe configuration (key-pair authenticated streaming ingest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Base pipe name; per-table pipes are named `{pipe_name}_{table}`
    pub pipe_name: String,

    /// Path to the PKCS#8 private key (PEM) for the streaming-ingest client
    pub private_key_path: String,

    /// Cloud region of the ingest endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Cloud provider of the ingest endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Scheduled-task configuration (reserved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Base task name; per-table tasks are named `{task_name}_{table}`
    pub task_name: String,

    /// Schedule expression, passed through to the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

fn default_max_retries() -> u32 {
    5
}

fn default_compress_staged_files() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl WarehouseSinkConfig {
    /// Load configuration from a TOML file.
    ///
    /// Not validated yet: secrets arrive via environment overrides, so a
    /// file-only config is allowed to be incomplete at this point.
    pub fn from_file(path: &str) -> ConnectorResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!("Failed to read config file '{}': {}", path, e))
        })?;

        let config: Self = toml::from_str(&contents).map_err(|e| {
            ConnectorError::config(format!("Failed to parse config file '{}': {}", path, e))
        })?;

        Ok(config)
    }

    /// Load configuration from the file named by CONNECTOR_CONFIG_PATH,
    /// then apply environment variable overrides.
    pub fn load() -> ConnectorResult<Self> {
        let config_path = env::var("CONNECTOR_CONFIG_PATH").map_err(|_| {
            ConnectorError::config(
                "CONNECTOR_CONFIG_PATH environment variable not set. \
                 Please set it to the path of your connector.toml file.",
            )
        })?;

        let mut config = Self::from_file(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides. Secrets only exist here.
    fn apply_env_overrides(&mut self) {
        if let Ok(name) = env::var("CONNECTOR_NAME") {
            tracing::info!("Overriding connector_name from environment");
            self.connector_name = name;
        }

        if let Ok(account) = env::var("WAREHOUSE_ACCOUNT") {
            self.warehouse.account = account;
        }

        if let Ok(user) = env::var("WAREHOUSE_USER") {
            self.warehouse.user = user;
        }

        if let Ok(password) = env::var("WAREHOUSE_PASSWORD") {
            self.warehouse.password = Some(password);
        }

        if let Ok(url) = env::var("WAREHOUSE_ACCESS_URL") {
            self.warehouse.access_url = Some(url);
        }

        if let Ok(stage) = env::var("WAREHOUSE_STAGE_NAME") {
            self.warehouse.stage_name = Some(stage);
        }

        if let Ok(retries) = env::var("MAX_RETRIES") {
            match retries.parse::<u32>() {
                Ok(n) => self.warehouse.max_retries = n,
                Err(_) => {
                    tracing::warn!("Ignoring non-integer MAX_RETRIES override: {}", retries)
                }
            }
        }
    }

    /// Validate configuration. Missing required credential fields fail fast
    /// before any connection attempt.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.connector_name.is_empty() {
            return Err(ConnectorError::config("connector_name cannot be empty"));
        }

        for (field, value) in [
            ("account", &self.warehouse.account),
            ("user", &self.warehouse.user),
            ("database", &self.warehouse.database),
            ("schema", &self.warehouse.schema),
            ("warehouse", &self.warehouse.warehouse),
            ("role", &self.warehouse.role),
        ] {
            if value.is_empty() {
                return Err(ConnectorError::config(format!(
                    "warehouse.{} is required",
                    field
                )));
            }
        }

        if self.warehouse.password.as_deref().unwrap_or("").is_empty() {
            return Err(ConnectorError::config(
                "warehouse password is required. Set the WAREHOUSE_PASSWORD environment variable.",
            ));
        }

        for (field, value) in [
            ("event_table", &self.tables.event_table),
            ("user_table", &self.tables.user_table),
            ("group_table", &self.tables.group_table),
        ] {
            if value.is_empty() {
                return Err(ConnectorError::config(format!(
                    "tables.{} cannot be empty",
                    field
                )));
            }
        }

        if let Some(stage) = &self.warehouse.stage_name {
            if stage.is_empty() {
                return Err(ConnectorError::config(
                    "stage_name cannot be empty when present",
                ));
            }
        }

        if let Some(pipe) = &self.warehouse.pipe {
            if pipe.pipe_name.is_empty() {
                return Err(ConnectorError::config(
                    "pipe.pipe_name cannot be empty when a pipe is configured",
                ));
            }
            if pipe.private_key_path.is_empty() {
                return Err(ConnectorError::config(
                    "pipe.private_key_path is required when a pipe is configured",
                ));
            }
            // pipes copy out of the stage, so a pipe without a stage cannot work
            if self.warehouse.stage_name.is_none() {
                return Err(ConnectorError::config(
                    "stage_name is required when a pipe is configured",
                ));
            }
        }

        Ok(())
    }
}
