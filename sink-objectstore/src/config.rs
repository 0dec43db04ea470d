//! Configuration for the object store sink connector

use eventgate_connect_core::{ConnectorError, ConnectorResult, TableNames};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level connector configuration, loaded from a TOML file with
/// environment overrides applied afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreSinkConfig {
    /// Connector instance name, used in object prefixes and logs
    pub connector_name: String,

    /// Destination table names; each maps to an object prefix
    pub tables: TableNames,

    pub store: StoreConfig,
}

/// Object store backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub provider: StoreProvider,

    /// Bucket (S3/GCS) or container (Azure) name. Unused for `local`.
    #[serde(default)]
    pub bucket: String,

    /// Key prefix under which all objects are written
    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores (e.g. MinIO)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Access key id; the secret comes from `OBJECTSTORE_SECRET_KEY` only
    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub secret_access_key: Option<String>,

    /// Root directory for the `local` provider
    #[serde(default)]
    pub root_path: Option<String>,

    /// Gzip objects before upload
    #[serde(default = "default_compress_objects")]
    pub compress_objects: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreProvider {
    S3,
    Azure,
    Gcs,
    Local,
}

fn default_compress_objects() -> bool {
    true
}

impl ObjectStoreSinkConfig {
    pub fn from_file(path: &str) -> ConnectorResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!("Failed to read config file {}: {}", path, e))
        })?;
        let config: Self = toml::from_str(&contents).map_err(|e| {
            ConnectorError::config(format!("Failed to parse config file {}: {}", path, e))
        })?;
        Ok(config)
    }

    /// Load from the file named by `CONNECTOR_CONFIG_PATH`, apply environment
    /// overrides, then validate.
    pub fn load() -> ConnectorResult<Self> {
        let path = std::env::var("CONNECTOR_CONFIG_PATH")
            .map_err(|_| ConnectorError::config("CONNECTOR_CONFIG_PATH is not set"))?;
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("CONNECTOR_NAME") {
            self.connector_name = name;
        }
        if let Ok(bucket) = std::env::var("OBJECTSTORE_BUCKET") {
            self.store.bucket = bucket;
        }
        if let Ok(prefix) = std::env::var("OBJECTSTORE_PREFIX") {
            self.store.prefix = Some(prefix);
        }
        if let Ok(key) = std::env::var("OBJECTSTORE_ACCESS_KEY_ID") {
            self.store.access_key_id = Some(key);
        }
        if let Ok(secret) = std::env::var("OBJECTSTORE_SECRET_KEY") {
            self.store.secret_access_key = Some(secret);
        }
        if let Ok(region) = std::env::var("OBJECTSTORE_REGION") {
            self.store.region = Some(region);
        }
        if let Ok(endpoint) = std::env::var("OBJECTSTORE_ENDPOINT") {
            self.store.endpoint = Some(endpoint);
        }
        if let Ok(compress) = std::env::var("OBJECTSTORE_COMPRESS") {
            match compress.parse() {
                Ok(flag) => self.store.compress_objects = flag,
                Err(_) => warn!(
                    "Ignoring unparseable OBJECTSTORE_COMPRESS override: {}",
                    compress
                ),
            }
        }
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if self.connector_name.is_empty() {
            return Err(ConnectorError::config("connector_name is required"));
        }
        match self.store.provider {
            StoreProvider::Local => {
                if self.store.root_path.as_deref().unwrap_or("").is_empty() {
                    return Err(ConnectorError::config(
                        "store.root_path is required for the local provider",
                    ));
                }
            }
            _ => {
                if self.store.bucket.is_empty() {
                    return Err(ConnectorError::config(
                        "store.bucket is required for cloud providers",
                    ));
                }
            }
        }
        if self.store.provider == StoreProvider::S3
            && self.store.access_key_id.is_some()
            && self.store.secret_access_key.is_none()
        {
            return Err(ConnectorError::config(
                "store.access_key_id is set but no secret is available; \
                 set the OBJECTSTORE_SECRET_KEY environment variable",
            ));
        }
        Ok(())
    }
}
