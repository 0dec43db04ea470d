//! Object store client construction
//!
//! Builds an [`ObjectStore`] client from the connector configuration using
//! the official builders. Cloud stores are wrapped in a [`PrefixStore`] when
//! a key prefix is configured; local stores are rooted already.

use crate::config::{StoreConfig, StoreProvider};
use eventgate_connect_core::{ConnectorError, ConnectorResult};
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::prefix::PrefixStore;
use object_store::ObjectStore;
use std::sync::Arc;

pub fn build_store(config: &StoreConfig) -> ConnectorResult<Arc<dyn ObjectStore>> {
    match config.provider {
        StoreProvider::S3 => build_s3(config),
        StoreProvider::Azure => build_azure(config),
        StoreProvider::Gcs => build_gcs(config),
        StoreProvider::Local => build_local(config),
    }
}

fn with_prefix<S: ObjectStore>(store: S, prefix: &Option<String>) -> Arc<dyn ObjectStore> {
    match prefix {
        Some(prefix) => Arc::new(PrefixStore::new(store, prefix.as_str())),
        None => Arc::new(store),
    }
}

fn build_s3(config: &StoreConfig) -> ConnectorResult<Arc<dyn ObjectStore>> {
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);

    if let Some(region) = &config.region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = &config.endpoint {
        builder = builder.with_endpoint(endpoint).with_allow_http(true);
    }
    if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
        builder = builder
            .with_access_key_id(key)
            .with_secret_access_key(secret);
    }

    let store = builder
        .build()
        .map_err(|e| ConnectorError::config(format!("Failed to build S3 object store: {}", e)))?;
    Ok(with_prefix(store, &config.prefix))
}

fn build_azure(config: &StoreConfig) -> ConnectorResult<Arc<dyn ObjectStore>> {
    let mut builder = MicrosoftAzureBuilder::from_env().with_container_name(&config.bucket);

    if let (Some(account), Some(key)) = (&config.access_key_id, &config.secret_access_key) {
        builder = builder.with_account(account).with_access_key(key);
    }

    let store = builder.build().map_err(|e| {
        ConnectorError::config(format!("Failed to build Azure object store: {}", e))
    })?;
    Ok(with_prefix(store, &config.prefix))
}

fn build_gcs(config: &StoreConfig) -> ConnectorResult<Arc<dyn ObjectStore>> {
    let store = GoogleCloudStorageBuilder::from_env()
        .with_bucket_name(&config.bucket)
        .build()
        .map_err(|e| {
            ConnectorError::config(format!("Failed to build GCS object store: {}", e))
        })?;
    Ok(with_prefix(store, &config.prefix))
}

fn build_local(config: &StoreConfig) -> ConnectorResult<Arc<dyn ObjectStore>> {
    let root = config
        .root_path
        .as_deref()
        .ok_or_else(|| ConnectorError::config("store.root_path is required for local stores"))?;
    let store = LocalFileSystem::new_with_prefix(root).map_err(|e| {
        ConnectorError::config(format!(
            "Failed to open local object store at {}: {}",
            root, e
        ))
    })?;
    Ok(Arc::new(store))
}
