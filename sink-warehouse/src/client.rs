//! Backend clients for the warehouse destination
//!
//! Two distinct clients talk to the backend:
//!
//! - [`RestSqlClient`]: password-authenticated SQL-over-REST connection used
//!   for everything except pipe notification (DDL, inserts, PUT/REMOVE).
//! - [`StreamingIngestClient`]: key-pair (JWT) authenticated client that
//!   notifies an ingest pipe about newly staged files. Only established when
//!   the pipe transport is configured.
//!
//! The [`SqlBackend`] trait is the seam the lifecycle manager and write
//! strategies talk through, so tests (and alternate backends) can substitute
//! their own implementation.

use crate::config::WarehouseConfig;
use async_trait::async_trait;
use base64::Engine as _;
use eventgate_connect_core::{ConnectorError, ConnectorResult};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Outcome of one executed statement.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    /// Rows affected as reported by the backend (inserts/copies)
    pub affected_rows: u64,

    /// Result rows for listing calls (SHOW ...), one JSON object each
    pub rows: Vec<Value>,
}

/// SQL connection to the warehouse backend.
///
/// `binds` carries one bind set per row; statements without parameters pass
/// an empty slice, single-parameter statements a single one-element set.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    async fn execute(&self, statement: &str, binds: &[Vec<Value>]) -> ConnectorResult<QueryOutcome>;

    /// Fetch the current session identity for diagnostics.
    async fn current_identity(&self) -> ConnectorResult<String> {
        let outcome = self
            .execute(
                "SELECT CURRENT_USER() AS USER, CURRENT_ROLE() AS ROLE, \
                 CURRENT_WAREHOUSE() AS WAREHOUSE",
                &[],
            )
            .await?;
        Ok(outcome
            .rows
            .first()
            .map(|row| row.to_string())
            .unwrap_or_else(|| "unknown".to_string()))
    }

    /// Upload a local file into the staging area.
    async fn upload_to_stage(&self, local_path: &Path, stage: &str) -> ConnectorResult<()> {
        let statement = format!(
            "PUT file://{} @{} AUTO_COMPRESS = FALSE",
            local_path.display(),
            stage
        );
        self.execute(&statement, &[]).await?;
        Ok(())
    }

    /// Remove a previously staged file.
    async fn remove_staged(&self, stage: &str, file_name: &str) -> ConnectorResult<()> {
        let statement = format!("REMOVE @{}/{}", stage, file_name);
        self.execute(&statement, &[]).await?;
        Ok(())
    }
}

/// SQL-over-REST client for the warehouse.
pub struct RestSqlClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    database: String,
    schema: String,
    warehouse: String,
    role: String,
    connector_name: String,
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bindings: Option<&'a [Vec<Value>]>,
    database: &'a str,
    schema: &'a str,
    warehouse: &'a str,
    role: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct StatementResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    stats: StatementStats,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementStats {
    #[serde(default)]
    num_rows_inserted: u64,
    #[serde(default)]
    num_rows_affected: u64,
}

impl RestSqlClient {
    /// Build a client from configuration. Fails fast on a missing password;
    /// the remaining required fields are checked at config-validation time.
    pub fn from_config(config: &WarehouseConfig, connector_name: &str) -> ConnectorResult<Self> {
        let password = config
            .password
            .clone()
            .ok_or_else(|| ConnectorError::config("warehouse password is not set"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                ConnectorError::fatal_with_source("Failed to build warehouse HTTP client", e)
            })?;

        Ok(Self {
            http,
            base_url: api_url(&config.account, config.access_url.as_deref()),
            user: config.user.clone(),
            password,
            database: config.database.clone(),
            schema: config.schema.clone(),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            connector_name: connector_name.to_string(),
        })
    }

    fn request_id(&self) -> String {
        format!("{}-{}", self.connector_name, uuid::Uuid::new_v4())
    }
}

#[async_trait]
impl SqlBackend for RestSqlClient {
    async fn execute(&self, statement: &str, binds: &[Vec<Value>]) -> ConnectorResult<QueryOutcome> {
        let url = format!("{}/api/v2/statements", self.base_url);
        let request_id = self.request_id();

        let body = StatementRequest {
            statement,
            bindings: if binds.is_empty() { None } else { Some(binds) },
            database: &self.database,
            schema: &self.schema,
            warehouse: &self.warehouse,
            role: &self.role,
        };

        debug!(request_id = %request_id, "Executing statement: {}", truncate(statement, 120));

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .header("X-Request-ID", &request_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ConnectorError::retryable_with_source("Warehouse API request failed", e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StatementResponse>()
                .await
                .ok()
                .and_then(|r| r.message)
                .unwrap_or_else(|| format!("HTTP {}", status));

            return Err(if is_retryable_status(status) {
                ConnectorError::retryable(format!("Warehouse API error ({}): {}", status, message))
            } else {
                ConnectorError::fatal(message)
            });
        }

        let parsed: StatementResponse = response.json().await.map_err(|e| {
            ConnectorError::fatal_with_source("Failed to parse warehouse response", e)
        })?;

        Ok(QueryOutcome {
            affected_rows: parsed
                .stats
                .num_rows_affected
                .max(parsed.stats.num_rows_inserted),
            rows: parsed.data,
        })
    }
}

/// API base URL for an account, honoring an explicit override.
fn api_url(account: &str, access_url: Option<&str>) -> String {
    match access_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!("https://{}.snowflakecomputing.com", account.to_lowercase()),
    }
}

/// Whether an HTTP status is worth retrying at the transport level.
fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// JWT claims for key-pair ingest authentication.
#[derive(Debug, Serialize, Deserialize)]
struct IngestJwtClaims {
    /// `<ACCOUNT>.<USER>.SHA256:<public_key_fingerprint>`
    iss: String,
    /// `<ACCOUNT>.<USER>`
    sub: String,
    iat: u64,
    exp: u64,
}

/// Key-pair authentication state for the streaming-ingest client.
struct KeyPairAuth {
    token: String,
    expires_at: SystemTime,
    encoding_key: EncodingKey,
    issuer: String,
    subject: String,
    token_lifetime_secs: u64,
}

impl KeyPairAuth {
    fn new(account: &str, user: &str, private_key_pem: &str) -> ConnectorResult<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem).map_err(|e| {
            ConnectorError::config(format!("Failed to parse ingest private key: {}", e))
        })?;

        // Fingerprint is the SHA-256 of the DER-encoded public key
        let public_key = private_key.to_public_key();
        let public_key_der = rsa::pkcs8::EncodePublicKey::to_public_key_der(&public_key)
            .map_err(|e| {
                ConnectorError::config(format!("Failed to encode ingest public key: {}", e))
            })?;

        let mut hasher = Sha256::new();
        hasher.update(public_key_der.as_bytes());
        let fingerprint =
            base64::engine::general_purpose::STANDARD.encode(hasher.finalize());

        let account_upper = account.to_uppercase();
        let user_upper = user.to_uppercase();

        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).map_err(|e| {
            ConnectorError::config(format!("Failed to load ingest signing key: {}", e))
        })?;

        let mut auth = Self {
            token: String::new(),
            expires_at: UNIX_EPOCH,
            encoding_key,
            issuer: format!("{}.{}.SHA256:{}", account_upper, user_upper, fingerprint),
            subject: format!("{}.{}", account_upper, user_upper),
            token_lifetime_secs: 3540, // just under the backend's 60 minute cap
        };
        auth.refresh()?;
        Ok(auth)
    }

    fn needs_refresh(&self) -> bool {
        let buffer = Duration::from_secs(300);
        match SystemTime::now().checked_add(buffer) {
            Some(check_time) => check_time >= self.expires_at,
            None => true,
        }
    }

    fn refresh(&mut self) -> ConnectorResult<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ConnectorError::invalid_state(format!("System time error: {}", e)))?;

        let iat = now.as_secs();
        let exp = iat + self.token_lifetime_secs;

        let claims = IngestJwtClaims {
            iss: self.issuer.clone(),
            sub: self.subject.clone(),
            iat,
            exp,
        };

        self.token = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| {
                ConnectorError::fatal_with_source("Failed to generate ingest JWT", e)
            })?;
        self.expires_at = UNIX_EPOCH + Duration::from_secs(exp);
        debug!("Generated new ingest JWT, expires at {:?}", self.expires_at);
        Ok(())
    }

    fn bearer(&mut self) -> ConnectorResult<String> {
        if self.needs_refresh() {
            self.refresh()?;
        }
        Ok(self.token.clone())
    }
}

/// Notification side of an ingest pipe.
///
/// Split out as a trait so write strategies can be exercised without a real
/// ingest endpoint.
#[async_trait]
pub trait PipeNotifier: Send + Sync {
    /// Tell `pipe` that `staged_file` is ready for asynchronous processing.
    async fn notify(&self, pipe: &str, staged_file: &str) -> ConnectorResult<()>;
}

/// Streaming-ingest client that notifies pipes of newly staged files.
///
/// Authenticates with a key pair, distinct from the SQL connection's
/// password credentials. Notification is fire-and-forget: the pipe processes
/// the staged file asynchronously and out of band.
pub struct StreamingIngestClient {
    http: reqwest::Client,
    base_url: String,
    database: String,
    schema: String,
    auth: Mutex<KeyPairAuth>,
}

#[derive(Debug, Serialize)]
struct InsertFilesRequest<'a> {
    files: Vec<StagedFile<'a>>,
}

#[derive(Debug, Serialize)]
struct StagedFile<'a> {
    path: &'a str,
}

impl StreamingIngestClient {
    /// Build the client from configuration, reading the private key file.
    pub fn from_config(config: &WarehouseConfig) -> ConnectorResult<Self> {
        let pipe = config
            .pipe
            .as_ref()
            .ok_or_else(|| ConnectorError::config("no pipe configured"))?;

        let private_key_pem = std::fs::read_to_string(&pipe.private_key_path).map_err(|e| {
            ConnectorError::config(format!(
                "Failed to read ingest private key '{}': {}",
                pipe.private_key_path, e
            ))
        })?;

        let auth = KeyPairAuth::new(&config.account, &config.user, &private_key_pem)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                ConnectorError::fatal_with_source("Failed to build ingest HTTP client", e)
            })?;

        info!("Established streaming-ingest client for account {}", config.account);

        Ok(Self {
            http,
            base_url: api_url(&config.account, config.access_url.as_deref()),
            database: config.database.clone(),
            schema: config.schema.clone(),
            auth: Mutex::new(auth),
        })
    }

}

#[async_trait]
impl PipeNotifier for StreamingIngestClient {
    async fn notify(&self, pipe: &str, staged_file: &str) -> ConnectorResult<()> {
        let token = {
            let mut auth = self
                .auth
                .lock()
                .map_err(|_| ConnectorError::invalid_state("ingest auth lock poisoned"))?;
            auth.bearer()?
        };

        let url = format!(
            "{}/v1/data/pipes/{}.{}.{}/insertFiles?requestId={}",
            self.base_url,
            self.database,
            self.schema,
            pipe,
            uuid::Uuid::new_v4()
        );

        let body = InsertFilesRequest {
            files: vec![StagedFile { path: staged_file }],
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header("X-Snowflake-Authorization-Token-Type", "KEYPAIR_JWT")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ConnectorError::retryable_with_source("Pipe notification request failed", e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if is_retryable_status(status) {
                ConnectorError::retryable(format!("Pipe notification error ({}): {}", status, body))
            } else {
                ConnectorError::fatal(format!("Pipe notification error ({}): {}", status, body))
            });
        }

        debug!(pipe = pipe, file = staged_file, "Notified pipe of staged file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_lowercases_account() {
        assert_eq!(
            api_url("MYORG-ACCOUNT123", None),
            "https://myorg-account123.snowflakecomputing.com"
        );
    }

    #[test]
    fn test_api_url_honors_override() {
        assert_eq!(
            api_url("ignored", Some("https://gateway.internal/warehouse/")),
            "https://gateway.internal/warehouse"
        );
    }

    #[test]
    fn test_retryable_status_codes() {
        use reqwest::StatusCode;

        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));

        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("SELECT 1", 120), "SELECT 1");
        assert_eq!(truncate("abcdef", 3), "abc");
    }

    #[tokio::test]
    async fn test_default_stage_helpers_delegate_to_execute() {
        use std::sync::Mutex as StdMutex;

        struct Recording {
            statements: StdMutex<Vec<String>>,
        }

        #[async_trait]
        impl SqlBackend for Recording {
            async fn execute(
                &self,
                statement: &str,
                _binds: &[Vec<Value>],
            ) -> ConnectorResult<QueryOutcome> {
                self.statements.lock().unwrap().push(statement.to_string());
                Ok(QueryOutcome::default())
            }
        }

        let backend = Recording {
            statements: StdMutex::new(Vec::new()),
        };

        backend
            .upload_to_stage(Path::new("/tmp/batch.json.gz"), "EVENTGATE_STAGE")
            .await
            .unwrap();
        backend
            .remove_staged("EVENTGATE_STAGE", "batch.json.gz")
            .await
            .unwrap();

        let statements = backend.statements.lock().unwrap();
        assert!(statements[0].starts_with("PUT file:///tmp/batch.json.gz @EVENTGATE_STAGE"));
        assert_eq!(statements[1], "REMOVE @EVENTGATE_STAGE/batch.json.gz");
    }
}
