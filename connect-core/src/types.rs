//! Core data model shared by all destination adapters
//!
//! These types form the wire contract between the dispatching layer and the
//! adapters: which logical tables exist, which kind of record a batch carries,
//! and what a completed delivery looks like.

use crate::error::{ConnectorError, ConnectorResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A flattened event record as produced by the upstream transform step.
pub type FlatRecord = serde_json::Map<String, serde_json::Value>;

/// Logical destination table identifiers, one per record kind.
///
/// Immutable per process configuration; every adapter call receives the same
/// set for a given destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    /// Table receiving event (track) records
    pub event_table: String,

    /// Table receiving user profile (engage) records
    pub user_table: String,

    /// Table receiving group profile records
    pub group_table: String,
}

impl TableNames {
    /// Resolve the table name for a record kind.
    pub fn table_for(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Track => &self.event_table,
            RecordKind::Engage => &self.user_table,
            RecordKind::Groups => &self.group_table,
        }
    }

    /// All three table names, in record-kind order.
    pub fn all(&self) -> [&str; 3] {
        [&self.event_table, &self.user_table, &self.group_table]
    }
}

/// Kind of records carried by a batch.
///
/// Closed set; each kind maps 1:1 to a table and a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Event records
    Track,
    /// User profile records
    Engage,
    /// Group profile records
    Groups,
}

impl RecordKind {
    /// All record kinds, in canonical order.
    pub const ALL: [RecordKind; 3] = [RecordKind::Track, RecordKind::Engage, RecordKind::Groups];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Track => "track",
            RecordKind::Engage => "engage",
            RecordKind::Groups => "groups",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = ConnectorError;

    /// Parse a dispatcher-supplied record kind.
    ///
    /// An unrecognized kind is a configuration error and must be raised
    /// before any backend call is made.
    fn from_str(s: &str) -> ConnectorResult<Self> {
        match s {
            "track" => Ok(RecordKind::Track),
            "engage" => Ok(RecordKind::Engage),
            "groups" => Ok(RecordKind::Groups),
            other => Err(ConnectorError::config(format!(
                "unrecognized record kind '{}' (expected track, engage or groups)",
                other
            ))),
        }
    }
}

/// Terminal status of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertStatus {
    /// Result created but not yet resolved
    Born,
    /// Batch delivered (possibly with per-row failures for row-level transports)
    Success,
    /// Batch rejected by the backend
    Error,
}

/// Extra delivery metadata attached to an [`InsertResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertMeta {
    /// Name of the transport that performed the write (insert/copy/pipe/put)
    pub method: String,
}

/// Outcome of delivering one batch to one destination table.
///
/// Invariant: for any terminal status other than a propagated error,
/// `inserted_rows + failed_rows` equals the batch length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertResult {
    pub status: InsertStatus,
    pub inserted_rows: usize,
    pub failed_rows: usize,

    /// Destination table the batch was addressed to
    pub dest: String,

    /// Wall-clock duration of the delivery, stamped by the adapter facade
    pub duration_ms: u64,

    /// Backend error message, preserved verbatim for observability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<InsertMeta>,
}

impl InsertResult {
    /// A freshly created, unresolved result.
    pub fn born(dest: impl Into<String>) -> Self {
        Self {
            status: InsertStatus::Born,
            inserted_rows: 0,
            failed_rows: 0,
            dest: dest.into(),
            duration_ms: 0,
            error_message: None,
            meta: None,
        }
    }

    /// A successful delivery of `inserted` rows via `method`.
    pub fn success(dest: impl Into<String>, inserted: usize, failed: usize, method: &str) -> Self {
        let mut result = Self::born(dest);
        result.status = InsertStatus::Success;
        result.inserted_rows = inserted;
        result.failed_rows = failed;
        result.meta = Some(InsertMeta {
            method: method.to_string(),
        });
        result
    }

    /// A terminal failure covering the whole batch.
    pub fn failure(
        dest: impl Into<String>,
        batch_len: usize,
        method: &str,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::born(dest);
        result.status = InsertStatus::Error;
        result.failed_rows = batch_len;
        result.error_message = Some(message.into());
        result.meta = Some(InsertMeta {
            method: method.to_string(),
        });
        result
    }
}

/// Summary returned by a destructive `drop` of destination resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropSummary {
    pub num_resources_dropped: usize,
    pub resources_dropped: Vec<String>,
}

impl DropSummary {
    /// Record one successfully dropped resource.
    pub fn record(&mut self, resource: impl Into<String>) {
        self.resources_dropped.push(resource.into());
        self.num_resources_dropped = self.resources_dropped.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_parsing() {
        assert_eq!("track".parse::<RecordKind>().unwrap(), RecordKind::Track);
        assert_eq!("engage".parse::<RecordKind>().unwrap(), RecordKind::Engage);
        assert_eq!("groups".parse::<RecordKind>().unwrap(), RecordKind::Groups);

        let err = "pageview".parse::<RecordKind>().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("pageview"));
    }

    #[test]
    fn test_table_resolution() {
        let tables = TableNames {
            event_table: "EVENTS".to_string(),
            user_table: "USERS".to_string(),
            group_table: "GROUPS".to_string(),
        };

        assert_eq!(tables.table_for(RecordKind::Track), "EVENTS");
        assert_eq!(tables.table_for(RecordKind::Engage), "USERS");
        assert_eq!(tables.table_for(RecordKind::Groups), "GROUPS");
        assert_eq!(tables.all(), ["EVENTS", "USERS", "GROUPS"]);
    }

    #[test]
    fn test_insert_result_starts_born() {
        let result = InsertResult::born("EVENTS");
        assert_eq!(result.status, InsertStatus::Born);
        assert_eq!(result.inserted_rows + result.failed_rows, 0);
        assert!(result.error_message.is_none());
        assert!(result.meta.is_none());
    }

    #[test]
    fn test_insert_result_invariant() {
        let result = InsertResult::success("EVENTS", 3, 0, "insert");
        assert_eq!(result.inserted_rows + result.failed_rows, 3);
        assert_eq!(result.meta.unwrap().method, "insert");

        let result = InsertResult::failure("EVENTS", 5, "insert", "table dropped");
        assert_eq!(result.status, InsertStatus::Error);
        assert_eq!(result.inserted_rows, 0);
        assert_eq!(result.failed_rows, 5);
        assert_eq!(result.error_message.as_deref(), Some("table dropped"));
    }

    #[test]
    fn test_drop_summary_counts() {
        let mut summary = DropSummary::default();
        summary.record("table EVENTS");
        summary.record("stage EVENTGATE_STAGE");
        assert_eq!(summary.num_resources_dropped, 2);
        assert_eq!(summary.resources_dropped.len(), 2);
    }
}
