//! Schema registry for the warehouse destination
//!
//! Maps each record kind to an ordered list of typed columns. Column order is
//! load-bearing: it defines positional binding for row-array writes. The
//! registry is pure lookup, no state.

use eventgate_connect_core::RecordKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend column type vocabulary.
///
/// `Variant` marks semi-structured columns whose values travel as nested JSON
/// and need special serialization handling (see the payload shaper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Varchar,
    Number,
    Boolean,
    TimestampNtz,
    Variant,
}

impl ColumnType {
    /// SQL type name used in synthesized DDL.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Number => "NUMBER",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::TimestampNtz => "TIMESTAMP_NTZ",
            ColumnType::Variant => "VARIANT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One typed column of a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty }
    }

    pub fn is_variant(&self) -> bool {
        self.ty == ColumnType::Variant
    }
}

/// Ordered column list for one record kind.
pub type TableSchema = &'static [Column];

const EVENT_COLUMNS: TableSchema = &[
    Column::new("EVENT", ColumnType::Varchar),
    Column::new("EVENT_TIME", ColumnType::TimestampNtz),
    Column::new("DISTINCT_ID", ColumnType::Varchar),
    Column::new("INSERT_ID", ColumnType::Varchar),
    Column::new("PROPERTIES", ColumnType::Variant),
];

const USER_COLUMNS: TableSchema = &[
    Column::new("DISTINCT_ID", ColumnType::Varchar),
    Column::new("OPERATION", ColumnType::Varchar),
    Column::new("TOKEN", ColumnType::Varchar),
    Column::new("UPDATED_AT", ColumnType::TimestampNtz),
    Column::new("PROPERTIES", ColumnType::Variant),
];

const GROUP_COLUMNS: TableSchema = &[
    Column::new("GROUP_KEY", ColumnType::Varchar),
    Column::new("GROUP_ID", ColumnType::Varchar),
    Column::new("TOKEN", ColumnType::Varchar),
    Column::new("UPDATED_AT", ColumnType::TimestampNtz),
    Column::new("PROPERTIES", ColumnType::Variant),
];

/// Look up the column schema for a record kind.
pub fn schema_for(kind: RecordKind) -> TableSchema {
    match kind {
        RecordKind::Track => EVENT_COLUMNS,
        RecordKind::Engage => USER_COLUMNS,
        RecordKind::Groups => GROUP_COLUMNS,
    }
}

/// Whether a schema contains at least one variant column.
pub fn has_variant_column(schema: TableSchema) -> bool {
    schema.iter().any(Column::is_variant)
}

/// Comma-separated column name list, in schema order.
pub fn column_list(schema: TableSchema) -> String {
    schema
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Synthesize a `CREATE TABLE` definition from the schema.
pub fn create_table_ddl(table: &str, schema: TableSchema) -> String {
    let columns = schema
        .iter()
        .map(|c| format!("{} {}", c.name, c.ty.as_sql()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({})", table, columns)
}

/// Semi-structured projection for parse-and-flatten inserts.
///
/// The source-side key is always the lower-cased column name while the
/// destination column keeps its original casing; pre-existing deployments
/// depend on this exact convention.
pub fn flatten_projection(schema: TableSchema) -> String {
    schema
        .iter()
        .map(|c| format!("value:{} AS {}", c.name.to_lowercase(), c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Semi-structured projection for staged-file reads (`$1:` form).
///
/// Same lower-cased key convention as [`flatten_projection`].
pub fn staged_projection(schema: TableSchema) -> String {
    schema
        .iter()
        .map(|c| format!("$1:{} AS {}", c.name.to_lowercase(), c.name))
        .collect::<Vec<_>>()
        .join(", ")
}
