//! Payload shaper for the warehouse destination
//!
//! Turns a batch of flat records plus a table schema into the wire form the
//! backend expects. Schemas without a variant column bind row arrays
//! positionally; schemas with a variant column ship the whole batch as one
//! serialized JSON array and let the backend flatten it server-side.
//!
//! Pure functions, no backend calls.

use crate::schema::{self, Column, TableSchema};
use eventgate_connect_core::{ConnectorResult, FlatRecord};
use serde_json::Value;
use tracing::warn;

/// Destination-specific wire form of one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WirePayload {
    /// Positional row arrays in schema-column order, one per record
    Rows {
        statement: String,
        rows: Vec<Vec<Value>>,
    },

    /// The whole batch as a single JSON-array blob, bound as one parameter
    VariantBlob { statement: String, blob: String },
}

impl WirePayload {
    pub fn statement(&self) -> &str {
        match self {
            WirePayload::Rows { statement, .. } => statement,
            WirePayload::VariantBlob { statement, .. } => statement,
        }
    }
}

/// Shape a batch into the wire form required by `schema`.
pub fn shape(batch: &[FlatRecord], schema: TableSchema, table: &str) -> ConnectorResult<WirePayload> {
    if schema::has_variant_column(schema) {
        shape_variant(batch, schema, table)
    } else {
        shape_rows(batch, schema, table)
    }
}

/// Parameterized multi-column insert for the positional-bind form.
pub fn insert_statement(table: &str, schema: TableSchema) -> String {
    let placeholders = schema.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        schema::column_list(schema),
        placeholders
    )
}

/// Parse-and-flatten insert for the semi-structured form.
///
/// The single bind is the JSON-array blob; the backend flattens it and each
/// target column is projected from the parsed structure via the lower-cased
/// key convention.
pub fn variant_insert_statement(table: &str, schema: TableSchema) -> String {
    format!(
        "INSERT INTO {} ({}) SELECT {} FROM TABLE(FLATTEN(input => PARSE_JSON(?)))",
        table,
        schema::column_list(schema),
        schema::flatten_projection(schema)
    )
}

fn shape_rows(batch: &[FlatRecord], schema: TableSchema, table: &str) -> ConnectorResult<WirePayload> {
    let rows = batch
        .iter()
        .map(|record| {
            schema
                .iter()
                .map(|column| {
                    let value = record
                        .get(&column.name.to_lowercase())
                        .cloned()
                        .unwrap_or(Value::Null);
                    normalize_value(value, column)
                })
                .collect()
        })
        .collect();

    Ok(WirePayload::Rows {
        statement: insert_statement(table, schema),
        rows,
    })
}

fn shape_variant(
    batch: &[FlatRecord],
    schema: TableSchema,
    table: &str,
) -> ConnectorResult<WirePayload> {
    let repaired: Vec<Value> = batch
        .iter()
        .map(|record| repair_record(record, schema))
        .collect();

    let blob = serde_json::to_string(&repaired).map_err(|e| {
        eventgate_connect_core::ConnectorError::fatal_with_source(
            "Failed to serialize batch as JSON array",
            e,
        )
    })?;

    Ok(WirePayload::VariantBlob {
        statement: variant_insert_statement(table, schema),
        blob,
    })
}

/// Repair one record for the semi-structured form: parse stringified variant
/// fields back into structures, then null-normalize every field.
///
/// Also used when serializing records into staged files, where the backend
/// reads them back through the same lower-cased key projection.
pub(crate) fn repair_record(record: &FlatRecord, schema: TableSchema) -> Value {
    let mut repaired = record.clone();

    for column in schema.iter().filter(|c| c.is_variant()) {
        let key = column.name.to_lowercase();
        if let Some(Value::String(s)) = repaired.get(&key) {
            if is_null_like(s) {
                continue; // handled by the normalization pass below
            }
            match serde_json::from_str::<Value>(s) {
                Ok(parsed) => {
                    repaired.insert(key, parsed);
                }
                Err(e) => {
                    // leave the string as-is; the backend stores it verbatim
                    warn!(
                        column = column.name,
                        "Variant field is not parseable JSON, leaving as string: {}", e
                    );
                }
            }
        }
    }

    for (_, value) in repaired.iter_mut() {
        if is_null_value(value) {
            *value = Value::Null;
        }
    }

    Value::Object(repaired)
}

/// Value normalization for positional binds.
///
/// Null-likes become actual null. Strings that parse as JSON structures are
/// replaced by the parsed structure, except for variant-typed columns whose
/// values pass through untouched at this stage.
fn normalize_value(value: Value, column: &Column) -> Value {
    if is_null_value(&value) {
        return Value::Null;
    }

    if column.is_variant() {
        return value;
    }

    if let Value::String(s) = &value {
        if let Ok(parsed) = serde_json::from_str::<Value>(s) {
            if parsed.is_object() || parsed.is_array() {
                return parsed;
            }
        }
    }

    value
}

fn is_null_like(s: &str) -> bool {
    s.is_empty() || s == "null"
}

fn is_null_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => is_null_like(s),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventgate_connect_core::RecordKind;
    use serde_json::json;

    const PLAIN_SCHEMA: TableSchema = &[
        Column::new("EVENT", crate::schema::ColumnType::Varchar),
        Column::new("AMOUNT", crate::schema::ColumnType::Number),
    ];

    fn record(pairs: &[(&str, Value)]) -> FlatRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_rows_preserve_length_and_column_order() {
        let batch = vec![
            record(&[("event", json!("signup")), ("amount", json!(1))]),
            record(&[("amount", json!(2)), ("event", json!("login"))]),
            record(&[("event", json!("purchase"))]),
        ];

        let payload = shape(&batch, PLAIN_SCHEMA, "T").unwrap();
        match payload {
            WirePayload::Rows { statement, rows } => {
                assert_eq!(statement, "INSERT INTO T (EVENT, AMOUNT) VALUES (?, ?)");
                assert_eq!(rows.len(), 3);
                assert_eq!(rows[0], vec![json!("signup"), json!(1)]);
                assert_eq!(rows[1], vec![json!("login"), json!(2)]);
                // missing key binds as null
                assert_eq!(rows[2], vec![json!("purchase"), Value::Null]);
            }
            other => panic!("expected Rows, got {:?}", other),
        }
    }

    #[test]
    fn test_null_like_values_normalize_to_null() {
        let batch = vec![record(&[
            ("event", json!("")),
            ("amount", json!("null")),
        ])];

        let payload = shape(&batch, PLAIN_SCHEMA, "T").unwrap();
        match payload {
            WirePayload::Rows { rows, .. } => {
                assert_eq!(rows[0], vec![Value::Null, Value::Null]);
            }
            other => panic!("expected Rows, got {:?}", other),
        }
    }

    #[test]
    fn test_json_strings_are_parsed_for_non_variant_columns() {
        let batch = vec![record(&[
            ("event", json!(r#"{"nested": true}"#)),
            ("amount", json!("42")),
        ])];

        let payload = shape(&batch, PLAIN_SCHEMA, "T").unwrap();
        match payload {
            WirePayload::Rows { rows, .. } => {
                assert_eq!(rows[0][0], json!({"nested": true}));
                // scalar-parsing strings are not replaced, only structures are
                assert_eq!(rows[0][1], json!("42"));
            }
            other => panic!("expected Rows, got {:?}", other),
        }
    }

    #[test]
    fn test_variant_schema_produces_single_json_array_blob() {
        let schema = crate::schema::schema_for(RecordKind::Engage);
        let batch: Vec<FlatRecord> = (0..5)
            .map(|i| {
                record(&[
                    ("distinct_id", json!(format!("user-{}", i))),
                    ("operation", json!("$set")),
                    ("properties", json!("null")),
                ])
            })
            .collect();

        let payload = shape(&batch, schema, "ANALYTICS_USERS").unwrap();
        match payload {
            WirePayload::VariantBlob { statement, blob } => {
                assert!(statement.contains("PARSE_JSON(?)"));
                assert!(statement.contains("value:properties AS PROPERTIES"));

                let parsed: Vec<Value> = serde_json::from_str(&blob).unwrap();
                assert_eq!(parsed.len(), 5);
                for row in &parsed {
                    // the literal string "null" became an actual null
                    assert_eq!(row["properties"], Value::Null);
                }
            }
            other => panic!("expected VariantBlob, got {:?}", other),
        }
    }

    #[test]
    fn test_variant_string_fields_are_parsed_into_structures() {
        let schema = crate::schema::schema_for(RecordKind::Track);
        let batch = vec![record(&[
            ("event", json!("signup")),
            ("properties", json!(r#"{"plan": "pro"}"#)),
        ])];

        let payload = shape(&batch, schema, "ANALYTICS_EVENTS").unwrap();
        match payload {
            WirePayload::VariantBlob { blob, .. } => {
                let parsed: Vec<Value> = serde_json::from_str(&blob).unwrap();
                assert_eq!(parsed[0]["properties"], json!({"plan": "pro"}));
            }
            other => panic!("expected VariantBlob, got {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_variant_string_left_as_is() {
        let schema = crate::schema::schema_for(RecordKind::Track);
        let batch = vec![record(&[
            ("event", json!("signup")),
            ("properties", json!("{not json")),
        ])];

        let payload = shape(&batch, schema, "ANALYTICS_EVENTS").unwrap();
        match payload {
            WirePayload::VariantBlob { blob, .. } => {
                let parsed: Vec<Value> = serde_json::from_str(&blob).unwrap();
                assert_eq!(parsed[0]["properties"], json!("{not json"));
            }
            other => panic!("expected VariantBlob, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_batch_shapes_to_empty_payload() {
        let payload = shape(&[], PLAIN_SCHEMA, "T").unwrap();
        match payload {
            WirePayload::Rows { rows, .. } => assert!(rows.is_empty()),
            other => panic!("expected Rows, got {:?}", other),
        }
    }
}
