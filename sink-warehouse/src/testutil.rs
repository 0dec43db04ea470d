//! Shared test support: a scriptable in-memory SQL backend.

use crate::client::{QueryOutcome, SqlBackend};
use async_trait::async_trait;
use eventgate_connect_core::{ConnectorError, ConnectorResult};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

type Handler = Box<dyn Fn(&str, &[Vec<Value>]) -> ConnectorResult<QueryOutcome> + Send + Sync>;

/// Mock backend that records every executed statement and answers via a
/// pluggable handler.
pub(crate) struct MockBackend {
    calls: Mutex<Vec<String>>,
    handler: Handler,
}

impl MockBackend {
    pub fn with_handler(handler: Handler) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler,
        })
    }

    /// Every resource already exists; readiness probes answer with the
    /// expected unknown-column error; inserts report all rows affected.
    pub fn happy() -> Arc<Self> {
        Self::with_handler(Box::new(|statement, binds| {
            if statement.contains("EVENTGATE_READY_CHECK") {
                return Err(ConnectorError::fatal(
                    "SQL compilation error: invalid identifier 'EVENTGATE_READY_CHECK'",
                ));
            }
            if statement.starts_with("SHOW") {
                return Ok(listing_echoing_like_pattern(statement));
            }
            Ok(QueryOutcome {
                affected_rows: binds.len() as u64,
                rows: Vec::new(),
            })
        }))
    }

    /// Nothing exists yet; creations succeed and are remembered, so a table
    /// is listed only after its CREATE ran; probes answer ready.
    pub fn empty_backend() -> Arc<Self> {
        let created_tables = Mutex::new(Vec::<String>::new());
        Self::with_handler(Box::new(move |statement, binds| {
            if statement.contains("EVENTGATE_READY_CHECK") {
                return Err(ConnectorError::fatal(
                    "SQL compilation error: invalid identifier 'EVENTGATE_READY_CHECK'",
                ));
            }
            if let Some(rest) = statement.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
                if let Some(table) = rest.split_whitespace().next() {
                    created_tables.lock().unwrap().push(table.to_string());
                }
                return Ok(QueryOutcome::default());
            }
            if statement.starts_with("SHOW TABLES") {
                let listed = like_pattern(statement)
                    .map(|name| created_tables.lock().unwrap().iter().any(|t| t == name))
                    .unwrap_or(false);
                if listed {
                    return Ok(listing_echoing_like_pattern(statement));
                }
                return Ok(QueryOutcome::default());
            }
            if statement.starts_with("SHOW") {
                return Ok(QueryOutcome::default());
            }
            Ok(QueryOutcome {
                affected_rows: binds.len() as u64,
                rows: Vec::new(),
            })
        }))
    }

    /// Accepts every statement, including the dummy readiness insert.
    pub fn accept_all() -> Arc<Self> {
        Self::with_handler(Box::new(|statement, binds| {
            if statement.starts_with("SHOW") {
                return Ok(listing_echoing_like_pattern(statement));
            }
            Ok(QueryOutcome {
                affected_rows: binds.len().max(1) as u64,
                rows: Vec::new(),
            })
        }))
    }

    /// Every statement fails with the given message.
    pub fn failing_with(message: &str) -> Arc<Self> {
        let message = message.to_string();
        Self::with_handler(Box::new(move |_, _| Err(ConnectorError::fatal(message.clone()))))
    }

    /// Tables list as existing but the readiness probe always gets an
    /// unrelated error.
    pub fn unwritable_tables() -> Arc<Self> {
        Self::with_handler(Box::new(|statement, binds| {
            if statement.contains("EVENTGATE_READY_CHECK") {
                return Err(ConnectorError::fatal("warehouse is suspended"));
            }
            if statement.starts_with("SHOW") {
                return Ok(listing_echoing_like_pattern(statement));
            }
            Ok(QueryOutcome {
                affected_rows: binds.len() as u64,
                rows: Vec::new(),
            })
        }))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }
}

#[async_trait]
impl SqlBackend for MockBackend {
    async fn execute(&self, statement: &str, binds: &[Vec<Value>]) -> ConnectorResult<QueryOutcome> {
        self.calls.lock().unwrap().push(statement.to_string());
        (self.handler)(statement, binds)
    }
}

/// A one-row listing whose name echoes the statement's LIKE pattern, so
/// existence checks for any name succeed.
fn listing_echoing_like_pattern(statement: &str) -> QueryOutcome {
    let name = like_pattern(statement).unwrap_or("UNNAMED");
    QueryOutcome {
        affected_rows: 0,
        rows: vec![json!({ "name": name })],
    }
}

fn like_pattern(statement: &str) -> Option<&str> {
    statement.split("LIKE '").nth(1)?.split('\'').next()
}
