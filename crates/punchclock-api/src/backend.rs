use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use punchclock_types::ids::value_as_id;
use punchclock_types::tables::Table;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Conjunction of `column = value` conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<(String, String)>,
}

impl Filter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::none().and(column, value)
    }

    pub fn and(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    /// `eq` when `value` is set, no condition otherwise.
    pub fn eq_opt(column: impl Into<String>, value: Option<&str>) -> Self {
        match value {
            Some(value) => Self::eq(column, value),
            None => Self::none(),
        }
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether a raw row satisfies every condition. Ids compare by their
    /// string form, so `7` matches `"7"`.
    pub fn matches(&self, row: &Value) -> bool {
        self.conditions.iter().all(|(column, expected)| {
            row.get(column)
                .and_then(|v| match v {
                    Value::Bool(b) => Some(b.to_string()),
                    other => value_as_id(other),
                })
                .is_some_and(|actual| actual == *expected)
        })
    }
}

/// Data side of the hosted backend. Rows travel as raw JSON; typing happens
/// in the facade.
#[async_trait]
pub trait HostedBackend: Send + Sync {
    async fn fetch_all(&self, table: Table, filter: &Filter) -> Result<Vec<Value>, BackendError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError>;

    /// Apply a partial update to the row with `id` and return the result.
    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, BackendError>;

    async fn delete(&self, table: Table, id: &str) -> Result<(), BackendError>;
}

/// Shallow merge of `patch`'s fields into `row`.
pub fn merge_patch(row: &mut Value, patch: &Value) {
    if let (Some(target), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Id of a raw row, if it has one.
pub fn row_id(row: &Value) -> Option<String> {
    row.get("id").and_then(value_as_id)
}
