//! Entity and statement types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier type for stored records.
pub type RecordId = i64;

/// A stored record: an integer identifier and a name.
///
/// Cached by value, so every cached copy is independent of its origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub name: String,
}

impl Record {
    pub fn new(id: RecordId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Canonical cache key for a record id (its decimal form).
    pub fn cache_key_for(id: RecordId) -> String {
        id.to_string()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record{{id={}, name='{}'}}", self.id, self.name)
    }
}

/// Acknowledgment returned by a successful insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertAck {
    pub id: RecordId,
}

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlParam {
    Int(i64),
    Text(String),
}

impl SqlParam {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlParam::Int(v) => Some(*v),
            SqlParam::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlParam::Text(v) => Some(v),
            SqlParam::Int(_) => None,
        }
    }
}

/// Whether a statement mutates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Insert,
    SelectById,
}

/// A parameterized statement handed to a data access implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn param(&self, index: usize) -> Option<&SqlParam> {
        self.params.get(index)
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub rows_affected: u64,
    pub last_insert_id: Option<RecordId>,
}

/// Builds the statements used for records in a given table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStatements {
    table: String,
}

impl Default for RecordStatements {
    fn default() -> Self {
        Self::new("users")
    }
}

impl RecordStatements {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `INSERT` returning the auto-assigned id.
    pub fn insert(&self, name: &str) -> Statement {
        Statement {
            kind: StatementKind::Insert,
            sql: format!("INSERT INTO {} (name) VALUES ($1) RETURNING id", self.table),
            params: vec![SqlParam::Text(name.to_string())],
        }
    }

    pub fn select_by_id(&self, id: RecordId) -> Statement {
        Statement {
            kind: StatementKind::SelectById,
            sql: format!("SELECT id, name FROM {} WHERE id = $1", self.table),
            params: vec![SqlParam::Int(id)],
        }
    }

    /// DDL creating the record table if it is missing.
    pub fn create_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL)",
            self.table
        )
    }
}
