//! PlanStore - generic persistent record storage
//!
//! Collections of typed records persisted as append-only JSONL logs that
//! replay to current state on open, with in-memory secondary indexes for
//! filtered queries.
//!
//! # Core Concepts
//!
//! - **Records**: any type implementing [`Record`] can be stored; the trait
//!   names the collection and declares which fields are indexed
//! - **Append-only persistence**: every mutation appends one line; reload
//!   replays the log with last-write-wins semantics
//! - **Secondary indexes**: equality lookups over declared fields without a
//!   full collection scan

use std::collections::HashMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub mod store;

pub use store::Store;

/// Current Unix timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A value that can appear in a secondary index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for IndexValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Comparison operator for filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
}

/// A single filter predicate over an indexed field
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    /// Equality filter
    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    /// Inequality filter
    pub fn ne(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Ne,
            value: value.into(),
        }
    }

    /// Check whether a record's indexed fields satisfy this filter.
    ///
    /// A record that does not declare the field never matches `Eq` and
    /// always matches `Ne`.
    pub fn matches(&self, fields: &HashMap<String, IndexValue>) -> bool {
        match (self.op, fields.get(&self.field)) {
            (FilterOp::Eq, Some(v)) => *v == self.value,
            (FilterOp::Eq, None) => false,
            (FilterOp::Ne, Some(v)) => *v != self.value,
            (FilterOp::Ne, None) => true,
        }
    }
}

/// A storable record
///
/// Implementors pick a collection name and declare the fields that should be
/// queryable through [`Store::list`].
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Unique identifier within the collection
    fn id(&self) -> &str;

    /// Last update timestamp (Unix milliseconds)
    fn updated_at(&self) -> i64;

    /// Name of the collection this record type lives in
    fn collection_name() -> &'static str;

    /// Fields exposed to the secondary index
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
