//! Sync transaction log records
//!
//! Every successful sync appends one transaction carrying enough prior state
//! to reconstruct the exact inverse of each operation. The log is
//! append-only per session with monotonically increasing sequence numbers.

use std::collections::HashMap;

use planstore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};

use crate::sync::remote::RemoteItem;

use super::id::generate_id;

/// Remote mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One applied remote operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub action: SyncAction,

    /// The plan block this operation was for
    pub local_block_id: String,

    /// Remote item id: assigned for Create, targeted for Update/Delete
    pub remote_id: String,

    /// Remote state before the operation; populated for Update and Delete
    /// so the inverse can be reconstructed. Create's inverse is
    /// delete-by-remote-id and needs no prior state.
    pub prior_remote_state: Option<RemoteItem>,
}

impl SyncOperation {
    /// Check the reversibility invariant for this operation
    pub fn is_reversible(&self) -> bool {
        match self.action {
            SyncAction::Create => true,
            SyncAction::Update | SyncAction::Delete => self.prior_remote_state.is_some(),
        }
    }
}

/// A committed batch of remote operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTransaction {
    pub id: String,
    pub session_id: String,

    /// Monotonically increasing per session; assigned by the state manager
    /// when the transaction is appended
    pub seq: u64,

    /// Unix milliseconds when the transaction committed
    pub timestamp: i64,

    /// Operations in application order
    pub operations: Vec<SyncOperation>,

    /// Set once the transaction has been undone; undoing again is a no-op
    pub undone_at: Option<i64>,
}

impl SyncTransaction {
    /// Create an unsequenced transaction; `seq` is assigned on append
    pub fn new(session_id: impl Into<String>, operations: Vec<SyncOperation>) -> Self {
        let session_id = session_id.into();
        Self {
            id: generate_id("txn", &format!("sync {}", session_id)),
            session_id,
            seq: 0,
            timestamp: now_ms(),
            operations,
            undone_at: None,
        }
    }

    pub fn is_undone(&self) -> bool {
        self.undone_at.is_some()
    }

    pub fn mark_undone(&mut self) {
        self.undone_at = Some(now_ms());
    }
}

impl Record for SyncTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.undone_at.unwrap_or(self.timestamp)
    }

    fn collection_name() -> &'static str {
        "sync_transactions"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("session".to_string(), IndexValue::String(self.session_id.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn item(id: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            date: NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            label: "Block".to_string(),
            movable: true,
        }
    }

    #[test]
    fn test_operation_reversibility() {
        let create = SyncOperation {
            action: SyncAction::Create,
            local_block_id: "a".to_string(),
            remote_id: "evt-1".to_string(),
            prior_remote_state: None,
        };
        assert!(create.is_reversible());

        let bad_update = SyncOperation {
            action: SyncAction::Update,
            local_block_id: "a".to_string(),
            remote_id: "evt-1".to_string(),
            prior_remote_state: None,
        };
        assert!(!bad_update.is_reversible());

        let delete = SyncOperation {
            action: SyncAction::Delete,
            local_block_id: "a".to_string(),
            remote_id: "evt-1".to_string(),
            prior_remote_state: Some(item("evt-1")),
        };
        assert!(delete.is_reversible());
    }

    #[test]
    fn test_transaction_new() {
        let txn = SyncTransaction::new("james@2026-08-06", vec![]);
        assert!(txn.id.contains("-txn-"));
        assert_eq!(txn.seq, 0);
        assert!(!txn.is_undone());
    }

    #[test]
    fn test_mark_undone() {
        let mut txn = SyncTransaction::new("james@2026-08-06", vec![]);
        txn.mark_undone();
        assert!(txn.is_undone());
    }
}
