//! State manager messages
//!
//! Commands and responses for the actor pattern.

use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Constraint, Session, SyncTransaction};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Session operations
    GetSession {
        owner_id: String,
        target_date: NaiveDate,
        reply: oneshot::Sender<StateResponse<Option<Session>>>,
    },
    UpsertSession {
        session: Session,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Constraint operations
    ListConstraints {
        identity: Option<String>,
        reply: oneshot::Sender<StateResponse<Vec<Constraint>>>,
    },
    CreateConstraint {
        record: Constraint,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    UpdateConstraint {
        record: Constraint,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Transaction log operations
    AppendTransaction {
        transaction: SyncTransaction,
        reply: oneshot::Sender<StateResponse<SyncTransaction>>,
    },
    ListTransactions {
        session_id: String,
        reply: oneshot::Sender<StateResponse<Vec<SyncTransaction>>>,
    },
    UpdateTransaction {
        transaction: SyncTransaction,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Shutdown
    Shutdown,
}
