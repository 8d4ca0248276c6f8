//! StateManager - actor that owns the persistent Store
//!
//! Processes commands via channels for thread-safe access to sessions,
//! constraints, and the sync transaction log. Sequence numbers for the
//! transaction log are allocated inside the actor, so appends for the same
//! session can never race.

use std::path::Path;

use planstore::{Filter, Store};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{Constraint, Session, SyncTransaction};

use super::messages::{StateCommand, StateError, StateResponse};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor over the store at `store_path`
    pub fn spawn(store_path: impl AsRef<Path>) -> eyre::Result<Self> {
        let mut store = Store::open(store_path.as_ref())?;

        // Rebuild indexes for all record types after replay so filtered
        // queries work from the first command
        let sessions = store.rebuild_indexes::<Session>()?;
        let constraints = store.rebuild_indexes::<Constraint>()?;
        let transactions = store.rebuild_indexes::<SyncTransaction>()?;
        info!(sessions, constraints, transactions, "Rebuilt store indexes");

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));

        info!("StateManager spawned");
        Ok(Self { tx })
    }

    /// Get the session for an (owner, date) key
    pub async fn get_session(&self, owner_id: &str, target_date: chrono::NaiveDate) -> StateResponse<Option<Session>> {
        debug!(%owner_id, %target_date, "get_session: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::GetSession {
                owner_id: owner_id.to_string(),
                target_date,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Create or replace a session record
    pub async fn upsert_session(&self, session: Session) -> StateResponse<()> {
        debug!(session_id = %session.id, stage = %session.stage, "upsert_session: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::UpsertSession {
                session,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// List constraints, optionally filtered to one logical identity
    pub async fn list_constraints(&self, identity: Option<String>) -> StateResponse<Vec<Constraint>> {
        debug!(?identity, "list_constraints: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::ListConstraints {
                identity,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Persist a new constraint record
    pub async fn create_constraint(&self, record: Constraint) -> StateResponse<String> {
        debug!(uid = %record.uid, rule = %record.rule.kind, "create_constraint: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::CreateConstraint {
                record,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Update an existing constraint record (e.g. supersession)
    pub async fn update_constraint(&self, record: Constraint) -> StateResponse<()> {
        debug!(uid = %record.uid, status = %record.status, "update_constraint: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::UpdateConstraint {
                record,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Append a transaction to a session's log.
    ///
    /// The actor assigns the next sequence number before persisting; the
    /// returned transaction carries it.
    pub async fn append_transaction(&self, transaction: SyncTransaction) -> StateResponse<SyncTransaction> {
        debug!(txn_id = %transaction.id, session = %transaction.session_id, "append_transaction: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::AppendTransaction {
                transaction,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// List a session's transactions in sequence order
    pub async fn list_transactions(&self, session_id: &str) -> StateResponse<Vec<SyncTransaction>> {
        debug!(%session_id, "list_transactions: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::ListTransactions {
                session_id: session_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Update an existing transaction (e.g. to record an undo)
    pub async fn update_transaction(&self, transaction: SyncTransaction) -> StateResponse<()> {
        debug!(txn_id = %transaction.id, "update_transaction: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::UpdateTransaction {
                transaction,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Request actor shutdown
    pub async fn shutdown(&self) {
        let _ = self.tx.send(StateCommand::Shutdown).await;
    }
}

/// The actor task: single owner of the Store
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    info!("StateManager actor started");

    while let Some(command) = rx.recv().await {
        match command {
            StateCommand::GetSession {
                owner_id,
                target_date,
                reply,
            } => {
                let id = Session::key(&owner_id, target_date);
                let result = store
                    .get::<Session>(&id)
                    .map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StateCommand::UpsertSession { session, reply } => {
                let result = store
                    .upsert(&session)
                    .map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StateCommand::ListConstraints { identity, reply } => {
                let filters: Vec<Filter> = match identity {
                    Some(identity) => vec![Filter::eq("identity", identity)],
                    None => Vec::new(),
                };
                let result = store
                    .list::<Constraint>(&filters)
                    .map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StateCommand::CreateConstraint { record, reply } => {
                let uid = record.uid.clone();
                let result = store
                    .create(&record)
                    .map(|_| uid)
                    .map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StateCommand::UpdateConstraint { record, reply } => {
                let result = store
                    .update(&record)
                    .map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StateCommand::AppendTransaction { mut transaction, reply } => {
                let result = (|| {
                    let existing = store
                        .list::<SyncTransaction>(&[Filter::eq("session", transaction.session_id.as_str())])
                        .map_err(|e| StateError::StoreError(e.to_string()))?;
                    transaction.seq = existing.iter().map(|t| t.seq).max().unwrap_or(0) + 1;
                    store
                        .create(&transaction)
                        .map_err(|e| StateError::StoreError(e.to_string()))?;
                    Ok(transaction)
                })();
                let _ = reply.send(result);
            }

            StateCommand::ListTransactions { session_id, reply } => {
                let result = store
                    .list::<SyncTransaction>(&[Filter::eq("session", session_id.as_str())])
                    .map(|mut transactions| {
                        transactions.sort_by_key(|t| t.seq);
                        transactions
                    })
                    .map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StateCommand::UpdateTransaction { transaction, reply } => {
                let result = store
                    .update(&transaction)
                    .map_err(|e| StateError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    info!("StateManager actor stopped");
}
