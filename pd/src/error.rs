//! Core error taxonomy
//!
//! Validation failures are recovered locally by the refinement loop and only
//! surface after retry exhaustion. Sync failures carry enough context (which
//! operation, which block) for the caller to decide retry vs. abandon. Stage
//! and session errors are fatal to the turn that raised them.

use thiserror::Error;

/// A single plan-invariant violation detected by validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("blocks '{first}' and '{second}' overlap")]
    Overlap { first: String, second: String },

    #[error("immovable block '{id}' cannot be created, moved, or removed")]
    ImmovableTouched { id: String },

    #[error("block '{id}' falls outside the day window")]
    OutsideHorizon { id: String },

    #[error("block '{id}' ends at or before it starts")]
    EmptyRange { id: String },

    #[error("no block with id '{id}'")]
    UnknownBlock { id: String },

    #[error("duplicate block id '{id}'")]
    DuplicateBlock { id: String },
}

/// Refinement gave up: every synthesized patch violated an invariant
#[derive(Debug, Clone, Error)]
#[error("no valid patch after {attempts} attempts: {last}")]
pub struct ValidationFailure {
    /// Attempts consumed before giving up
    pub attempts: u32,
    /// The violation from the final attempt
    pub last: Violation,
}

/// Errors from the remote calendar collaborator
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("remote item not found: {0}")]
    NotFound(String),

    /// Treated exactly like any other operation failure: the sync rollback
    /// path runs, never the success path
    #[error("remote call timed out: {0}")]
    Timeout(String),

    #[error("remote rejected {id}: {reason}")]
    Rejected { id: String, reason: String },
}

/// A remote operation failed mid-apply; prior operations were rolled back
#[derive(Debug, Error)]
#[error("remote {action} for block '{block_id}' failed ({rolled_back} prior ops rolled back): {source}")]
pub struct SyncFailure {
    /// Which operation failed: "create", "update", or "delete"
    pub action: String,
    /// Local block the operation was for
    pub block_id: String,
    /// Operations already applied in this call that were reverted
    pub rolled_back: usize,
    #[source]
    pub source: RemoteError,
}

/// Errors from the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Failure(#[from] SyncFailure),

    /// The observed remote state no longer matches the baseline the diff
    /// assumes. The caller must reconcile (re-read remote state) before
    /// retrying; the engine never overwrites blind.
    #[error("remote item '{remote_id}' diverged from baseline: {reason}")]
    RemoteInconsistency { remote_id: String, reason: String },

    #[error("failed to read remote state: {0}")]
    Snapshot(#[source] RemoteError),

    #[error("transaction log: {0}")]
    Log(String),
}

/// Errors surfaced by the orchestrator for a single turn
#[derive(Debug, Error)]
pub enum TurnError {
    /// Another turn for this session is in flight. Deterministic policy:
    /// reject immediately, caller retries later.
    #[error("session '{key}' is busy with another turn")]
    SessionBusy { key: String },

    /// A handler asked for a transition the stage machine does not permit.
    /// Never clamped; the turn fails loudly.
    #[error("illegal stage transition: {from} -> {to}")]
    StageTransition { from: String, to: String },

    /// A stage handler failed; session state was rolled back to its pre-turn
    /// snapshot and the turn may be retried.
    #[error("stage handler failed (retryable): {reason}")]
    Handler { reason: String },

    #[error("state error: {0}")]
    State(String),
}
