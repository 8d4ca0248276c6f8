//! ConstraintStore - read path and background write path for planning facts
//!
//! Reads are deterministic: a retrieval first drains the background queue
//! (so every write from a turn that completed earlier is visible), then
//! queries and deduplicates through pure functions. Writes never block the
//! calling turn; `enqueue_upsert` hands the draft to the runner and returns.

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::{Constraint, ConstraintDraft, ConstraintStatus, Stage};
use crate::runner::{Job, Runner};
use crate::state::{StateManager, StateResponse};

use super::query;

/// Handle over the constraint read/write paths
#[derive(Clone)]
pub struct ConstraintStore {
    state: StateManager,
    runner: Runner,
}

impl ConstraintStore {
    pub fn new(state: StateManager, runner: Runner) -> Self {
        Self { state, runner }
    }

    /// Retrieve the constraints relevant to a stage on a date.
    ///
    /// Flushing the runner first is the visibility barrier: all writes
    /// enqueued by previously completed turns are applied before the query
    /// runs. Mid-turn writes may or may not be visible, which the ordering
    /// contract explicitly leaves open.
    pub async fn retrieve(
        &self,
        stage: Stage,
        as_of: NaiveDate,
        event_types: &[String],
    ) -> StateResponse<Vec<Constraint>> {
        self.runner.flush().await;
        let records = self.state.list_constraints(None).await?;
        let selected = query::select(stage, as_of, event_types, records);
        debug!(%stage, %as_of, selected = selected.len(), "Constraint retrieval");
        Ok(selected)
    }

    /// Queue a constraint candidate for background persistence; returns
    /// immediately without waiting for the write.
    pub async fn enqueue_upsert(&self, draft: ConstraintDraft) {
        debug!(rule = %draft.rule.kind, scope = %draft.scope, "Enqueueing constraint upsert");
        self.runner.submit(Job::UpsertConstraint(draft)).await;
    }
}

/// Persist one constraint draft: assign the UID, link and mark superseded
/// predecessors, and create the new record.
///
/// Idempotent: re-running with a draft whose live record already matches is
/// a no-op, so at-least-once job delivery is safe. Returns whether a new
/// record was written.
pub async fn apply_upsert(state: &StateManager, draft: ConstraintDraft) -> StateResponse<bool> {
    let identity = draft.identity();
    let existing = state.list_constraints(Some(identity)).await?;

    let live: Vec<&Constraint> = existing
        .iter()
        .filter(|c| !matches!(c.status, ConstraintStatus::Superseded | ConstraintStatus::Archived))
        .collect();

    // Already applied: same rule, same applicability, same lock level
    let target_status = if draft.lock {
        ConstraintStatus::Locked
    } else {
        ConstraintStatus::Proposed
    };
    if live
        .iter()
        .any(|c| c.rule == draft.rule && c.applicability == draft.applicability && c.status == target_status)
    {
        return Ok(false);
    }

    let superseded: Vec<Constraint> = live.into_iter().cloned().collect();
    let supersedes_uids: Vec<String> = superseded.iter().map(|c| c.uid.clone()).collect();

    // The new record carries its chain links before it becomes visible
    let record = draft.into_constraint(supersedes_uids);
    state.create_constraint(record).await?;

    for mut old in superseded {
        old.supersede();
        state.update_constraint(old).await?;
    }

    Ok(true)
}
