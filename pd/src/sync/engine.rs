//! SyncEngine - transactional application of plan diffs to the remote
//!
//! The engine snapshots the remote first and refuses to run against a
//! baseline the remote no longer matches. Prior state is captured before
//! every update/delete so each operation has an exact inverse; a failure
//! partway rolls the already-applied operations back before the error is
//! surfaced. Independent creates run with bounded concurrency; updates and
//! deletes are serialized.
//!
//! Cancellation is only honored between calls: once `commit` starts its
//! operation list it runs to success or rolled-back failure, never half-way.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::domain::{Block, PlanModel, SyncAction, SyncOperation, SyncTransaction};
use crate::error::{RemoteError, SyncError, SyncFailure};
use crate::state::StateManager;

use super::diff::{RemoteOp, diff};
use super::remote::{CalendarRemote, RemoteItem};

/// Result of a successful commit
#[derive(Debug)]
pub struct SyncOutcome {
    /// The persisted transaction, or None when the diff was empty and no
    /// remote call was made
    pub transaction: Option<SyncTransaction>,

    /// The plan with remote refs filled in for created blocks. The caller
    /// stores this as both `plan` and the new `baseline`, so the next diff
    /// runs against the just-synced state.
    pub plan: PlanModel,
}

/// Result of an undo
#[derive(Debug, PartialEq, Eq)]
pub enum UndoResult {
    /// Inverse operations were replayed in reverse order
    Undone { operations: usize },
    /// The transaction was already undone; nothing was touched
    AlreadyUndone,
}

/// The sync engine
pub struct SyncEngine {
    remote: Arc<dyn CalendarRemote>,
    state: StateManager,
    create_concurrency: usize,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn CalendarRemote>, state: StateManager, create_concurrency: usize) -> Self {
        Self {
            remote,
            state,
            create_concurrency: create_concurrency.max(1),
        }
    }

    /// Diff `plan` against `baseline` and apply the result remotely.
    ///
    /// An empty diff returns immediately without any remote call, so
    /// resubmitting an unchanged plan is free. The transaction is appended
    /// to the session's log before this returns.
    pub async fn commit(
        &self,
        session_id: &str,
        baseline: &PlanModel,
        plan: &PlanModel,
    ) -> Result<SyncOutcome, SyncError> {
        let ops = diff(baseline, plan);
        if ops.is_empty() {
            debug!(session_id, "Plan already in sync; skipping remote calls");
            return Ok(SyncOutcome {
                transaction: None,
                plan: plan.clone(),
            });
        }

        let snapshot = self.remote.list(plan.date).await.map_err(SyncError::Snapshot)?;
        check_consistency(&ops, &snapshot, baseline)?;
        let snapshot_by_id: HashMap<&str, &RemoteItem> = snapshot.iter().map(|i| (i.id.as_str(), i)).collect();

        // Capture prior state for every update/delete before any mutation,
        // so no inconsistency can surface after operations have applied
        let mut creates = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for op in ops {
            match op {
                RemoteOp::Create { block } => creates.push(block),
                RemoteOp::Update { remote_id, block } => {
                    let prior = capture_prior(&snapshot_by_id, &remote_id)?;
                    updates.push((remote_id, block, prior));
                }
                RemoteOp::Delete { remote_id, block_id } => {
                    let prior = capture_prior(&snapshot_by_id, &remote_id)?;
                    deletes.push((remote_id, block_id, prior));
                }
            }
        }

        let mut applied: Vec<SyncOperation> = Vec::new();
        let mut created_refs: Vec<(String, String)> = Vec::new();

        // Creates are independent of each other; run each chunk
        // concurrently and only look at failures once the whole chunk is
        // settled, so every success is known to the rollback path.
        for chunk in creates.chunks(self.create_concurrency) {
            let futures: Vec<_> = chunk
                .iter()
                .map(|block| self.remote.create(item_for(block, plan.date, None)))
                .collect();
            let results = futures::future::join_all(futures).await;

            let mut failure: Option<(String, RemoteError)> = None;
            for (block, result) in chunk.iter().zip(results) {
                match result {
                    Ok(remote_id) => {
                        applied.push(SyncOperation {
                            action: SyncAction::Create,
                            local_block_id: block.id.clone(),
                            remote_id: remote_id.clone(),
                            prior_remote_state: None,
                        });
                        created_refs.push((block.id.clone(), remote_id));
                    }
                    Err(source) => {
                        if failure.is_none() {
                            failure = Some((block.id.clone(), source));
                        } else {
                            warn!(block_id = %block.id, error = %source, "Additional create failure in chunk");
                        }
                    }
                }
            }

            if let Some((block_id, source)) = failure {
                let rolled_back = self.rollback(&applied).await;
                return Err(SyncFailure {
                    action: SyncAction::Create.to_string(),
                    block_id,
                    rolled_back,
                    source,
                }
                .into());
            }
        }

        // Updates and deletes share block identities with prior state;
        // strictly serialized.
        for (remote_id, block, prior) in updates {
            match self
                .remote
                .update(&remote_id, item_for(&block, plan.date, Some(&remote_id)))
                .await
            {
                Ok(()) => applied.push(SyncOperation {
                    action: SyncAction::Update,
                    local_block_id: block.id.clone(),
                    remote_id,
                    prior_remote_state: Some(prior),
                }),
                Err(source) => {
                    let rolled_back = self.rollback(&applied).await;
                    return Err(SyncFailure {
                        action: SyncAction::Update.to_string(),
                        block_id: block.id.clone(),
                        rolled_back,
                        source,
                    }
                    .into());
                }
            }
        }

        for (remote_id, block_id, prior) in deletes {
            match self.remote.delete(&remote_id).await {
                Ok(()) => applied.push(SyncOperation {
                    action: SyncAction::Delete,
                    local_block_id: block_id,
                    remote_id,
                    prior_remote_state: Some(prior),
                }),
                Err(source) => {
                    let rolled_back = self.rollback(&applied).await;
                    return Err(SyncFailure {
                        action: SyncAction::Delete.to_string(),
                        block_id,
                        rolled_back,
                        source,
                    }
                    .into());
                }
            }
        }

        let operations = applied.len();
        let transaction = self
            .state
            .append_transaction(SyncTransaction::new(session_id, applied))
            .await
            .map_err(|e| SyncError::Log(e.to_string()))?;

        let mut synced = plan.clone();
        for (block_id, remote_id) in created_refs {
            if let Some(block) = synced.blocks.iter_mut().find(|b| b.id == block_id) {
                block.source_ref = Some(remote_id);
            }
        }

        info!(session_id, seq = transaction.seq, operations, "Sync committed");
        Ok(SyncOutcome {
            transaction: Some(transaction),
            plan: synced,
        })
    }

    /// Revert already-applied operations in reverse order. Best effort:
    /// individual inverse failures are logged and skipped so the remainder
    /// still unwinds. Returns how many operations were reverted.
    async fn rollback(&self, applied: &[SyncOperation]) -> usize {
        let mut reverted = 0;
        for op in applied.iter().rev() {
            let result = self.apply_inverse(op).await;
            match result {
                Ok(()) => reverted += 1,
                Err(e) => {
                    warn!(remote_id = %op.remote_id, action = %op.action, error = %e, "Rollback step failed");
                }
            }
        }
        debug!(reverted, total = applied.len(), "Rollback finished");
        reverted
    }

    async fn apply_inverse(&self, op: &SyncOperation) -> Result<(), RemoteError> {
        match op.action {
            SyncAction::Create => self.remote.delete(&op.remote_id).await,
            SyncAction::Update | SyncAction::Delete => {
                let Some(prior) = &op.prior_remote_state else {
                    return Err(RemoteError::Rejected {
                        id: op.remote_id.clone(),
                        reason: "no prior state captured".to_string(),
                    });
                };
                match op.action {
                    SyncAction::Update => self.remote.update(&op.remote_id, prior.clone()).await,
                    _ => self.remote.create(prior.clone()).await.map(|_| ()),
                }
            }
        }
    }

    /// Replay the inverse of each operation in reverse order.
    ///
    /// Undoing a transaction that is already undone is a no-op, not an
    /// error. Individual inverse calls are idempotent, so a failed undo can
    /// simply be retried.
    pub async fn undo(&self, transaction: &SyncTransaction) -> Result<UndoResult, SyncError> {
        // Consult the persisted record so repeat undo stays a no-op even
        // across handles holding stale copies
        let current = self
            .state
            .list_transactions(&transaction.session_id)
            .await
            .map_err(|e| SyncError::Log(e.to_string()))?
            .into_iter()
            .find(|t| t.id == transaction.id)
            .unwrap_or_else(|| transaction.clone());

        if current.is_undone() {
            debug!(txn_id = %current.id, "Transaction already undone");
            return Ok(UndoResult::AlreadyUndone);
        }

        for op in current.operations.iter().rev() {
            self.apply_inverse(op).await.map_err(|source| SyncFailure {
                action: op.action.to_string(),
                block_id: op.local_block_id.clone(),
                rolled_back: 0,
                source,
            })?;
        }

        let mut undone = current.clone();
        undone.mark_undone();
        self.state
            .update_transaction(undone)
            .await
            .map_err(|e| SyncError::Log(e.to_string()))?;

        info!(txn_id = %current.id, operations = current.operations.len(), "Transaction undone");
        Ok(UndoResult::Undone {
            operations: current.operations.len(),
        })
    }
}

fn capture_prior(snapshot_by_id: &HashMap<&str, &RemoteItem>, remote_id: &str) -> Result<RemoteItem, SyncError> {
    snapshot_by_id
        .get(remote_id)
        .map(|i| (*i).clone())
        .ok_or_else(|| SyncError::RemoteInconsistency {
            remote_id: remote_id.to_string(),
            reason: "missing from remote".to_string(),
        })
}

/// Ensure every update/delete target still looks the way the baseline
/// remembers it. Anything else means another writer changed the remote
/// since the last sync, and the caller must reconcile before retrying.
fn check_consistency(ops: &[RemoteOp], snapshot: &[RemoteItem], baseline: &PlanModel) -> Result<(), SyncError> {
    let by_id: HashMap<&str, &RemoteItem> = snapshot.iter().map(|i| (i.id.as_str(), i)).collect();

    for op in ops {
        let remote_id = match op {
            RemoteOp::Update { remote_id, .. } | RemoteOp::Delete { remote_id, .. } => remote_id,
            RemoteOp::Create { .. } => continue,
        };

        let Some(observed) = by_id.get(remote_id.as_str()) else {
            return Err(SyncError::RemoteInconsistency {
                remote_id: remote_id.clone(),
                reason: "missing from remote".to_string(),
            });
        };

        if let Some(expected) = baseline.blocks.iter().find(|b| b.source_ref.as_deref() == Some(remote_id))
            && (observed.start != expected.start || observed.end != expected.end || observed.label != expected.label)
        {
            return Err(SyncError::RemoteInconsistency {
                remote_id: remote_id.clone(),
                reason: "content changed since last sync".to_string(),
            });
        }
    }

    Ok(())
}

fn item_for(block: &Block, date: NaiveDate, remote_id: Option<&str>) -> RemoteItem {
    RemoteItem {
        id: remote_id.unwrap_or("").to_string(),
        date,
        start: block.start,
        end: block.end,
        label: block.label.clone(),
        movable: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::remote::InMemoryCalendar;
    use chrono::NaiveTime;
    use tempfile::tempdir;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
    }

    fn empty_plan() -> PlanModel {
        PlanModel::new(day(), t(8, 0), t(20, 0))
    }

    async fn fixture() -> (tempfile::TempDir, StateManager, Arc<InMemoryCalendar>, SyncEngine) {
        let temp = tempdir().unwrap();
        let state = StateManager::spawn(temp.path()).unwrap();
        let calendar = Arc::new(InMemoryCalendar::new());
        let engine = SyncEngine::new(calendar.clone(), state.clone(), 4);
        (temp, state, calendar, engine)
    }

    #[tokio::test]
    async fn test_commit_empty_baseline_creates_everything() {
        let (_temp, state, calendar, engine) = fixture().await;

        let baseline = empty_plan();
        let mut plan = empty_plan();
        plan.blocks.push(Block::flexible("a", "Focus", t(9, 0), t(11, 0)));
        plan.blocks.push(Block::flexible("b", "Email", t(11, 0), t(11, 30)));

        let outcome = engine.commit("james@2026-08-06", &baseline, &plan).await.unwrap();
        let transaction = outcome.transaction.unwrap();

        assert_eq!(transaction.seq, 1);
        assert_eq!(transaction.operations.len(), 2);
        assert!(transaction.operations.iter().all(|op| op.action == SyncAction::Create));
        assert!(transaction.operations.iter().all(|op| op.is_reversible()));

        // Remote matches the plan, and the synced plan carries the refs
        assert_eq!(calendar.snapshot().len(), 2);
        assert!(outcome.plan.blocks.iter().all(|b| b.source_ref.is_some()));

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_commit_twice_without_change_is_free() {
        let (_temp, state, calendar, engine) = fixture().await;

        let baseline = empty_plan();
        let mut plan = empty_plan();
        plan.blocks.push(Block::flexible("a", "Focus", t(9, 0), t(11, 0)));

        let first = engine.commit("james@2026-08-06", &baseline, &plan).await.unwrap();
        assert!(first.transaction.is_some());

        calendar.reset_counts();

        // Second commit against the updated baseline: empty diff, no calls
        let second = engine
            .commit("james@2026-08-06", &first.plan, &first.plan)
            .await
            .unwrap();
        assert!(second.transaction.is_none());
        assert_eq!(calendar.op_counts().mutations(), 0);
        assert_eq!(calendar.op_counts().list, 0);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_update_rolls_back_prior_operations() {
        let (_temp, state, calendar, _engine) = fixture().await;

        // Five synced blocks; serialize creates so mutation order is exact
        let engine = SyncEngine::new(calendar.clone(), state.clone(), 1);
        let mut baseline = empty_plan();
        for (i, hour) in [9u32, 10, 11, 12, 13].iter().enumerate() {
            let mut block = Block::flexible(format!("b{}", i), format!("Task {}", i), t(*hour, 0), t(hour + 1, 0));
            block.source_ref = Some(format!("evt-{}", i));
            baseline.blocks.push(block);
        }
        calendar.seed(
            baseline
                .blocks
                .iter()
                .map(|b| RemoteItem {
                    id: b.source_ref.clone().unwrap(),
                    date: day(),
                    start: b.start,
                    end: b.end,
                    label: b.label.clone(),
                    movable: true,
                })
                .collect(),
        );
        let before = calendar.snapshot();

        // Shift every block by 30 minutes; the 3rd update fails
        let mut plan = baseline.clone();
        for block in &mut plan.blocks {
            block.start = block.start.overflowing_add_signed(chrono::Duration::minutes(30)).0;
            block.end = block.end.overflowing_add_signed(chrono::Duration::minutes(30)).0;
        }
        calendar.fail_at_mutation(3);

        let error = engine.commit("james@2026-08-06", &baseline, &plan).await.unwrap_err();
        match error {
            SyncError::Failure(failure) => {
                assert_eq!(failure.action, "update");
                assert_eq!(failure.rolled_back, 2);
            }
            other => panic!("expected SyncFailure, got {:?}", other),
        }

        // The first two updates were reverted via their captured prior state
        assert_eq!(calendar.snapshot(), before);
        // Nothing was logged for the failed call
        assert!(state.list_transactions("james@2026-08-06").await.unwrap().is_empty());

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_undo_restores_baseline_state() {
        let (_temp, state, calendar, engine) = fixture().await;

        // Baseline: one synced block; remote matches
        let mut baseline = empty_plan();
        let mut existing = Block::flexible("a", "Focus", t(9, 0), t(10, 0));
        existing.source_ref = Some("evt-a".to_string());
        baseline.blocks.push(existing);
        calendar.seed(vec![RemoteItem {
            id: "evt-a".to_string(),
            date: day(),
            start: t(9, 0),
            end: t(10, 0),
            label: "Focus".to_string(),
            movable: true,
        }]);
        let before = calendar.snapshot();

        // Move the existing block, add one, so undo exercises update+delete
        let mut plan = baseline.clone();
        plan.blocks[0].start = t(14, 0);
        plan.blocks[0].end = t(15, 0);
        plan.blocks.push(Block::flexible("b", "Email", t(10, 0), t(10, 30)));

        let outcome = engine.commit("james@2026-08-06", &baseline, &plan).await.unwrap();
        let transaction = outcome.transaction.unwrap();
        assert_ne!(calendar.snapshot(), before);

        let result = engine.undo(&transaction).await.unwrap();
        assert_eq!(result, UndoResult::Undone { operations: 2 });
        assert_eq!(calendar.snapshot(), before);

        // Undo of an already-undone transaction is a no-op
        calendar.reset_counts();
        let again = engine.undo(&transaction).await.unwrap();
        assert_eq!(again, UndoResult::AlreadyUndone);
        assert_eq!(calendar.op_counts().mutations(), 0);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_remote_drift_is_detected_not_overwritten() {
        let (_temp, state, calendar, engine) = fixture().await;

        let mut baseline = empty_plan();
        let mut existing = Block::flexible("a", "Focus", t(9, 0), t(10, 0));
        existing.source_ref = Some("evt-a".to_string());
        baseline.blocks.push(existing);
        // Remote was moved by another writer after the last sync
        calendar.seed(vec![RemoteItem {
            id: "evt-a".to_string(),
            date: day(),
            start: t(16, 0),
            end: t(17, 0),
            label: "Focus".to_string(),
            movable: true,
        }]);

        let mut plan = baseline.clone();
        plan.blocks[0].start = t(11, 0);
        plan.blocks[0].end = t(12, 0);

        let error = engine.commit("james@2026-08-06", &baseline, &plan).await.unwrap_err();
        assert!(matches!(error, SyncError::RemoteInconsistency { .. }));
        // The drifted item was not overwritten
        assert_eq!(calendar.snapshot()[0].start, t(16, 0));

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_deleted_remote_target_is_inconsistency() {
        let (_temp, state, _calendar, engine) = fixture().await;

        let mut baseline = empty_plan();
        let mut existing = Block::flexible("a", "Focus", t(9, 0), t(10, 0));
        existing.source_ref = Some("evt-a".to_string());
        baseline.blocks.push(existing);
        // Remote item is gone entirely

        let plan = empty_plan();
        let error = engine.commit("james@2026-08-06", &baseline, &plan).await.unwrap_err();
        assert!(matches!(error, SyncError::RemoteInconsistency { .. }));

        state.shutdown().await;
    }
}
