//! Set-based plan diffing
//!
//! Compares two plans by block identity and emits the minimal remote
//! operations that turn the baseline's block set into the plan's. The diff
//! is a pure function of the two sets (arrival order is irrelevant) and
//! never emits an operation touching an immovable block.

use std::collections::BTreeMap;

use crate::domain::{Block, PlanModel, SyncAction};

/// One remote operation the sync engine should perform
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOp {
    /// Block exists locally but not remotely
    Create { block: Block },
    /// Block exists on both sides with changed fields
    Update { remote_id: String, block: Block },
    /// Block was removed locally
    Delete { remote_id: String, block_id: String },
}

impl RemoteOp {
    pub fn action(&self) -> SyncAction {
        match self {
            Self::Create { .. } => SyncAction::Create,
            Self::Update { .. } => SyncAction::Update,
            Self::Delete { .. } => SyncAction::Delete,
        }
    }

    /// The local block this operation is about
    pub fn block_id(&self) -> &str {
        match self {
            Self::Create { block } => &block.id,
            Self::Update { block, .. } => &block.id,
            Self::Delete { block_id, .. } => block_id,
        }
    }
}

/// Compute the operations that make the remote match `plan`, given that it
/// currently matches `baseline`.
///
/// Output order is deterministic: creates, then updates, then deletes, each
/// sorted by block id. A baseline block that was never synced (no remote
/// ref) re-emits as a create rather than an update, and produces no delete.
pub fn diff(baseline: &PlanModel, plan: &PlanModel) -> Vec<RemoteOp> {
    let base: BTreeMap<&str, &Block> = baseline.flexibles().map(|b| (b.id.as_str(), b)).collect();
    let next: BTreeMap<&str, &Block> = plan.flexibles().map(|b| (b.id.as_str(), b)).collect();

    let mut creates = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();

    for (id, block) in &next {
        match base.get(id) {
            None => creates.push(RemoteOp::Create { block: (*block).clone() }),
            Some(prior) => {
                if block.content_eq(prior) {
                    continue;
                }
                match prior.source_ref.as_deref() {
                    Some(remote_id) => updates.push(RemoteOp::Update {
                        remote_id: remote_id.to_string(),
                        block: (*block).clone(),
                    }),
                    // Baseline entry never made it remote; treat as new
                    None => creates.push(RemoteOp::Create { block: (*block).clone() }),
                }
            }
        }
    }

    for (id, block) in &base {
        if !next.contains_key(id)
            && let Some(remote_id) = block.source_ref.as_deref()
        {
            deletes.push(RemoteOp::Delete {
                remote_id: remote_id.to_string(),
                block_id: (*id).to_string(),
            });
        }
    }

    let mut ops = creates;
    ops.append(&mut updates);
    ops.append(&mut deletes);
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BlockKind;
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn empty_plan() -> PlanModel {
        PlanModel::new(NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(), t(8, 0), t(20, 0))
    }

    fn synced(id: &str, label: &str, hour: u32) -> Block {
        let mut block = Block::flexible(id, label, t(hour, 0), t(hour + 1, 0));
        block.source_ref = Some(format!("evt-{}", id));
        block
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let mut plan = empty_plan();
        plan.blocks.push(synced("a", "Focus", 9));
        plan.blocks.push(Block::immovable("m", "Standup", t(8, 0), t(8, 30), "evt-m"));

        assert!(diff(&plan, &plan).is_empty());
    }

    #[test]
    fn test_diff_empty_baseline_is_all_creates() {
        let baseline = empty_plan();
        let mut plan = empty_plan();
        plan.blocks.push(Block::flexible("a", "Focus", t(9, 0), t(10, 0)));
        plan.blocks.push(Block::flexible("b", "Email", t(10, 0), t(10, 30)));

        let ops = diff(&baseline, &plan);
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.action() == SyncAction::Create));
    }

    #[test]
    fn test_diff_update_and_delete() {
        let mut baseline = empty_plan();
        baseline.blocks.push(synced("a", "Focus", 9));
        baseline.blocks.push(synced("b", "Email", 11));

        let mut plan = empty_plan();
        let mut moved = synced("a", "Focus", 9);
        moved.start = t(13, 0);
        moved.end = t(14, 0);
        plan.blocks.push(moved);

        let ops = diff(&baseline, &plan);
        assert_eq!(ops.len(), 2);
        assert_eq!(
            ops[0],
            RemoteOp::Update {
                remote_id: "evt-a".to_string(),
                block: plan.blocks[0].clone()
            }
        );
        assert_eq!(
            ops[1],
            RemoteOp::Delete {
                remote_id: "evt-b".to_string(),
                block_id: "b".to_string()
            }
        );
    }

    #[test]
    fn test_diff_never_touches_immovables() {
        let mut baseline = empty_plan();
        baseline
            .blocks
            .push(Block::immovable("m", "Standup", t(8, 0), t(8, 30), "evt-m"));

        let mut plan = empty_plan();
        // Immovable gone locally, another appears: the diff must ignore both
        plan.blocks
            .push(Block::immovable("m2", "All Hands", t(15, 0), t(16, 0), "evt-m2"));

        assert!(diff(&baseline, &plan).is_empty());
    }

    #[test]
    fn test_diff_is_order_independent() {
        let mut baseline = empty_plan();
        baseline.blocks.push(synced("a", "Focus", 9));
        baseline.blocks.push(synced("b", "Email", 11));

        let mut reversed = baseline.clone();
        reversed.blocks.reverse();

        let mut plan = empty_plan();
        plan.blocks.push(synced("b", "Email", 11));

        assert_eq!(diff(&baseline, &plan), diff(&reversed, &plan));
    }

    /// Replay diff output against the baseline's flexible set
    fn replay(baseline: &PlanModel, ops: &[RemoteOp]) -> BTreeMap<String, (NaiveTime, NaiveTime, String)> {
        let mut set: BTreeMap<String, (NaiveTime, NaiveTime, String)> = baseline
            .flexibles()
            .map(|b| (b.id.clone(), (b.start, b.end, b.label.clone())))
            .collect();
        for op in ops {
            match op {
                RemoteOp::Create { block } | RemoteOp::Update { block, .. } => {
                    set.insert(block.id.clone(), (block.start, block.end, block.label.clone()));
                }
                RemoteOp::Delete { block_id, .. } => {
                    set.remove(block_id);
                }
            }
        }
        set
    }

    /// Build a plan from a bitmask over a fixed pool of hourly slots
    fn plan_from_mask(mask: u8, shift_mask: u8, as_baseline: bool) -> PlanModel {
        let mut plan = empty_plan();
        for slot in 0..6u8 {
            if mask & (1 << slot) == 0 {
                continue;
            }
            let hour = 9 + slot as u32;
            let shifted = !as_baseline && shift_mask & (1 << slot) != 0;
            let start = if shifted { t(hour, 30) } else { t(hour, 0) };
            let end = if shifted { t(hour + 1, 30) } else { t(hour + 1, 0) };
            let mut block = Block::flexible(format!("blk-{}", slot), format!("Task {}", slot), start, end);
            if as_baseline {
                block.source_ref = Some(format!("evt-{}", slot));
            }
            plan.blocks.push(block);
        }
        plan
    }

    proptest! {
        #[test]
        fn prop_diff_self_is_empty(mask in 0u8..64) {
            let plan = plan_from_mask(mask, 0, true);
            prop_assert!(diff(&plan, &plan).is_empty());
        }

        #[test]
        fn prop_replaying_diff_yields_plan(base_mask in 0u8..64, plan_mask in 0u8..64, shift_mask in 0u8..64) {
            let baseline = plan_from_mask(base_mask, 0, true);
            let plan = plan_from_mask(plan_mask, shift_mask, false);

            let ops = diff(&baseline, &plan);
            let replayed = replay(&baseline, &ops);
            let expected: BTreeMap<String, (NaiveTime, NaiveTime, String)> = plan
                .flexibles()
                .map(|b| (b.id.clone(), (b.start, b.end, b.label.clone())))
                .collect();
            prop_assert_eq!(replayed, expected);

            // No operation may ever name an immovable block
            let no_immovable_ops = ops.iter().all(|op| {
                baseline.get(op.block_id()).map(|b| b.kind != BlockKind::Immovable).unwrap_or(true)
            });
            prop_assert!(no_immovable_ops);
        }
    }
}
