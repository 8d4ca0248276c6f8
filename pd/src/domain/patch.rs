//! Patch operations against a plan
//!
//! A patch is an ordered list of operations applied all-or-nothing: the
//! operations mutate a copy of the plan, the copy is re-validated, and only
//! then does the caller see it. A failed patch leaves the original untouched.

use serde::{Deserialize, Serialize};

use crate::error::Violation;

use super::block::{Block, BlockKind, PlanModel, immovables_preserved};

/// A single operation within a patch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum PatchOp {
    /// Insert a new flexible block
    Add { block: Block },
    /// Replace the schedulable fields of an existing block
    Update { block_id: String, block: Block },
    /// Remove an existing block
    Delete { block_id: String },
}

impl PatchOp {
    /// The id of the block this operation targets
    pub fn block_id(&self) -> &str {
        match self {
            Self::Add { block } => &block.id,
            Self::Update { block_id, .. } => block_id,
            Self::Delete { block_id } => block_id,
        }
    }
}

/// An ordered, atomically-applied list of operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new(ops: Vec<PatchOp>) -> Self {
        Self { ops }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every operation to a copy of `plan` and validate the result.
    ///
    /// Returns the new plan on success. On any violation the copy is
    /// discarded and `plan` is untouched, so a failed attempt has no side
    /// effects. Immovable blocks may not be added, altered, or removed.
    pub fn apply_to(&self, plan: &PlanModel) -> Result<PlanModel, Violation> {
        let mut next = plan.clone();

        for op in &self.ops {
            match op {
                PatchOp::Add { block } => {
                    if block.kind == BlockKind::Immovable {
                        return Err(Violation::ImmovableTouched { id: block.id.clone() });
                    }
                    if next.get(&block.id).is_some() {
                        return Err(Violation::DuplicateBlock { id: block.id.clone() });
                    }
                    next.blocks.push(block.clone());
                }
                PatchOp::Update { block_id, block } => {
                    let Some(index) = next.blocks.iter().position(|b| b.id == *block_id) else {
                        return Err(Violation::UnknownBlock { id: block_id.clone() });
                    };
                    if next.blocks[index].kind == BlockKind::Immovable || block.kind == BlockKind::Immovable {
                        return Err(Violation::ImmovableTouched { id: block_id.clone() });
                    }
                    let mut replacement = block.clone();
                    // Identity and remote linkage survive an update
                    replacement.id = block_id.clone();
                    if replacement.source_ref.is_none() {
                        replacement.source_ref = next.blocks[index].source_ref.clone();
                    }
                    next.blocks[index] = replacement;
                }
                PatchOp::Delete { block_id } => {
                    let Some(index) = next.blocks.iter().position(|b| b.id == *block_id) else {
                        return Err(Violation::UnknownBlock { id: block_id.clone() });
                    };
                    if next.blocks[index].kind == BlockKind::Immovable {
                        return Err(Violation::ImmovableTouched { id: block_id.clone() });
                    }
                    next.blocks.remove(index);
                }
            }
        }

        next.validate()?;
        immovables_preserved(plan, &next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn base_plan() -> PlanModel {
        PlanModel {
            date: NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
            day_start: t(9, 0),
            day_end: t(17, 0),
            blocks: vec![
                Block::immovable("m", "Standup", t(9, 0), t(9, 30), "evt-1"),
                Block::flexible("a", "Deep Work", t(10, 0), t(12, 0)),
            ],
        }
    }

    #[test]
    fn test_apply_add() {
        let plan = base_plan();
        let patch = Patch::new(vec![PatchOp::Add {
            block: Block::flexible("b", "Email", t(13, 0), t(13, 30)),
        }]);

        let next = patch.apply_to(&plan).unwrap();
        assert_eq!(next.blocks.len(), 3);
        // Original untouched
        assert_eq!(plan.blocks.len(), 2);
    }

    #[test]
    fn test_apply_update_preserves_identity() {
        let plan = base_plan();
        let patch = Patch::new(vec![PatchOp::Update {
            block_id: "a".to_string(),
            block: Block::flexible("ignored", "Deep Work", t(14, 0), t(16, 0)),
        }]);

        let next = patch.apply_to(&plan).unwrap();
        let moved = next.get("a").unwrap();
        assert_eq!(moved.start, t(14, 0));
        assert_eq!(moved.end, t(16, 0));
    }

    #[test]
    fn test_apply_delete() {
        let plan = base_plan();
        let patch = Patch::new(vec![PatchOp::Delete {
            block_id: "a".to_string(),
        }]);

        let next = patch.apply_to(&plan).unwrap();
        assert!(next.get("a").is_none());
        assert!(next.get("m").is_some());
    }

    #[test]
    fn test_apply_rejects_overlap() {
        let plan = base_plan();
        let patch = Patch::new(vec![PatchOp::Add {
            block: Block::flexible("b", "Clash", t(11, 0), t(13, 0)),
        }]);

        assert!(matches!(patch.apply_to(&plan), Err(Violation::Overlap { .. })));
        assert_eq!(plan.blocks.len(), 2);
    }

    #[test]
    fn test_apply_rejects_immovable_update() {
        let plan = base_plan();
        let patch = Patch::new(vec![PatchOp::Update {
            block_id: "m".to_string(),
            block: Block::flexible("m", "Standup", t(10, 0), t(10, 30)),
        }]);

        assert_eq!(
            patch.apply_to(&plan),
            Err(Violation::ImmovableTouched { id: "m".to_string() })
        );
    }

    #[test]
    fn test_apply_rejects_immovable_delete_and_add() {
        let plan = base_plan();

        let delete = Patch::new(vec![PatchOp::Delete {
            block_id: "m".to_string(),
        }]);
        assert_eq!(
            delete.apply_to(&plan),
            Err(Violation::ImmovableTouched { id: "m".to_string() })
        );

        let add = Patch::new(vec![PatchOp::Add {
            block: Block::immovable("m2", "Fake Anchor", t(15, 0), t(15, 30), "evt-9"),
        }]);
        assert_eq!(
            add.apply_to(&plan),
            Err(Violation::ImmovableTouched { id: "m2".to_string() })
        );
    }

    #[test]
    fn test_apply_unknown_block() {
        let plan = base_plan();
        let patch = Patch::new(vec![PatchOp::Delete {
            block_id: "zzz".to_string(),
        }]);
        assert_eq!(
            patch.apply_to(&plan),
            Err(Violation::UnknownBlock { id: "zzz".to_string() })
        );
    }

    #[test]
    fn test_apply_is_atomic() {
        let plan = base_plan();
        // First op is fine, second violates; nothing from the patch lands
        let patch = Patch::new(vec![
            PatchOp::Add {
                block: Block::flexible("b", "Email", t(13, 0), t(13, 30)),
            },
            PatchOp::Update {
                block_id: "m".to_string(),
                block: Block::flexible("m", "Standup", t(16, 0), t(16, 30)),
            },
        ]);

        assert!(patch.apply_to(&plan).is_err());
        assert_eq!(plan.blocks.len(), 2);
        assert!(plan.get("b").is_none());
    }
}
