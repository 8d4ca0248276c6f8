//! Plan model: a day's schedule as an ordered set of blocks
//!
//! Immovable blocks come from the remote calendar and act as anchors; the
//! planner only ever places flexible blocks around them. All invariant
//! checking for plans lives here.

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::Violation;

/// Whether the planner may move a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Anchor consumed from the remote calendar; never created or altered
    Immovable,
    /// Planner-owned; created, moved, and removed freely
    Flexible,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immovable => write!(f, "immovable"),
            Self::Flexible => write!(f, "flexible"),
        }
    }
}

/// A single scheduled block within one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Unique identifier within the plan
    pub id: String,

    pub kind: BlockKind,

    /// Start time within the target date
    pub start: NaiveTime,

    /// End time within the target date (exclusive)
    pub end: NaiveTime,

    /// Human-readable label
    pub label: String,

    /// Remote calendar item id, set once the block exists remotely
    pub source_ref: Option<String>,
}

impl Block {
    /// Create a planner-owned flexible block
    pub fn flexible(id: impl Into<String>, label: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            id: id.into(),
            kind: BlockKind::Flexible,
            start,
            end,
            label: label.into(),
            source_ref: None,
        }
    }

    /// Create an immovable anchor tied to a remote item
    pub fn immovable(
        id: impl Into<String>,
        label: impl Into<String>,
        start: NaiveTime,
        end: NaiveTime,
        source_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: BlockKind::Immovable,
            start,
            end,
            label: label.into(),
            source_ref: Some(source_ref.into()),
        }
    }

    /// Block length in minutes
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Whether two blocks occupy overlapping time
    pub fn overlaps(&self, other: &Block) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether the schedulable fields match (identity and kind ignored)
    pub fn content_eq(&self, other: &Block) -> bool {
        self.start == other.start && self.end == other.end && self.label == other.label
    }
}

/// A day's schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanModel {
    /// The day this plan covers
    pub date: NaiveDate,

    /// Start of the schedulable window
    pub day_start: NaiveTime,

    /// End of the schedulable window
    pub day_end: NaiveTime,

    /// Blocks in no particular order; use [`PlanModel::sorted`] for display
    pub blocks: Vec<Block>,
}

impl PlanModel {
    /// Create an empty plan for a day window
    pub fn new(date: NaiveDate, day_start: NaiveTime, day_end: NaiveTime) -> Self {
        Self {
            date,
            day_start,
            day_end,
            blocks: Vec::new(),
        }
    }

    /// Look up a block by id
    pub fn get(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Find a block by label: exact match first, then case-insensitive
    /// substring. Ambiguity resolves to the earliest-starting match.
    pub fn find_by_label(&self, needle: &str) -> Option<&Block> {
        if let Some(block) = self.sorted().into_iter().find(|b| b.label == needle) {
            return Some(block);
        }
        let lowered = needle.to_lowercase();
        self.sorted()
            .into_iter()
            .find(|b| b.label.to_lowercase().contains(&lowered))
    }

    /// Blocks ordered by start time, then id
    pub fn sorted(&self) -> Vec<&Block> {
        let mut blocks: Vec<&Block> = self.blocks.iter().collect();
        blocks.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        blocks
    }

    /// Iterator over immovable anchors
    pub fn immovables(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.kind == BlockKind::Immovable)
    }

    /// Iterator over planner-owned blocks
    pub fn flexibles(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.kind == BlockKind::Flexible)
    }

    /// Check all plan invariants: unique ids, non-empty ranges, blocks inside
    /// the day window, no overlaps.
    pub fn validate(&self) -> Result<(), Violation> {
        let mut seen = std::collections::HashSet::new();
        for block in &self.blocks {
            if !seen.insert(block.id.as_str()) {
                return Err(Violation::DuplicateBlock { id: block.id.clone() });
            }
            if block.end <= block.start {
                return Err(Violation::EmptyRange { id: block.id.clone() });
            }
            if block.start < self.day_start || block.end > self.day_end {
                return Err(Violation::OutsideHorizon { id: block.id.clone() });
            }
        }

        let sorted = self.sorted();
        for pair in sorted.windows(2) {
            if pair[0].overlaps(pair[1]) {
                return Err(Violation::Overlap {
                    first: pair[0].id.clone(),
                    second: pair[1].id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Unoccupied intervals within the day window, in time order
    pub fn free_gaps(&self) -> Vec<(NaiveTime, NaiveTime)> {
        let mut gaps = Vec::new();
        let mut cursor = self.day_start;

        for block in self.sorted() {
            if block.start > cursor {
                gaps.push((cursor, block.start));
            }
            cursor = cursor.max(block.end);
        }
        if cursor < self.day_end {
            gaps.push((cursor, self.day_end));
        }

        gaps
    }

    /// Earliest start that fits `duration_minutes` of free time, optionally
    /// no earlier than a given time.
    pub fn find_gap(&self, duration_minutes: i64, not_before: Option<NaiveTime>) -> Option<NaiveTime> {
        let duration = Duration::minutes(duration_minutes);
        for (gap_start, gap_end) in self.free_gaps() {
            let candidate = match not_before {
                Some(limit) => gap_start.max(limit),
                None => gap_start,
            };
            // overflowing_add_signed so a candidate near midnight cannot wrap
            // into a spuriously small end time
            let (candidate_end, wrapped_days) = candidate.overflowing_add_signed(duration);
            if wrapped_days == 0 && candidate < gap_end && candidate_end <= gap_end {
                return Some(candidate);
            }
        }
        None
    }
}

/// Verify the immovable anchor set is byte-for-byte unchanged between two
/// plan versions. Any added, removed, or altered anchor is a violation.
pub fn immovables_preserved(before: &PlanModel, after: &PlanModel) -> Result<(), Violation> {
    use std::collections::BTreeMap;

    let snapshot = |plan: &PlanModel| -> BTreeMap<String, (NaiveTime, NaiveTime, String)> {
        plan.immovables()
            .map(|b| (b.id.clone(), (b.start, b.end, b.label.clone())))
            .collect()
    };

    let old = snapshot(before);
    let new = snapshot(after);

    for (id, fields) in &old {
        match new.get(id) {
            Some(other) if other == fields => {}
            _ => return Err(Violation::ImmovableTouched { id: id.clone() }),
        }
    }
    for id in new.keys() {
        if !old.contains_key(id) {
            return Err(Violation::ImmovableTouched { id: id.clone() });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
    }

    fn plan_with(blocks: Vec<Block>) -> PlanModel {
        PlanModel {
            date: day(),
            day_start: t(9, 0),
            day_end: t(17, 0),
            blocks,
        }
    }

    #[test]
    fn test_validate_ok() {
        let plan = plan_with(vec![
            Block::flexible("a", "Deep Work", t(9, 0), t(11, 0)),
            Block::flexible("b", "Email", t(11, 0), t(11, 30)),
        ]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validate_overlap() {
        let plan = plan_with(vec![
            Block::flexible("a", "Deep Work", t(9, 0), t(11, 0)),
            Block::flexible("b", "Email", t(10, 30), t(11, 30)),
        ]);
        assert_eq!(
            plan.validate(),
            Err(Violation::Overlap {
                first: "a".to_string(),
                second: "b".to_string()
            })
        );
    }

    #[test]
    fn test_validate_outside_horizon() {
        let plan = plan_with(vec![Block::flexible("a", "Early", t(8, 0), t(9, 30))]);
        assert_eq!(plan.validate(), Err(Violation::OutsideHorizon { id: "a".to_string() }));
    }

    #[test]
    fn test_validate_empty_range() {
        let plan = plan_with(vec![Block::flexible("a", "Zero", t(10, 0), t(10, 0))]);
        assert_eq!(plan.validate(), Err(Violation::EmptyRange { id: "a".to_string() }));
    }

    #[test]
    fn test_validate_duplicate_id() {
        let plan = plan_with(vec![
            Block::flexible("a", "One", t(9, 0), t(10, 0)),
            Block::flexible("a", "Two", t(10, 0), t(11, 0)),
        ]);
        assert_eq!(plan.validate(), Err(Violation::DuplicateBlock { id: "a".to_string() }));
    }

    #[test]
    fn test_free_gaps() {
        let plan = plan_with(vec![
            Block::flexible("a", "One", t(10, 0), t(11, 0)),
            Block::flexible("b", "Two", t(12, 0), t(14, 0)),
        ]);
        assert_eq!(
            plan.free_gaps(),
            vec![(t(9, 0), t(10, 0)), (t(11, 0), t(12, 0)), (t(14, 0), t(17, 0))]
        );
    }

    #[test]
    fn test_find_gap() {
        let plan = plan_with(vec![
            Block::flexible("a", "One", t(10, 0), t(11, 0)),
            Block::flexible("b", "Two", t(12, 0), t(14, 0)),
        ]);

        // One hour fits right at day start
        assert_eq!(plan.find_gap(60, None), Some(t(9, 0)));
        // Ninety minutes only fits after the last block
        assert_eq!(plan.find_gap(90, None), Some(t(14, 0)));
        // Respects the lower bound
        assert_eq!(plan.find_gap(60, Some(t(10, 30))), Some(t(11, 0)));
        // Too large to fit anywhere
        assert_eq!(plan.find_gap(600, None), None);
    }

    #[test]
    fn test_find_by_label() {
        let plan = plan_with(vec![
            Block::flexible("a", "Deep Work", t(9, 0), t(10, 0)),
            Block::flexible("b", "deep work review", t(10, 0), t(11, 0)),
        ]);
        // Exact match wins over substring match
        assert_eq!(plan.find_by_label("Deep Work").unwrap().id, "a");
        // Case-insensitive substring fallback
        assert_eq!(plan.find_by_label("review").unwrap().id, "b");
        assert!(plan.find_by_label("lunch").is_none());
    }

    #[test]
    fn test_immovables_preserved() {
        let before = plan_with(vec![
            Block::immovable("m", "Standup", t(9, 0), t(9, 30), "evt-1"),
            Block::flexible("a", "Work", t(10, 0), t(11, 0)),
        ]);

        let mut ok = before.clone();
        ok.blocks[1].start = t(11, 0);
        ok.blocks[1].end = t(12, 0);
        assert!(immovables_preserved(&before, &ok).is_ok());

        let mut moved = before.clone();
        moved.blocks[0].start = t(9, 15);
        assert_eq!(
            immovables_preserved(&before, &moved),
            Err(Violation::ImmovableTouched { id: "m".to_string() })
        );

        let mut removed = before.clone();
        removed.blocks.remove(0);
        assert_eq!(
            immovables_preserved(&before, &removed),
            Err(Violation::ImmovableTouched { id: "m".to_string() })
        );
    }
}
