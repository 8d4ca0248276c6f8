//! Planning session and stage machine
//!
//! One session per (owner, date). The stage field is the single source of
//! truth for dispatch; transitions only move forward, except the one
//! permitted regression from Review back to Refine.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use planstore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};

use super::block::PlanModel;
use super::constraint::ConstraintDraft;

/// Planning stages, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Gather frame facts: the day window and standing preferences
    Collect,
    /// Gather input facts: the tasks to schedule
    Capture,
    /// Build the first draft plan around remote anchors
    Skeleton,
    /// Iterate on the plan from user feedback
    Refine,
    /// Final look and commit to the remote calendar
    Review,
}

impl Stage {
    /// The canonical next stage, if any
    pub fn next(self) -> Option<Stage> {
        match self {
            Self::Collect => Some(Self::Capture),
            Self::Capture => Some(Self::Skeleton),
            Self::Skeleton => Some(Self::Refine),
            Self::Refine => Some(Self::Review),
            Self::Review => None,
        }
    }

    /// Whether a transition to `target` is legal from this stage.
    ///
    /// Only the canonical next stage is permitted, plus the single backward
    /// edge Review -> Refine. Everything else is an invariant violation the
    /// orchestrator must reject loudly.
    pub fn permits(self, target: Stage) -> bool {
        self.next() == Some(target) || (self == Self::Review && target == Self::Refine)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collect => write!(f, "collect"),
            Self::Capture => write!(f, "capture"),
            Self::Skeleton => write!(f, "skeleton"),
            Self::Refine => write!(f, "refine"),
            Self::Review => write!(f, "review"),
        }
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    /// Review completed with a successful sync; kept for the audit trail
    Completed,
    /// Explicitly abandoned by the user
    Abandoned,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Facts that frame the day, gathered during Collect.
///
/// Immutable once Capture begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameFacts {
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    /// Minutes of breathing room to leave after each placed block
    pub buffer_minutes: u32,
}

/// One task the user wants scheduled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub label: String,
    pub duration_minutes: i64,
    /// Earliest acceptable start, if the user named one
    pub earliest: Option<NaiveTime>,
}

/// The tasks to schedule, gathered during Capture.
///
/// Immutable once Skeleton begins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFacts {
    pub tasks: Vec<TaskItem>,
}

/// A planning session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Derived from the (owner, date) key; one active session per key
    pub id: String,

    pub owner_id: String,
    pub target_date: NaiveDate,
    pub stage: Stage,
    pub status: SessionStatus,

    pub frame_facts: Option<FrameFacts>,
    pub input_facts: Option<InputFacts>,

    /// Current working plan (None until Skeleton completes)
    pub plan: Option<PlanModel>,

    /// Last-synchronized snapshot; the diff reference for commits
    pub baseline: Option<PlanModel>,

    /// Constraint candidates discovered this turn, drained to the
    /// background queue when the turn commits
    pub pending_constraints: Vec<ConstraintDraft>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Session {
    /// Deterministic record id for an (owner, date) pair
    pub fn key(owner_id: &str, target_date: NaiveDate) -> String {
        format!("{}@{}", owner_id, target_date)
    }

    /// Create a fresh session at the Collect stage
    pub fn new(owner_id: impl Into<String>, target_date: NaiveDate) -> Self {
        let owner_id = owner_id.into();
        let now = now_ms();
        Self {
            id: Self::key(&owner_id, target_date),
            owner_id,
            target_date,
            stage: Stage::Collect,
            status: SessionStatus::Active,
            frame_facts: None,
            input_facts: None,
            plan: None,
            baseline: None,
            pending_constraints: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.updated_at = now_ms();
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

impl Record for Session {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "sessions"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("owner".to_string(), IndexValue::String(self.owner_id.clone()));
        fields.insert("date".to_string(), IndexValue::String(self.target_date.to_string()));
        fields.insert("stage".to_string(), IndexValue::String(self.stage.to_string()));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::Collect.next(), Some(Stage::Capture));
        assert_eq!(Stage::Capture.next(), Some(Stage::Skeleton));
        assert_eq!(Stage::Skeleton.next(), Some(Stage::Refine));
        assert_eq!(Stage::Refine.next(), Some(Stage::Review));
        assert_eq!(Stage::Review.next(), None);
    }

    #[test]
    fn test_stage_permits_forward_only() {
        assert!(Stage::Collect.permits(Stage::Capture));
        assert!(!Stage::Collect.permits(Stage::Skeleton));
        assert!(!Stage::Collect.permits(Stage::Collect));
        assert!(!Stage::Refine.permits(Stage::Capture));
    }

    #[test]
    fn test_stage_permits_review_regression() {
        assert!(Stage::Review.permits(Stage::Refine));
        assert!(!Stage::Review.permits(Stage::Collect));
        assert!(!Stage::Refine.permits(Stage::Skeleton));
    }

    #[test]
    fn test_session_key() {
        assert_eq!(Session::key("james", day()), "james@2026-08-06");
    }

    #[test]
    fn test_session_new() {
        let session = Session::new("james", day());
        assert_eq!(session.id, "james@2026-08-06");
        assert_eq!(session.stage, Stage::Collect);
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.plan.is_none());
        assert!(session.baseline.is_none());
        assert!(session.pending_constraints.is_empty());
    }

    #[test]
    fn test_session_indexed_fields() {
        let session = Session::new("james", day());
        let fields = session.indexed_fields();
        assert_eq!(fields.get("owner"), Some(&IndexValue::String("james".to_string())));
        assert_eq!(fields.get("stage"), Some(&IndexValue::String("collect".to_string())));
        assert_eq!(fields.get("status"), Some(&IndexValue::String("active".to_string())));
    }
}
