//! Durable planning constraints
//!
//! A constraint is a fact that biases placement ("no meetings before 10",
//! "leave 15 minutes after each block"). Records are never edited in place:
//! a newer record supersedes the older one by UID chain, and retrieval
//! deduplicates by logical identity keeping the most recent survivor.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveTime};
use planstore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};

use super::id::{generate_id, identity_digest};

/// How widely a constraint applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintScope {
    /// Only the session that proposed it
    Session,
    /// The owner's standing preference
    Profile,
    /// A bounded range of dates
    Datespan,
}

impl std::fmt::Display for ConstraintScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Profile => write!(f, "profile"),
            Self::Datespan => write!(f, "datespan"),
        }
    }
}

/// Lifecycle status of a constraint record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintStatus {
    /// Discovered but not yet confirmed by the user
    Proposed,
    /// Confirmed; actively biases planning
    Locked,
    /// Retired by the user
    Archived,
    /// Replaced by a newer record in the UID chain
    Superseded,
}

impl std::fmt::Display for ConstraintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposed => write!(f, "proposed"),
            Self::Locked => write!(f, "locked"),
            Self::Archived => write!(f, "archived"),
            Self::Superseded => write!(f, "superseded"),
        }
    }
}

/// When and to what a constraint applies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applicability {
    /// Inclusive date range; `None` means any date
    pub date_range: Option<(NaiveDate, NaiveDate)>,

    /// ISO weekday numbers (1 = Monday); empty means every day
    pub days_of_week: Vec<u8>,

    /// Event-type tags this applies to; empty means all
    pub event_types: Vec<String>,
}

impl Applicability {
    /// Applies everywhere, always
    pub fn any() -> Self {
        Self::default()
    }

    /// Whether this applicability covers the given date
    pub fn covers(&self, date: NaiveDate) -> bool {
        if let Some((from, to)) = self.date_range
            && (date < from || date > to)
        {
            return false;
        }
        if !self.days_of_week.is_empty() {
            let weekday = date.weekday().number_from_monday() as u8;
            if !self.days_of_week.contains(&weekday) {
                return false;
            }
        }
        true
    }

    /// Whether this applicability is relevant to a set of requested event
    /// types. Either side being unrestricted matches everything.
    pub fn matches_event_types(&self, requested: &[String]) -> bool {
        if self.event_types.is_empty() || requested.is_empty() {
            return true;
        }
        self.event_types.iter().any(|t| requested.contains(t))
    }

    /// Canonical string form for identity hashing
    fn identity_component(&self) -> String {
        let range = match self.date_range {
            Some((from, to)) => format!("{}..{}", from, to),
            None => "*".to_string(),
        };
        let mut days = self.days_of_week.clone();
        days.sort_unstable();
        let mut types = self.event_types.clone();
        types.sort();
        format!("{}|{:?}|{:?}", range, days, types)
    }
}

/// Categories of planning rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Flexible blocks start no earlier than `time`
    NoEarlierThan,
    /// Flexible blocks end no later than `time`
    NoLaterThan,
    /// Leave `minutes` free after each placed block
    BufferAfter,
    /// Prefer placing inside the `start`..`end` window
    PreferWindow,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoEarlierThan => write!(f, "no_earlier_than"),
            Self::NoLaterThan => write!(f, "no_later_than"),
            Self::BufferAfter => write!(f, "buffer_after"),
            Self::PreferWindow => write!(f, "prefer_window"),
        }
    }
}

/// A rule with kind-specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub kind: RuleKind,
    pub params: serde_json::Value,
}

impl Rule {
    pub fn no_earlier_than(time: NaiveTime) -> Self {
        Self {
            kind: RuleKind::NoEarlierThan,
            params: serde_json::json!({ "time": time.format("%H:%M").to_string() }),
        }
    }

    pub fn no_later_than(time: NaiveTime) -> Self {
        Self {
            kind: RuleKind::NoLaterThan,
            params: serde_json::json!({ "time": time.format("%H:%M").to_string() }),
        }
    }

    pub fn buffer_after(minutes: u32) -> Self {
        Self {
            kind: RuleKind::BufferAfter,
            params: serde_json::json!({ "minutes": minutes }),
        }
    }

    pub fn prefer_window(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            kind: RuleKind::PreferWindow,
            params: serde_json::json!({
                "start": start.format("%H:%M").to_string(),
                "end": end.format("%H:%M").to_string(),
            }),
        }
    }

    /// The `time` parameter, for kinds that carry one
    pub fn time_param(&self, key: &str) -> Option<NaiveTime> {
        let raw = self.params.get(key)?.as_str()?;
        super::intent::parse_time(raw)
    }

    /// The `minutes` parameter, for kinds that carry one
    pub fn minutes_param(&self) -> Option<u32> {
        self.params.get("minutes")?.as_u64().map(|m| m as u32)
    }
}

/// A persisted constraint record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Unique record id; stable identity digest embedded in the suffix
    pub uid: String,

    pub scope: ConstraintScope,
    pub status: ConstraintStatus,
    pub applicability: Applicability,
    pub rule: Rule,

    /// How certain the discovering stage was, 0.0..=1.0
    pub confidence: f32,

    /// UIDs of the records this one replaced
    pub supersedes_uids: Vec<String>,

    /// Digest of the logical identity (rule kind + scope + applicability)
    pub identity: String,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Constraint {
    /// Canonical identity string for a (scope, rule kind, applicability)
    /// triple. Two records with equal identity describe the same logical
    /// constraint.
    pub fn logical_identity(scope: ConstraintScope, kind: RuleKind, applicability: &Applicability) -> String {
        format!("{}|{}|{}", scope, kind, applicability.identity_component())
    }

    /// Whether retrieval should consider this record at all
    pub fn is_retrievable(&self) -> bool {
        matches!(self.status, ConstraintStatus::Locked | ConstraintStatus::Proposed)
    }

    /// Mark as superseded by a newer record
    pub fn supersede(&mut self) {
        self.status = ConstraintStatus::Superseded;
        self.updated_at = now_ms();
    }
}

impl Record for Constraint {
    fn id(&self) -> &str {
        &self.uid
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "constraints"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("scope".to_string(), IndexValue::String(self.scope.to_string()));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("rule_kind".to_string(), IndexValue::String(self.rule.kind.to_string()));
        fields.insert("identity".to_string(), IndexValue::String(self.identity.clone()));
        fields
    }
}

/// A not-yet-persisted constraint candidate discovered during a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDraft {
    pub scope: ConstraintScope,
    pub applicability: Applicability,
    pub rule: Rule,
    pub confidence: f32,
    /// Whether the candidate is already user-confirmed
    pub lock: bool,
}

impl ConstraintDraft {
    /// Stable digest of this draft's logical identity
    pub fn identity(&self) -> String {
        identity_digest(&Constraint::logical_identity(
            self.scope,
            self.rule.kind,
            &self.applicability,
        ))
    }

    /// Materialize into a record, linking the UIDs it supersedes
    pub fn into_constraint(self, supersedes_uids: Vec<String>) -> Constraint {
        let identity = self.identity();
        let now = now_ms();
        Constraint {
            uid: generate_id("con", &identity),
            scope: self.scope,
            status: if self.lock {
                ConstraintStatus::Locked
            } else {
                ConstraintStatus::Proposed
            },
            applicability: self.applicability,
            rule: self.rule,
            confidence: self.confidence,
            supersedes_uids,
            identity,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn draft(kind_time: NaiveTime) -> ConstraintDraft {
        ConstraintDraft {
            scope: ConstraintScope::Profile,
            applicability: Applicability::any(),
            rule: Rule::no_earlier_than(kind_time),
            confidence: 0.8,
            lock: false,
        }
    }

    #[test]
    fn test_applicability_covers_date_range() {
        let applicability = Applicability {
            date_range: Some((
                NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 8, 31).unwrap(),
            )),
            ..Default::default()
        };
        assert!(applicability.covers(NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()));
        assert!(!applicability.covers(NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()));
    }

    #[test]
    fn test_applicability_covers_weekdays() {
        // 2026-08-06 is a Thursday (ISO weekday 4)
        let thursday_only = Applicability {
            days_of_week: vec![4],
            ..Default::default()
        };
        assert!(thursday_only.covers(NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()));
        assert!(!thursday_only.covers(NaiveDate::from_ymd_opt(2026, 8, 7).unwrap()));
    }

    #[test]
    fn test_applicability_event_types() {
        let typed = Applicability {
            event_types: vec!["meeting".to_string()],
            ..Default::default()
        };
        assert!(typed.matches_event_types(&[]));
        assert!(typed.matches_event_types(&["meeting".to_string()]));
        assert!(!typed.matches_event_types(&["focus".to_string()]));
        assert!(Applicability::any().matches_event_types(&["focus".to_string()]));
    }

    #[test]
    fn test_identity_ignores_params() {
        // Same kind+scope+applicability => same identity, even with
        // different parameter values
        let a = draft(t(9, 0)).identity();
        let b = draft(t(10, 0)).identity();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_differs_by_kind() {
        let a = draft(t(9, 0)).identity();
        let b = ConstraintDraft {
            rule: Rule::no_later_than(t(17, 0)),
            ..draft(t(9, 0))
        }
        .identity();
        assert_ne!(a, b);
    }

    #[test]
    fn test_into_constraint() {
        let record = draft(t(9, 0)).into_constraint(vec!["old-uid".to_string()]);
        assert_eq!(record.status, ConstraintStatus::Proposed);
        assert_eq!(record.supersedes_uids, vec!["old-uid".to_string()]);
        assert!(record.uid.contains("-con-"));
        assert_eq!(record.identity, draft(t(9, 0)).identity());
    }

    #[test]
    fn test_rule_params() {
        assert_eq!(Rule::no_earlier_than(t(9, 30)).time_param("time"), Some(t(9, 30)));
        assert_eq!(Rule::buffer_after(15).minutes_param(), Some(15));
        assert_eq!(Rule::prefer_window(t(9, 0), t(12, 0)).time_param("end"), Some(t(12, 0)));
    }
}
