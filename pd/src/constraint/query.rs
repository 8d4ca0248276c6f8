//! Query planning and deduplication for constraint retrieval
//!
//! Pure functions: the same inputs and record set always select the same
//! constraints in the same order.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::domain::{Constraint, RuleKind, Stage};

/// Rule categories worth consulting for a given stage.
///
/// Placement stages read everything; fact-gathering stages and the final
/// review read nothing, since no placement decision is made there.
pub fn rule_kinds_for(stage: Stage) -> &'static [RuleKind] {
    match stage {
        Stage::Skeleton | Stage::Refine => &[
            RuleKind::NoEarlierThan,
            RuleKind::NoLaterThan,
            RuleKind::BufferAfter,
            RuleKind::PreferWindow,
        ],
        Stage::Collect | Stage::Capture | Stage::Review => &[],
    }
}

/// Select the constraints relevant to a retrieval request.
///
/// Filters by the stage's query plan, retrievable status, and applicability,
/// then deduplicates by logical identity keeping the most recently updated
/// survivor. Output is sorted by (identity, uid) so equal inputs always
/// produce identical results.
pub fn select(
    stage: Stage,
    as_of: NaiveDate,
    event_types: &[String],
    records: Vec<Constraint>,
) -> Vec<Constraint> {
    let kinds = rule_kinds_for(stage);

    let candidates = records.into_iter().filter(|c| {
        kinds.contains(&c.rule.kind)
            && c.is_retrievable()
            && c.applicability.covers(as_of)
            && c.applicability.matches_event_types(event_types)
    });

    // Deduplicate by identity: newest updated_at wins, uid breaks ties
    let mut by_identity: HashMap<String, Constraint> = HashMap::new();
    for candidate in candidates {
        match by_identity.get(&candidate.identity) {
            Some(held)
                if (held.updated_at, held.uid.as_str()) >= (candidate.updated_at, candidate.uid.as_str()) => {}
            _ => {
                by_identity.insert(candidate.identity.clone(), candidate);
            }
        }
    }

    let mut selected: Vec<Constraint> = by_identity.into_values().collect();
    selected.sort_by(|a, b| a.identity.cmp(&b.identity).then_with(|| a.uid.cmp(&b.uid)));
    selected
}
