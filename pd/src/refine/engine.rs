//! RefinementLoop - bounded synthesize/apply/validate cycle
//!
//! Turns feedback plus the current plan into a new, validated plan. Each
//! failed attempt feeds its specific violation into the next synthesis call;
//! exhausting the attempt budget yields a typed rejection, never an
//! unvalidated plan. The input plan is never mutated, so a caller can
//! abandon a refinement mid-flight with no side effects.

use std::sync::Arc;

use eyre::{Result, ensure};
use tracing::{debug, info, warn};

use crate::domain::{Intent, PlanModel};
use crate::error::{ValidationFailure, Violation};

use super::synthesizer::{PatchSynthesizer, RuleBasedSynthesizer};

/// Result of a refinement run
#[derive(Debug)]
pub enum RefineOutcome {
    /// A new validated plan; the caller decides whether to sync it
    Refined(PlanModel),
    /// Every attempt violated an invariant; carries the last violation
    Rejected(ValidationFailure),
}

/// The refinement loop engine
pub struct RefinementLoop {
    synthesizer: Arc<dyn PatchSynthesizer>,
}

impl RefinementLoop {
    pub fn new(synthesizer: Arc<dyn PatchSynthesizer>) -> Self {
        Self { synthesizer }
    }

    /// Loop backed by the deterministic rule-based synthesizer
    pub fn rule_based() -> Self {
        Self::new(Arc::new(RuleBasedSynthesizer::new()))
    }

    /// Run up to `max_attempts` synthesize/apply/validate cycles.
    ///
    /// Synthesis errors (unknown targets, malformed feedback) propagate as
    /// errors; invariant violations are consumed by the retry loop and only
    /// surface inside [`RefineOutcome::Rejected`] after exhaustion.
    pub async fn refine(&self, plan: &PlanModel, feedback: &Intent, max_attempts: u32) -> Result<RefineOutcome> {
        ensure!(max_attempts > 0, "max_attempts must be at least 1");

        let mut last_violation: Option<Violation> = None;

        for attempt in 1..=max_attempts {
            let patch = self
                .synthesizer
                .synthesize(plan, feedback, last_violation.as_ref())
                .await?;
            debug!(attempt, ops = patch.ops.len(), "Synthesized candidate patch");

            match patch.apply_to(plan) {
                Ok(next) => {
                    info!(attempt, "Refinement produced a valid plan");
                    return Ok(RefineOutcome::Refined(next));
                }
                Err(violation) => {
                    warn!(attempt, %violation, "Candidate patch rejected");
                    last_violation = Some(violation);
                }
            }
        }

        let Some(last) = last_violation else {
            eyre::bail!("refinement loop recorded no violation after {} attempts", max_attempts);
        };
        Ok(RefineOutcome::Rejected(ValidationFailure {
            attempts: max_attempts,
            last,
        }))
    }
}
