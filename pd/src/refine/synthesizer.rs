//! Patch synthesis
//!
//! `PatchSynthesizer` is the seam where an LLM-backed proposer would plug
//! in. The rule-based implementation shipped here maps typed intents to
//! patches directly, and uses the validator's violation feedback to re-place
//! blocks into free slots on the next attempt instead of retrying blindly.

use async_trait::async_trait;
use chrono::Duration;
use eyre::{Result, bail};

use crate::domain::{Block, Intent, Patch, PatchOp, PlanModel, generate_id};
use crate::error::Violation;

/// Proposes a candidate patch for a plan given feedback, plus the violation
/// from the previous attempt when there was one.
#[async_trait]
pub trait PatchSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        plan: &PlanModel,
        feedback: &Intent,
        prior_violation: Option<&Violation>,
    ) -> Result<Patch>;
}

/// Deterministic synthesizer over typed intents.
///
/// First attempt is literal: place exactly where asked. If validation
/// rejected that, the next attempt searches for the nearest free slot that
/// fits instead.
#[derive(Debug, Default)]
pub struct RuleBasedSynthesizer;

impl RuleBasedSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Plan with one block removed, for gap searches that re-place it
    fn without_block(plan: &PlanModel, block_id: &str) -> PlanModel {
        let mut reduced = plan.clone();
        reduced.blocks.retain(|b| b.id != block_id);
        reduced
    }

    fn reposition_op(
        plan: &PlanModel,
        block: &Block,
        requested_start: chrono::NaiveTime,
        replace: bool,
    ) -> Result<PatchOp> {
        let duration = block.duration_minutes();
        let start = if replace {
            // Validation already rejected the literal placement; look for
            // the nearest free slot at or after the requested time, falling
            // back to the first fit anywhere in the day
            let remainder = Self::without_block(plan, &block.id);
            remainder
                .find_gap(duration, Some(requested_start))
                .or_else(|| remainder.find_gap(duration, None))
                .unwrap_or(requested_start)
        } else {
            requested_start
        };

        let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(duration));
        if wrapped != 0 {
            bail!("block '{}' would cross midnight", block.label);
        }

        let mut moved = block.clone();
        moved.start = start;
        moved.end = end;
        Ok(PatchOp::Update {
            block_id: block.id.clone(),
            block: moved,
        })
    }
}

#[async_trait]
impl PatchSynthesizer for RuleBasedSynthesizer {
    async fn synthesize(
        &self,
        plan: &PlanModel,
        feedback: &Intent,
        prior_violation: Option<&Violation>,
    ) -> Result<Patch> {
        let replace = prior_violation.is_some();

        let op = match feedback {
            Intent::Move { target, new_start } => {
                let Some(block) = plan.find_by_label(target) else {
                    bail!("no block matching '{}'", target);
                };
                Self::reposition_op(plan, block, *new_start, replace)?
            }

            Intent::Shift { target, minutes } => {
                let Some(block) = plan.find_by_label(target) else {
                    bail!("no block matching '{}'", target);
                };
                let (new_start, wrapped) = block.start.overflowing_add_signed(Duration::minutes(*minutes));
                if wrapped != 0 {
                    bail!("block '{}' would cross midnight", target);
                }
                Self::reposition_op(plan, block, new_start, replace)?
            }

            Intent::Add {
                label,
                duration_minutes,
                start,
            } => {
                let requested = match (start, replace) {
                    // Literal attempt honors an explicit start time
                    (Some(start), false) => Some(*start),
                    _ => plan.find_gap(*duration_minutes, *start),
                };
                // No fitting gap: emit the literal placement and let
                // validation name the conflict for the user
                let start = requested.unwrap_or(plan.day_start);
                let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(*duration_minutes));
                if wrapped != 0 {
                    bail!("block '{}' would cross midnight", label);
                }
                PatchOp::Add {
                    block: Block::flexible(generate_id("blk", label), label.clone(), start, end),
                }
            }

            Intent::Remove { target } => {
                let block_id = plan
                    .find_by_label(target)
                    .map(|b| b.id.clone())
                    .unwrap_or_else(|| target.clone());
                PatchOp::Delete { block_id }
            }

            Intent::Approve | Intent::RequestChanges => {
                bail!("control intent carries no patch")
            }
        };

        Ok(Patch::new(vec![op]))
    }
}
