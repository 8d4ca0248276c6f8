//! Patch-based plan refinement

pub mod engine;
pub mod synthesizer;

pub use engine::{RefineOutcome, RefinementLoop};
pub use synthesizer::{PatchSynthesizer, RuleBasedSynthesizer};
