//! Stage-gated turn orchestration

pub mod core;
pub mod messages;
pub mod stages;

pub use core::{OrchestratorConfig, StageOrchestrator};
pub use messages::{Response, StageOutcome};
