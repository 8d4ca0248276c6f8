//! Domain types: plans, patches, intents, constraints, sessions, and the
//! sync transaction log

pub mod block;
pub mod constraint;
pub mod id;
pub mod intent;
pub mod patch;
pub mod session;
pub mod transaction;

pub use block::{Block, BlockKind, PlanModel, immovables_preserved};
pub use constraint::{
    Applicability, Constraint, ConstraintDraft, ConstraintScope, ConstraintStatus, Rule, RuleKind,
};
pub use id::generate_id;
pub use intent::{Intent, parse_intent};
pub use patch::{Patch, PatchOp};
pub use session::{FrameFacts, InputFacts, Session, SessionStatus, Stage, TaskItem};
pub use transaction::{SyncAction, SyncOperation, SyncTransaction};
