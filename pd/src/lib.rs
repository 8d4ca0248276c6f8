//! Pland - stage-gated daily plan orchestrator
//!
//! Pland builds a structured daily schedule through a multi-stage,
//! human-in-the-loop refinement process, then keeps that plan synchronized
//! with an external calendar-like store.
//!
//! # Core Concepts
//!
//! - **Stage-gated turns**: every user turn flows through a finite-state
//!   machine (collect -> capture -> skeleton -> refine -> review) with one
//!   handler per stage and exactly one reply per turn
//! - **Patch-based refinement**: feedback becomes candidate patches applied
//!   to a copy of the plan and validated before anything is kept
//! - **Diff-based sync**: commits apply the minimal remote operation set,
//!   capture prior state for exact undo, and roll back on partial failure
//! - **Background facts**: constraints discovered mid-turn persist through a
//!   non-blocking queue and bias future placement
//!
//! # Modules
//!
//! - [`domain`] - plans, patches, intents, constraints, sessions, transactions
//! - [`orchestrator`] - session lifecycle and stage sequencing
//! - [`refine`] - the bounded synthesize/apply/validate loop
//! - [`sync`] - plan diffing and the transactional sync engine
//! - [`constraint`] - deterministic reads and queued writes of planning facts
//! - [`state`] - the persistence actor over the record store
//! - [`runner`] - at-least-once background job execution

pub mod cli;
pub mod config;
pub mod constraint;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod refine;
pub mod runner;
pub mod state;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use constraint::ConstraintStore;
pub use domain::{
    Block, BlockKind, Constraint, ConstraintDraft, ConstraintScope, ConstraintStatus, FrameFacts, InputFacts,
    Intent, Patch, PatchOp, PlanModel, Session, SessionStatus, Stage, SyncAction, SyncOperation, SyncTransaction,
    TaskItem,
};
pub use error::{RemoteError, SyncError, SyncFailure, TurnError, ValidationFailure, Violation};
pub use orchestrator::{OrchestratorConfig, Response, StageOrchestrator, StageOutcome};
pub use refine::{PatchSynthesizer, RefineOutcome, RefinementLoop, RuleBasedSynthesizer};
pub use runner::{Job, Runner};
pub use state::{StateError, StateManager};
pub use sync::{CalendarRemote, InMemoryCalendar, RemoteItem, RemoteOp, SyncEngine, SyncOutcome, UndoResult, diff};
