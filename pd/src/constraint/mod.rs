//! Durable planning facts: deterministic reads, non-blocking writes

pub mod query;
pub mod store;

pub use query::{rule_kinds_for, select};
pub use store::{ConstraintStore, apply_upsert};
