//! Diff-based synchronization with the remote calendar

pub mod diff;
pub mod engine;
pub mod remote;

pub use diff::{RemoteOp, diff};
pub use engine::{SyncEngine, SyncOutcome, UndoResult};
pub use remote::{CalendarRemote, InMemoryCalendar, OpCounts, RemoteItem};
