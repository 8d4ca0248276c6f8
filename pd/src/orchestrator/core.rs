//! StageOrchestrator - session lifecycle and stage sequencing
//!
//! The single place that decides which stage handler runs for an incoming
//! turn. The session's `stage` field is the only dispatch source, matched
//! exhaustively. Per-session turns are strictly serialized: a second turn
//! for the same session while one is in flight is rejected with a busy
//! error rather than interleaved or queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::constraint::ConstraintStore;
use crate::domain::{Session, SessionStatus, Stage};
use crate::error::TurnError;
use crate::refine::RefinementLoop;
use crate::state::StateManager;
use crate::sync::{CalendarRemote, SyncEngine};

use super::messages::{Response, StageOutcome};

/// Tunables for turn handling
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Attempt budget handed to the refinement loop per turn
    pub max_refine_attempts: u32,

    /// Buffer minutes assumed when the user names a window without one
    pub default_buffer_minutes: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_refine_attempts: 3,
            default_buffer_minutes: 0,
        }
    }
}

/// The stage-gated planning orchestrator
pub struct StageOrchestrator {
    pub(crate) state: StateManager,
    pub(crate) constraints: ConstraintStore,
    pub(crate) remote: Arc<dyn CalendarRemote>,
    pub(crate) refiner: RefinementLoop,
    pub(crate) sync: SyncEngine,
    pub(crate) config: OrchestratorConfig,
    /// Session keys with a turn currently in flight
    active_turns: Arc<Mutex<HashSet<String>>>,
}

/// Removes its key from the active set when the turn ends, however it ends
struct TurnGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl TurnGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, key: &str) -> Option<Self> {
        let mut active = set.lock().expect("turn guard lock");
        if !active.insert(key.to_string()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            key: key.to_string(),
        })
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.set.lock().expect("turn guard lock").remove(&self.key);
    }
}

impl StageOrchestrator {
    pub fn new(
        state: StateManager,
        constraints: ConstraintStore,
        remote: Arc<dyn CalendarRemote>,
        refiner: RefinementLoop,
        sync: SyncEngine,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            state,
            constraints,
            remote,
            refiner,
            sync,
            config,
            active_turns: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Handle one inbound turn; always exactly one response per call.
    ///
    /// Loads or creates the session, dispatches to the current stage's
    /// handler, validates the handler's transition request, and persists.
    /// Handler failures roll the session back to its pre-turn snapshot (the
    /// partial mutation is never persisted) and surface as retryable.
    pub async fn handle_turn(
        &self,
        owner_id: &str,
        target_date: NaiveDate,
        raw_text: &str,
    ) -> Result<Response, TurnError> {
        let key = Session::key(owner_id, target_date);
        let Some(_guard) = TurnGuard::acquire(&self.active_turns, &key) else {
            debug!(%key, "Concurrent turn rejected");
            return Err(TurnError::SessionBusy { key });
        };

        let mut session = self
            .state
            .get_session(owner_id, target_date)
            .await
            .map_err(|e| TurnError::State(e.to_string()))?
            .unwrap_or_else(|| {
                info!(%key, "Creating session");
                Session::new(owner_id, target_date)
            });

        if !session.is_active() {
            return Ok(Response::new(format!(
                "The plan for {} is already {}. Start a new date to plan again.",
                target_date, session.status
            )));
        }

        if raw_text.trim().eq_ignore_ascii_case("abandon") {
            session.set_status(SessionStatus::Abandoned);
            self.state
                .upsert_session(session)
                .await
                .map_err(|e| TurnError::State(e.to_string()))?;
            info!(%key, "Session abandoned");
            return Ok(Response::new(format!("Abandoned planning for {}.", target_date)));
        }

        debug!(%key, stage = %session.stage, "Dispatching turn");

        // Handlers mutate this in-memory copy only; the persisted record
        // does not change until the turn succeeds
        let (response, outcome) = match self.dispatch(&mut session, raw_text).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%key, stage = %session.stage, error = %e, "Stage handler failed; session rolled back");
                return Err(TurnError::Handler { reason: e.to_string() });
            }
        };

        if outcome.advance {
            match validate_transition(session.stage, outcome.target)? {
                Some(next) => session.set_stage(next),
                // Advancing out of the final stage: the handler completed
                // the session; there is no next stage to enter
                None => debug!(%key, "Final stage completed"),
            }
        }

        // Constraint candidates discovered this turn ride on turn success:
        // a rolled-back turn enqueues nothing
        let drafts = std::mem::take(&mut session.pending_constraints);
        for draft in drafts {
            self.constraints.enqueue_upsert(draft).await;
        }

        self.state
            .upsert_session(session)
            .await
            .map_err(|e| TurnError::State(e.to_string()))?;

        Ok(response)
    }

    /// Exhaustive dispatch on the stage field; nothing else selects handlers
    async fn dispatch(&self, session: &mut Session, text: &str) -> eyre::Result<(Response, StageOutcome)> {
        match session.stage {
            Stage::Collect => self.handle_collect(session, text).await,
            Stage::Capture => self.handle_capture(session, text).await,
            Stage::Skeleton => self.handle_skeleton(session, text).await,
            Stage::Refine => self.handle_refine(session, text).await,
            Stage::Review => self.handle_review(session, text).await,
        }
    }
}

/// Resolve and validate a handler's transition request.
///
/// `None` target means the canonical next stage; `Ok(None)` means the final
/// stage completed. An explicit target is only legal if the stage machine
/// permits it — anything else fails the turn, it is never clamped.
pub(crate) fn validate_transition(from: Stage, target: Option<Stage>) -> Result<Option<Stage>, TurnError> {
    match target {
        Some(to) => {
            if from.permits(to) {
                Ok(Some(to))
            } else {
                Err(TurnError::StageTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
        }
        None => Ok(from.next()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_transition_canonical() {
        assert_eq!(validate_transition(Stage::Collect, None).unwrap(), Some(Stage::Capture));
        assert_eq!(validate_transition(Stage::Refine, None).unwrap(), Some(Stage::Review));
        // Completing the final stage has no next
        assert_eq!(validate_transition(Stage::Review, None).unwrap(), None);
    }

    #[test]
    fn test_validate_transition_explicit_next() {
        assert_eq!(
            validate_transition(Stage::Collect, Some(Stage::Capture)).unwrap(),
            Some(Stage::Capture)
        );
    }

    #[test]
    fn test_validate_transition_review_regression() {
        assert_eq!(
            validate_transition(Stage::Review, Some(Stage::Refine)).unwrap(),
            Some(Stage::Refine)
        );
    }

    #[test]
    fn test_validate_transition_rejects_everything_else() {
        for (from, to) in [
            (Stage::Collect, Stage::Skeleton),
            (Stage::Collect, Stage::Collect),
            (Stage::Capture, Stage::Collect),
            (Stage::Refine, Stage::Capture),
            (Stage::Review, Stage::Collect),
            (Stage::Skeleton, Stage::Review),
        ] {
            let result = validate_transition(from, Some(to));
            assert!(
                matches!(result, Err(TurnError::StageTransition { .. })),
                "{} -> {} must be rejected",
                from,
                to
            );
        }
    }
}
