//! Orchestrator turn types

use serde::{Deserialize, Serialize};

use crate::domain::Stage;

/// The single reply emitted for one inbound turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Text shown to the user
    pub display_text: String,

    /// Suggested replies for the next turn
    pub controls: Vec<String>,
}

impl Response {
    pub fn new(display_text: impl Into<String>) -> Self {
        Self {
            display_text: display_text.into(),
            controls: Vec::new(),
        }
    }

    pub fn with_controls(mut self, controls: &[&str]) -> Self {
        self.controls = controls.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// What a stage handler decided about stage progression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    /// Whether to leave the current stage
    pub advance: bool,

    /// Explicit target; `None` means the canonical next stage. The
    /// orchestrator validates the target, not the handler.
    pub target: Option<Stage>,
}

impl StageOutcome {
    /// Remain in the current stage
    pub fn stay() -> Self {
        Self {
            advance: false,
            target: None,
        }
    }

    /// Advance to the canonical next stage (or complete, from the last)
    pub fn next() -> Self {
        Self {
            advance: true,
            target: None,
        }
    }

    /// Advance to an explicit stage
    pub fn to(stage: Stage) -> Self {
        Self {
            advance: true,
            target: Some(stage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_builders() {
        let response = Response::new("hello").with_controls(&["commit", "revise"]);
        assert_eq!(response.display_text, "hello");
        assert_eq!(response.controls, vec!["commit".to_string(), "revise".to_string()]);
    }

    #[test]
    fn test_outcome_builders() {
        assert!(!StageOutcome::stay().advance);
        assert!(StageOutcome::next().advance);
        assert_eq!(StageOutcome::to(Stage::Refine).target, Some(Stage::Refine));
    }
}
