//! Build phases and the transition table between them.
//!
//! Phases advance strictly in order. The only backward moves are the two
//! "bump" transitions triggered by classified interruptions, plus the
//! validation failure loop back into implementation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One stage of the build pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Research,
    Planning,
    Implementation,
    Validation,
    Complete,
}

/// Why a phase transition is happening. Each cause permits a different set of edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Normal forward progress.
    Advance,
    /// A validation failure re-entering implementation with a corrective task.
    ValidationRetry,
    /// ADDITIVE interruption: delta planning.
    Additive,
    /// BREAKING interruption: start over from research.
    Breaking,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Research,
        Phase::Planning,
        Phase::Implementation,
        Phase::Validation,
        Phase::Complete,
    ];

    /// The phase that normally follows this one, if any.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Research => Some(Phase::Planning),
            Phase::Planning => Some(Phase::Implementation),
            Phase::Implementation => Some(Phase::Validation),
            Phase::Validation => Some(Phase::Complete),
            Phase::Complete => None,
        }
    }

    /// Check the transition table.
    pub fn can_transition(self, to: Phase, cause: TransitionCause) -> bool {
        match cause {
            TransitionCause::Advance => self.next() == Some(to),
            TransitionCause::ValidationRetry => {
                self == Phase::Validation && to == Phase::Implementation
            }
            TransitionCause::Additive => to == Phase::Planning,
            TransitionCause::Breaking => to == Phase::Research,
        }
    }

    /// Whether a user message arriving in this phase counts as an interruption
    /// and must be classified. Research and Planning consume messages directly.
    pub fn classifies_messages(self) -> bool {
        matches!(
            self,
            Phase::Implementation | Phase::Validation | Phase::Complete
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Complete
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Research => "research",
            Phase::Planning => "planning",
            Phase::Implementation => "implementation",
            Phase::Validation => "validation",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "research" => Ok(Phase::Research),
            "planning" => Ok(Phase::Planning),
            "implementation" => Ok(Phase::Implementation),
            "validation" => Ok(Phase::Validation),
            "complete" => Ok(Phase::Complete),
            _ => anyhow::bail!(
                "Invalid phase '{}'. Valid values: research, planning, implementation, validation, complete",
                s
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_edges_follow_order() {
        assert!(Phase::Research.can_transition(Phase::Planning, TransitionCause::Advance));
        assert!(Phase::Planning.can_transition(Phase::Implementation, TransitionCause::Advance));
        assert!(
            Phase::Implementation.can_transition(Phase::Validation, TransitionCause::Advance)
        );
        assert!(Phase::Validation.can_transition(Phase::Complete, TransitionCause::Advance));
        assert!(!Phase::Research.can_transition(Phase::Implementation, TransitionCause::Advance));
        assert!(!Phase::Complete.can_transition(Phase::Research, TransitionCause::Advance));
    }

    #[test]
    fn validation_retry_only_from_validation() {
        assert!(
            Phase::Validation
                .can_transition(Phase::Implementation, TransitionCause::ValidationRetry)
        );
        assert!(
            !Phase::Complete
                .can_transition(Phase::Implementation, TransitionCause::ValidationRetry)
        );
    }

    #[test]
    fn bumps_are_allowed_from_every_phase() {
        for phase in Phase::ALL {
            assert!(phase.can_transition(Phase::Planning, TransitionCause::Additive));
            assert!(phase.can_transition(Phase::Research, TransitionCause::Breaking));
            assert!(!phase.can_transition(Phase::Complete, TransitionCause::Breaking));
        }
    }

    #[test]
    fn only_late_phases_classify() {
        assert!(!Phase::Research.classifies_messages());
        assert!(!Phase::Planning.classifies_messages());
        assert!(Phase::Implementation.classifies_messages());
        assert!(Phase::Validation.classifies_messages());
        assert!(Phase::Complete.classifies_messages());
    }

    #[test]
    fn parse_round_trips_display() {
        for phase in Phase::ALL {
            assert_eq!(phase.to_string().parse::<Phase>().unwrap(), phase);
        }
        assert!("deploy".parse::<Phase>().is_err());
    }
}
