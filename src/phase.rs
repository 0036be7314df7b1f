//! Pipeline phase definition.
//!
//! This module provides:
//! - `Phase`, the totally ordered set of pipeline states
//! - `StageKind`, the three agent-backed stages a phase can map to
//!
//! Phases only ever move forward within a run. `Requirements` is initial and
//! `Done` is terminal; `Coding` may jump straight to `Done` when the deliverable
//! is missing, which still respects the ordering.

use serde::{Deserialize, Serialize};

/// One state of the pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Interactive requirements gathering until the spec artifact exists
    #[default]
    Requirements,
    /// Single code generation call producing the deliverable
    Coding,
    /// Single validation call producing the validation report
    Validation,
    /// Terminal: the run result has been (or is about to be) computed
    Done,
}

impl Phase {
    /// 1-based phase number as shown in log banners.
    pub fn number(self) -> u8 {
        match self {
            Phase::Requirements => 1,
            Phase::Coding => 2,
            Phase::Validation => 3,
            Phase::Done => 4,
        }
    }

    /// Banner title logged when the phase is entered.
    pub fn title(self) -> &'static str {
        match self {
            Phase::Requirements => "INTERACTIVE REQUIREMENTS GATHERING",
            Phase::Coding => "CODE GENERATION",
            Phase::Validation => "VALIDATION",
            Phase::Done => "SUMMARY",
        }
    }

    /// The stage invoked while in this phase, if any.
    pub fn stage(self) -> Option<StageKind> {
        match self {
            Phase::Requirements => Some(StageKind::Requirements),
            Phase::Coding => Some(StageKind::Coding),
            Phase::Validation => Some(StageKind::Validation),
            Phase::Done => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Done
    }

    /// Whether a re-entrant caller has to poll to make progress in this phase.
    ///
    /// Coding and Validation run without user input, so nothing but a poll
    /// will trigger their single step.
    pub fn needs_polling(self) -> bool {
        matches!(self, Phase::Coding | Phase::Validation)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Requirements => write!(f, "requirements"),
            Phase::Coding => write!(f, "coding"),
            Phase::Validation => write!(f, "validation"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// The three agent-backed stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Requirements,
    Coding,
    Validation,
}

impl StageKind {
    /// Agent name used in log lines.
    pub fn agent_name(self) -> &'static str {
        match self {
            StageKind::Requirements => "Requirements Agent",
            StageKind::Coding => "Coder Agent",
            StageKind::Validation => "Validator Agent",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Requirements => write!(f, "requirements"),
            StageKind::Coding => write!(f, "coding"),
            StageKind::Validation => write!(f, "validation"),
        }
    }
}
