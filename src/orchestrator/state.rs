//! Persisted run state and the values a step produces.
//!
//! A `RunState` is everything needed to resume a run between steps: the
//! current phase, both conversation views, the tail of fixed prompts and
//! responses from the unattended phases, the last error and, once `Done`,
//! the result. Both the blocking loop and the session adapter drive the same
//! value through `Orchestrator::step`.

use serde::Serialize;

use crate::artifacts::ArtifactSet;
use crate::conversation::Transcript;
use crate::lock::RunGuard;
use crate::phase::{Phase, StageKind};

/// Fixed summary for a successful run.
pub const SUMMARY_SUCCESS: &str = "Workflow completed successfully. All artifacts generated.";
/// Fixed summary when the Coding stage leaves no deliverable.
pub const SUMMARY_CODING_FAILED: &str = "Code generation failed: deliverable.zip not created";

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub success: bool,
    /// Plain transcript followed by the fixed prompts and responses of the
    /// unattended phases
    pub conversation: Vec<String>,
    pub artifacts: ArtifactSet,
    pub summary: String,
}

impl RunResult {
    /// Summary for a run that reached `Done` normally.
    pub fn summarize(artifacts: &ArtifactSet) -> String {
        if artifacts.pipeline_complete() {
            SUMMARY_SUCCESS.to_string()
        } else {
            format!(
                "Workflow incomplete. Missing artifacts: {}.",
                artifacts.missing().join(", ")
            )
        }
    }
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Still gathering requirements; the next step needs a user turn
    AwaitingInput,
    /// Entered a new non-terminal phase
    Advanced(Phase),
    /// Reached `Done`
    Finished(RunResult),
}

/// Number of calls made to each stage so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCalls {
    pub requirements: usize,
    pub coding: usize,
    pub validation: usize,
}

impl StageCalls {
    pub fn record(&mut self, kind: StageKind) {
        match kind {
            StageKind::Requirements => self.requirements += 1,
            StageKind::Coding => self.coding += 1,
            StageKind::Validation => self.validation += 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunState {
    pub(crate) phase: Phase,
    pub(crate) transcript: Transcript,
    /// User turn accepted but not yet answered by the Requirements stage
    pub(crate) pending: Option<String>,
    pub(crate) tail: Vec<String>,
    pub(crate) error: Option<String>,
    pub(crate) result: Option<RunResult>,
    pub(crate) calls: StageCalls,
    /// Held until the run reaches `Done`
    pub(crate) guard: Option<RunGuard>,
}

impl RunState {
    pub(crate) fn new(guard: RunGuard) -> Self {
        Self {
            guard: Some(guard),
            ..Self::default()
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn pending_turn(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Error of the most recent step, cleared by the next successful one.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn result(&self) -> Option<&RunResult> {
        self.result.as_ref()
    }

    pub fn calls(&self) -> StageCalls {
        self.calls
    }

    pub fn holds_lock(&self) -> bool {
        self.guard.is_some()
    }

    /// Plain transcript plus the unattended-phase tail.
    pub(crate) fn conversation(&self) -> Vec<String> {
        let mut conversation = self.transcript.plain().to_vec();
        conversation.extend(self.tail.iter().cloned());
        conversation
    }

    /// Move forward to `next`. Phases never move backwards.
    pub(crate) fn enter(&mut self, next: Phase) {
        debug_assert!(next >= self.phase, "phase moved backwards");
        self.phase = self.phase.max(next);
    }

    /// Record the result, enter `Done` and release the run lock.
    pub(crate) fn finish(&mut self, result: RunResult) {
        self.enter(Phase::Done);
        self.result = Some(result);
        self.guard = None;
    }
}
