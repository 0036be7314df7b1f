//! Re-entrant adapter: drives a run one trigger at a time.
//!
//! A session owns at most one orchestrator and its persisted [`RunState`].
//! Each trigger performs at most one step; the session never schedules work on
//! its own. While the run sits in an unattended phase the caller polls, using
//! the `poll_after_ms` hint of the view. A failed step clears the hint, so
//! the stage is only retried on an explicit trigger.
//!
//! Once a run has finished its orchestrator is dropped, closing the log file.
//! The transcript and result stay viewable until the session is reset.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::conversation::{Role, Turn};
use crate::errors::OrchestratorError;
use crate::orchestrator::{Orchestrator, RunOptions, RunResult, RunState};
use crate::phase::Phase;

/// Builds a fresh orchestrator for a new run.
pub type OrchestratorFactory =
    Arc<dyn Fn() -> Result<Orchestrator, OrchestratorError> + Send + Sync>;

/// What woke the session up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A user message
    Turn(String),
    /// A timer or "advance" request without user input
    Poll,
}

/// Snapshot of a session for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub phase: Phase,
    pub messages: Vec<Turn>,
    pub error: Option<String>,
    pub result: Option<RunResult>,
    pub log_file: Option<PathBuf>,
    /// A step is in flight
    pub busy: bool,
    /// Poll again after this many milliseconds; `None` when waiting on the user
    pub poll_after_ms: Option<u64>,
}

struct ActiveRun {
    /// `None` once the run has finished
    orchestrator: Option<Orchestrator>,
    state: RunState,
    log_file: Option<PathBuf>,
}

pub struct Session {
    id: Uuid,
    factory: OrchestratorFactory,
    poll_interval_ms: u64,
    run: Option<ActiveRun>,
    /// Errors raised before a run exists (construction, lock)
    error: Option<String>,
}

impl Session {
    pub fn new(factory: OrchestratorFactory, poll_interval_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            factory,
            poll_interval_ms,
            run: None,
            error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.run
            .as_ref()
            .map(|run| run.state.phase())
            .unwrap_or_default()
    }

    /// Handle one trigger: start the run on the first non-blank message, then
    /// perform a single step for the current phase.
    pub async fn trigger(&mut self, trigger: Trigger) {
        let turn = match &trigger {
            Trigger::Turn(text) => Some(text.as_str()),
            Trigger::Poll => None,
        };

        if self.run.is_none() {
            let Some(request) = turn.filter(|t| !t.trim().is_empty()) else {
                debug!("Session {}: nothing to start", self.id);
                return;
            };
            match self.start() {
                Ok(run) => {
                    self.error = None;
                    self.run = Some(run);
                }
                Err(e) => {
                    self.error = Some(e.to_string());
                    return;
                }
            }
            debug!("Session {}: run started with {} chars", self.id, request.len());
        }

        let Some(run) = self.run.as_mut() else {
            return;
        };
        let Some(orchestrator) = &run.orchestrator else {
            debug!("Session {}: run already finished", self.id);
            return;
        };
        // Stage errors are kept on the run state and surfaced by `view`
        let _ = orchestrator.step(&mut run.state, turn).await;

        if run.state.result().is_some() {
            run.orchestrator = None;
        }
    }

    fn start(&self) -> Result<ActiveRun, OrchestratorError> {
        let orchestrator = (self.factory)()?;
        let state = orchestrator.begin(RunOptions { clean_start: true })?;
        Ok(ActiveRun {
            log_file: orchestrator.log_file().map(|path| path.to_path_buf()),
            orchestrator: Some(orchestrator),
            state,
        })
    }

    /// Drop the run, flushing its log and releasing the working directory.
    pub fn reset(&mut self) {
        self.run = None;
        self.error = None;
    }

    pub fn view(&self) -> SessionView {
        let Some(run) = &self.run else {
            return SessionView {
                id: self.id,
                phase: Phase::Requirements,
                messages: Vec::new(),
                error: self.error.clone(),
                result: None,
                log_file: None,
                busy: false,
                poll_after_ms: None,
            };
        };

        let state = &run.state;
        let mut messages = state.transcript().display().to_vec();
        if let Some(pending) = state.pending_turn() {
            messages.push(Turn {
                role: Role::User,
                text: pending.to_string(),
            });
        }

        SessionView {
            id: self.id,
            phase: state.phase(),
            messages,
            error: state.error().map(str::to_string),
            result: state.result().cloned(),
            log_file: run.log_file.clone(),
            busy: false,
            poll_after_ms: (state.phase().needs_polling() && state.error().is_none())
                .then_some(self.poll_interval_ms),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use crate::logging::LogOptions;
    use crate::stage::Agents;
    use crate::stage::mock::ScriptedStage;
    use std::path::Path;
    use tempfile::tempdir;

    pub(crate) struct Stages {
        pub requirements: Arc<ScriptedStage>,
        pub coding: Arc<ScriptedStage>,
        pub validation: Arc<ScriptedStage>,
    }

    /// Factory over scripted stages that complete the pipeline, spec on call 2.
    pub(crate) fn scripted_factory(dir: &Path, endpoint: Option<&str>) -> (OrchestratorFactory, Stages) {
        let stages = Stages {
            requirements: Arc::new(
                ScriptedStage::new("requirements").creating(dir.join("specs/SPEC.md"), 2),
            ),
            coding: Arc::new(ScriptedStage::new("coder").creating(dir.join("deliverable.zip"), 1)),
            validation: Arc::new(
                ScriptedStage::new("validator").creating(dir.join("VALIDATION.md"), 1),
            ),
        };
        let agents = Agents {
            requirements: stages.requirements.clone(),
            coding: stages.coding.clone(),
            validation: stages.validation.clone(),
        };
        let config = Config::for_work_dir(dir, endpoint);
        let factory: OrchestratorFactory = Arc::new(move || {
            Orchestrator::with_log_options(
                config.clone(),
                agents.clone(),
                LogOptions {
                    console: false,
                    verbose: false,
                },
            )
        });
        (factory, stages)
    }

    #[tokio::test]
    async fn test_blank_first_turn_is_a_no_op() {
        let dir = tempdir().unwrap();
        let (factory, stages) = scripted_factory(dir.path(), Some("https://test"));
        let mut session = Session::new(factory, 2000);

        session.trigger(Trigger::Turn("   ".to_string())).await;
        session.trigger(Trigger::Poll).await;

        let view = session.view();
        assert_eq!(view.phase, Phase::Requirements);
        assert!(view.messages.is_empty());
        assert!(view.log_file.is_none());
        assert_eq!(stages.requirements.calls(), 0);
        assert!(!dir.path().join("logs").exists());
    }

    #[tokio::test]
    async fn test_full_run_one_step_per_trigger() {
        let dir = tempdir().unwrap();
        let (factory, stages) = scripted_factory(dir.path(), Some("https://test"));
        let mut session = Session::new(factory, 1500);

        session.trigger(Trigger::Turn("build a CLI".to_string())).await;
        let view = session.view();
        assert_eq!(view.phase, Phase::Requirements);
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.poll_after_ms, None);

        session.trigger(Trigger::Turn("Python".to_string())).await;
        assert_eq!(session.phase(), Phase::Coding);
        assert_eq!(session.view().poll_after_ms, Some(1500));
        assert_eq!(stages.coding.calls(), 0);

        session.trigger(Trigger::Poll).await;
        assert_eq!(session.phase(), Phase::Validation);
        assert_eq!(stages.validation.calls(), 0);

        session.trigger(Trigger::Poll).await;
        let view = session.view();
        assert_eq!(view.phase, Phase::Done);
        assert_eq!(view.poll_after_ms, None);
        assert!(view.result.unwrap().success);
        assert_eq!(stages.requirements.calls(), 2);
        assert_eq!(stages.coding.calls(), 1);
        assert_eq!(stages.validation.calls(), 1);
    }

    #[tokio::test]
    async fn test_poll_in_requirements_waits_for_user() {
        let dir = tempdir().unwrap();
        let (factory, stages) = scripted_factory(dir.path(), Some("https://test"));
        let mut session = Session::new(factory, 2000);

        session.trigger(Trigger::Turn("build a CLI".to_string())).await;
        session.trigger(Trigger::Poll).await;
        session.trigger(Trigger::Poll).await;

        assert_eq!(stages.requirements.calls(), 1);
        assert_eq!(session.phase(), Phase::Requirements);
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_reported_in_view() {
        let dir = tempdir().unwrap();
        let (factory, stages) = scripted_factory(dir.path(), None);
        let mut session = Session::new(factory, 2000);

        session.trigger(Trigger::Turn("build a CLI".to_string())).await;

        let view = session.view();
        assert!(view.error.unwrap().contains("AZURE_AI_PROJECT_ENDPOINT"));
        assert_eq!(stages.requirements.calls(), 0);
    }

    #[tokio::test]
    async fn test_reset_releases_working_directory() {
        let dir = tempdir().unwrap();
        let (factory, _stages) = scripted_factory(dir.path(), Some("https://test"));
        let mut first = Session::new(factory.clone(), 2000);
        let mut second = Session::new(factory, 2000);

        first.trigger(Trigger::Turn("one".to_string())).await;
        second.trigger(Trigger::Turn("two".to_string())).await;
        assert!(second.view().error.unwrap().contains("already active"));

        first.reset();
        assert!(first.view().messages.is_empty());
        second.trigger(Trigger::Turn("two".to_string())).await;
        assert!(second.view().error.is_none());
        assert_eq!(second.view().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_stage_failure_keeps_turn_visible_and_retries() {
        let dir = tempdir().unwrap();
        let config = Config::for_work_dir(dir.path(), Some("https://test"));
        let failing = Arc::new(ScriptedStage::new("requirements").failing());
        let agents = Agents {
            requirements: failing.clone(),
            coding: Arc::new(ScriptedStage::new("coder")),
            validation: Arc::new(ScriptedStage::new("validator")),
        };
        let factory: OrchestratorFactory = Arc::new(move || {
            Orchestrator::with_log_options(
                config.clone(),
                agents.clone(),
                LogOptions {
                    console: false,
                    verbose: false,
                },
            )
        });
        let mut session = Session::new(factory, 2000);

        session.trigger(Trigger::Turn("build a CLI".to_string())).await;
        let view = session.view();
        assert!(view.error.unwrap().contains("requirements stage failed"));
        assert_eq!(view.phase, Phase::Requirements);
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].text, "build a CLI");

        session.trigger(Trigger::Poll).await;
        assert_eq!(failing.calls(), 2);
    }

    fn failing_coder_factory(dir: &Path) -> (OrchestratorFactory, Arc<ScriptedStage>) {
        let config = Config::for_work_dir(dir, Some("https://test"));
        let coding = Arc::new(ScriptedStage::new("coder").failing());
        let agents = Agents {
            requirements: Arc::new(
                ScriptedStage::new("requirements").creating(dir.join("specs/SPEC.md"), 1),
            ),
            coding: coding.clone(),
            validation: Arc::new(ScriptedStage::new("validator")),
        };
        let factory: OrchestratorFactory = Arc::new(move || {
            Orchestrator::with_log_options(
                config.clone(),
                agents.clone(),
                LogOptions {
                    console: false,
                    verbose: false,
                },
            )
        });
        (factory, coding)
    }

    #[tokio::test]
    async fn test_failed_coding_step_stops_poll_hint() {
        let dir = tempdir().unwrap();
        let (factory, coding) = failing_coder_factory(dir.path());
        let mut session = Session::new(factory, 2000);

        session.trigger(Trigger::Turn("build a CLI".to_string())).await;
        assert_eq!(session.view().poll_after_ms, Some(2000));

        // A client that only follows the hint stops after the first failure
        for _ in 0..5 {
            if session.view().poll_after_ms.is_some() {
                session.trigger(Trigger::Poll).await;
            }
        }

        let view = session.view();
        assert_eq!(coding.calls(), 1);
        assert_eq!(view.phase, Phase::Coding);
        assert!(view.poll_after_ms.is_none());
        assert!(view.error.unwrap().contains("coding stage failed"));
    }

    #[tokio::test]
    async fn test_explicit_advance_retries_failed_stage() {
        let dir = tempdir().unwrap();
        let (factory, coding) = failing_coder_factory(dir.path());
        let mut session = Session::new(factory, 2000);

        session.trigger(Trigger::Turn("build a CLI".to_string())).await;
        session.trigger(Trigger::Poll).await;
        session.trigger(Trigger::Poll).await;

        assert_eq!(coding.calls(), 2);
        assert!(session.view().poll_after_ms.is_none());
    }

    #[tokio::test]
    async fn test_finished_run_releases_orchestrator_and_keeps_view() {
        let dir = tempdir().unwrap();
        let (factory, stages) = scripted_factory(dir.path(), Some("https://test"));
        let mut session = Session::new(factory, 2000);

        for trigger in [
            Trigger::Turn("build a CLI".to_string()),
            Trigger::Turn("Python".to_string()),
            Trigger::Poll,
            Trigger::Poll,
        ] {
            session.trigger(trigger).await;
        }

        let run = session.run.as_ref().unwrap();
        assert!(run.orchestrator.is_none());
        assert!(!run.state.holds_lock());

        session.trigger(Trigger::Poll).await;
        let view = session.view();
        assert_eq!(view.phase, Phase::Done);
        assert!(view.result.unwrap().success);
        assert_eq!(view.messages.len(), 4);
        assert_eq!(stages.validation.calls(), 1);

        let log_file = view.log_file.unwrap();
        let lines = crate::logging::read_log_lines(&log_file);
        assert!(lines.iter().any(|l| l.contains("PHASE 3: VALIDATION")));
    }

    #[tokio::test]
    async fn test_refused_session_leaves_no_log_file() {
        let dir = tempdir().unwrap();
        let (factory, _stages) = scripted_factory(dir.path(), Some("https://test"));
        let mut first = Session::new(factory.clone(), 2000);
        let mut second = Session::new(factory, 2000);

        first.trigger(Trigger::Turn("one".to_string())).await;
        for _ in 0..3 {
            second.trigger(Trigger::Turn("two".to_string())).await;
        }

        assert!(second.view().error.unwrap().contains("already active"));
        let logs = std::fs::read_dir(dir.path().join("logs")).unwrap().count();
        assert_eq!(logs, 1);
    }
}
