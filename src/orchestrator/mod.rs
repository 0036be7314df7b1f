//! Phase state machine driving the three stages.
//!
//! ```text
//! Requirements --(spec exists)--> Coding --(deliverable exists)--> Validation --> Done
//!      ^    |                        |
//!      +----+ (awaiting user turn)   +--(deliverable missing)--------------------> Done
//! ```
//!
//! [`Orchestrator::step`] performs exactly one stage invocation and is shared by
//! the blocking [`Orchestrator::run`] loop and the re-entrant session adapter.

pub mod state;

pub use state::{RunResult, RunState, StageCalls, StepOutcome};

use std::path::Path;
use std::sync::OnceLock;

use chrono::Local;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

use crate::artifacts::{Artifact, ArtifactRegistry};
use crate::config::Config;
use crate::conversation::normalize_answer;
use crate::environment::prepare_environment;
use crate::errors::OrchestratorError;
use crate::input::UserInput;
use crate::lock::RunGuard;
use crate::logging::{LogContext, LogOptions};
use crate::phase::{Phase, StageKind};
use crate::stage::prompts::{CODER_PROMPT, VALIDATOR_PROMPT};
use crate::stage::{Agents, StageInput, StageOutput};
use state::SUMMARY_CODING_FAILED;

/// Prompt shown before the first user turn.
pub const REQUEST_PROMPT: &str = "What do you wanna build?";

const RULE_WIDTH: usize = 80;

/// Options for starting a run.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Delete artifacts of a previous run before starting
    pub clean_start: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { clean_start: true }
    }
}

pub struct Orchestrator {
    config: Config,
    registry: ArtifactRegistry,
    agents: Agents,
    log_options: LogOptions,
    /// Opened by the first [`Orchestrator::begin`] that gets the run lock
    log: OnceLock<LogContext>,
}

impl Orchestrator {
    /// Build an orchestrator, validating configuration. Nothing is written to
    /// disk until [`Orchestrator::begin`].
    pub fn new(config: Config, agents: Agents) -> Result<Self, OrchestratorError> {
        let options = LogOptions {
            console: true,
            verbose: config.verbose,
        };
        Self::with_log_options(config, agents, options)
    }

    pub fn with_log_options(
        config: Config,
        agents: Agents,
        options: LogOptions,
    ) -> Result<Self, OrchestratorError> {
        config.require_endpoint()?;
        let registry = config.registry();

        Ok(Self {
            config,
            registry,
            agents,
            log_options: options,
            log: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// The run's log file, once a run has begun.
    pub fn log_file(&self) -> Option<&Path> {
        self.log.get().map(LogContext::log_file)
    }

    /// Take the run lock, open the log, optionally reset the environment, and
    /// enter `Requirements`. A refused lock leaves no log file behind.
    pub fn begin(&self, options: RunOptions) -> Result<RunState, OrchestratorError> {
        let guard = RunGuard::acquire(self.registry.root())?;
        let log = self.open_log()?;

        log.in_scope(|| {
            if options.clean_start {
                info!("Preparing environment...");
                let report = prepare_environment(&self.registry);
                for skipped in &report.skipped {
                    warn!("Left in place: {} ({})", skipped.path.display(), skipped.reason);
                }
                info!("Environment prepared ({} removed)", report.removed.len());
            }

            log_banner(Phase::Requirements);
        });
        Ok(RunState::new(guard))
    }

    fn open_log(&self) -> Result<&LogContext, OrchestratorError> {
        if let Some(log) = self.log.get() {
            return Ok(log);
        }
        let log = LogContext::init(&self.registry.log_dir(), Local::now(), self.log_options)?;
        let log = self.log.get_or_init(|| log);
        log.in_scope(|| {
            info!("Initializing orchestrator");
            if let Some(endpoint) = &self.config.endpoint {
                debug!("Endpoint: {}", endpoint);
            }
            debug!("Deployment: {}", self.config.deployment);
            debug!("Working directory: {}", self.registry.root().display());
            info!("Log file: {}", log.log_file().display());
        });
        Ok(log)
    }

    /// Advance `state` by exactly one stage invocation.
    ///
    /// `turn` is the user's next answer and is only consumed while gathering
    /// requirements. A stage failure leaves the phase unchanged and is
    /// returned as [`OrchestratorError::Stage`], so the step can be retried.
    pub async fn step(
        &self,
        state: &mut RunState,
        turn: Option<&str>,
    ) -> Result<StepOutcome, OrchestratorError> {
        let result = match self.log.get() {
            Some(log) => {
                self.step_inner(state, turn)
                    .with_subscriber(log.dispatch().clone())
                    .await
            }
            None => self.step_inner(state, turn).await,
        };
        state.error = result.as_ref().err().map(|e| e.to_string());
        result
    }

    async fn step_inner(
        &self,
        state: &mut RunState,
        turn: Option<&str>,
    ) -> Result<StepOutcome, OrchestratorError> {
        if turn.is_some() && state.phase != Phase::Requirements {
            debug!("Ignoring user turn in phase {}", state.phase);
        }

        match state.phase {
            Phase::Requirements => self.gather_requirements(state, turn).await,
            Phase::Coding => self.generate_code(state).await,
            Phase::Validation => self.validate(state).await,
            Phase::Done => Ok(StepOutcome::Finished(self.finalize(state))),
        }
    }

    async fn gather_requirements(
        &self,
        state: &mut RunState,
        turn: Option<&str>,
    ) -> Result<StepOutcome, OrchestratorError> {
        if let Some(text) = turn {
            // The opening request has no default; a blank one is simply not made yet
            if state.transcript.is_empty() && text.trim().is_empty() {
                return Ok(StepOutcome::AwaitingInput);
            }
            let answer = normalize_answer(text);
            debug!("user_answer: {}", answer);
            if state.pending.replace(answer).is_some() {
                debug!("Replaced an unanswered user turn");
            }
        }

        let Some(answer) = state.pending.clone() else {
            return Ok(StepOutcome::AwaitingInput);
        };

        let mut context = state.transcript.plain().to_vec();
        context.push(answer.clone());
        let output = self
            .invoke(state, StageKind::Requirements, StageInput::Transcript(&context))
            .await?;

        state.pending = None;
        state.transcript.push_user(&answer);
        state.transcript.push_agent(output.text.clone());

        if self.artifact_ready(Artifact::Spec, &output) {
            info!("Requirements gathered. Spec file found.");
            state.enter(Phase::Coding);
            log_banner(Phase::Coding);
            Ok(StepOutcome::Advanced(Phase::Coding))
        } else {
            Ok(StepOutcome::AwaitingInput)
        }
    }

    async fn generate_code(&self, state: &mut RunState) -> Result<StepOutcome, OrchestratorError> {
        info!("Starting code generation...");
        let output = self
            .invoke(state, StageKind::Coding, StageInput::Instruction(CODER_PROMPT))
            .await?;
        state.tail.push(CODER_PROMPT.to_string());
        state.tail.push(output.text.clone());

        if !self.artifact_ready(Artifact::Deliverable, &output) {
            warn!("Failed creating the deliverable.zip");
            let result = RunResult {
                success: false,
                conversation: state.conversation(),
                artifacts: self.registry.snapshot(),
                summary: SUMMARY_CODING_FAILED.to_string(),
            };
            state.finish(result.clone());
            return Ok(StepOutcome::Finished(result));
        }

        info!(
            "Code generation completed! Deliverable created at {}",
            self.registry.path(Artifact::Deliverable).display()
        );
        state.enter(Phase::Validation);
        log_banner(Phase::Validation);
        Ok(StepOutcome::Advanced(Phase::Validation))
    }

    async fn validate(&self, state: &mut RunState) -> Result<StepOutcome, OrchestratorError> {
        info!("Starting validation...");
        let output = self
            .invoke(
                state,
                StageKind::Validation,
                StageInput::Instruction(VALIDATOR_PROMPT),
            )
            .await?;
        state.tail.push(VALIDATOR_PROMPT.to_string());
        state.tail.push(output.text);

        state.enter(Phase::Done);
        Ok(StepOutcome::Finished(self.finalize(state)))
    }

    /// Compute (once) and return the result of a finished run.
    fn finalize(&self, state: &mut RunState) -> RunResult {
        if let Some(result) = &state.result {
            return result.clone();
        }

        log_banner(Phase::Done);
        let artifacts = self.registry.snapshot();
        for (key, path) in artifacts.entries() {
            match path {
                Some(path) => info!("  {}: {}", key, path.display()),
                None => info!("  {}: missing", key),
            }
        }
        let result = RunResult {
            success: artifacts.pipeline_complete(),
            summary: RunResult::summarize(&artifacts),
            conversation: state.conversation(),
            artifacts,
        };
        info!("{}", result.summary);
        state.finish(result.clone());
        result
    }

    async fn invoke(
        &self,
        state: &mut RunState,
        kind: StageKind,
        input: StageInput<'_>,
    ) -> Result<StageOutput, OrchestratorError> {
        state.calls.record(kind);
        let output = self
            .agents
            .get(kind)
            .run(input)
            .await
            .map_err(|source| OrchestratorError::Stage {
                stage: kind,
                source,
            })?;
        info!("{} Response:\n{}", kind.agent_name(), output.text);
        Ok(output)
    }

    /// The stage's own report wins; otherwise look on disk.
    fn artifact_ready(&self, artifact: Artifact, output: &StageOutput) -> bool {
        match output.artifact_created {
            Some(created) => {
                if created != self.registry.is_present(artifact) {
                    debug!(
                        "Stage reported {} created={} but the filesystem disagrees",
                        artifact.key(),
                        created
                    );
                }
                created
            }
            None => self.registry.is_present(artifact),
        }
    }

    /// Blocking run: gather requirements from `input` until the spec exists,
    /// then generate, validate and summarize.
    pub async fn run(
        &self,
        request: &str,
        input: &mut dyn UserInput,
        options: RunOptions,
    ) -> Result<RunResult, OrchestratorError> {
        let mut state = self.begin(options)?;
        let mut turn = Some(request.to_string());

        loop {
            match self.step(&mut state, turn.take().as_deref()).await? {
                StepOutcome::Finished(result) => return Ok(result),
                StepOutcome::Advanced(_) => {}
                StepOutcome::AwaitingInput => {
                    let prompt = state
                        .transcript()
                        .last_agent_text()
                        .unwrap_or(REQUEST_PROMPT)
                        .to_string();
                    let answer = input.next_turn(&prompt).map_err(OrchestratorError::Input)?;
                    turn = Some(answer);
                }
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("work_dir", &self.registry.root())
            .field("log_file", &self.log_file())
            .finish_non_exhaustive()
    }
}

fn log_banner(phase: Phase) {
    let rule = "=".repeat(RULE_WIDTH);
    info!("{}", rule);
    info!("PHASE {}: {}", phase.number(), phase.title());
    info!("{}", rule);
}
