//! Stage collaborators: the seam between the state machine and the agents.
//!
//! A stage receives either the plain conversation transcript (Requirements)
//! or a fixed instruction string (Coding, Validation) and returns the agent's
//! response. Artifacts are produced as a side effect on the filesystem.

pub mod command;
pub mod prompts;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

pub use command::CommandAgent;

use crate::config::Config;
use crate::phase::StageKind;

/// What a stage is asked to work on.
#[derive(Debug, Clone, Copy)]
pub enum StageInput<'a> {
    /// Every turn so far, oldest first, starting with the user's request
    Transcript(&'a [String]),
    /// A fixed instruction string
    Instruction(&'a str),
}

/// Response of one stage call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub text: String,
    /// Whether the stage's artifact was produced, if the stage can tell.
    /// `None` makes the caller check the filesystem instead.
    pub artifact_created: Option<bool>,
}

impl StageOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            artifact_created: None,
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput>;
}

/// The three collaborators an orchestrator drives.
#[derive(Clone)]
pub struct Agents {
    pub requirements: Arc<dyn Stage>,
    pub coding: Arc<dyn Stage>,
    pub validation: Arc<dyn Stage>,
}

impl Agents {
    /// Command-backed agents for every stage, as configured.
    pub fn from_config(config: &Config) -> Self {
        Self {
            requirements: Arc::new(CommandAgent::from_config(StageKind::Requirements, config)),
            coding: Arc::new(CommandAgent::from_config(StageKind::Coding, config)),
            validation: Arc::new(CommandAgent::from_config(StageKind::Validation, config)),
        }
    }

    pub fn get(&self, kind: StageKind) -> &Arc<dyn Stage> {
        match kind {
            StageKind::Requirements => &self.requirements,
            StageKind::Coding => &self.coding,
            StageKind::Validation => &self.validation,
        }
    }
}

impl std::fmt::Debug for Agents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agents").finish_non_exhaustive()
    }
}
