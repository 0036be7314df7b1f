//! Typed error hierarchy for the conductor orchestrator.
//!
//! Three top-level enums cover the three failure surfaces:
//! - `ConfigError`: fatal configuration problems detected at construction
//! - `OrchestratorError`: failures that abort a run (never "artifact missing")
//! - `StageError`: failures of the default command-backed stage collaborator
//!
//! A stage that runs but does not produce its artifact is not an error: it is
//! reported as data through `RunResult::success`.

use std::path::PathBuf;

use thiserror::Error;

use crate::phase::StageKind;

/// Configuration errors. All of them are fatal before any phase runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Endpoint not specified. Set AZURE_AI_PROJECT_ENDPOINT, add [azure].endpoint to conductor.toml or pass --endpoint"
    )]
    MissingEndpoint,

    #[error("Failed to resolve working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors that abort a run or prevent one from starting.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open log file at {path}: {source}")]
    LogInit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Another run is already active in this working directory (lock held on {lock_path})")]
    AlreadyRunning { lock_path: PathBuf },

    #[error("Failed to acquire run lock at {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: StageKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to read user input: {0}")]
    Input(#[source] anyhow::Error),
}

/// Errors from the command-backed agent collaborator.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Failed to spawn agent command '{cmd}': {source}")]
    SpawnFailed {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent command exited with code {exit_code}: {stderr_tail}")]
    NonZeroExit { exit_code: i32, stderr_tail: String },

    #[error("Failed to talk to agent process: {0}")]
    Io(#[from] std::io::Error),
}
