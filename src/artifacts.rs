//! Artifact registry: logical artifact names mapped to fixed paths.
//!
//! Every pipeline stage signals completion by leaving a file or directory at a
//! well-known location under the working directory. The registry answers
//! "does it exist right now?" and never caches the answer, because agents
//! mutate the filesystem as a side effect of being invoked.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Log directory, relative to the working directory.
pub const LOG_DIR: &str = "logs";

/// Every path the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// `specs/SPEC.md`, written by the Requirements stage
    Spec,
    /// `deliverable.zip`, written by the Coding stage
    Deliverable,
    /// `VALIDATION.md`, written by the Validation stage
    Validation,
    /// `generated_project/`, the Coding stage's output directory
    Source,
    /// `deliverable_fixed.zip`, optional Validation stage output
    FixedDeliverable,
    /// `validation_workspace/`, Validation stage scratch space
    ValidationWorkspace,
}

impl Artifact {
    /// Logical key used in summaries and JSON.
    pub fn key(self) -> &'static str {
        match self {
            Artifact::Spec => "spec",
            Artifact::Deliverable => "deliverable",
            Artifact::Validation => "validation",
            Artifact::Source => "source",
            Artifact::FixedDeliverable => "fixed_deliverable",
            Artifact::ValidationWorkspace => "validation_workspace",
        }
    }

    /// Path relative to the working directory.
    pub fn relative_path(self) -> &'static str {
        match self {
            Artifact::Spec => "specs/SPEC.md",
            Artifact::Deliverable => "deliverable.zip",
            Artifact::Validation => "VALIDATION.md",
            Artifact::Source => "generated_project",
            Artifact::FixedDeliverable => "deliverable_fixed.zip",
            Artifact::ValidationWorkspace => "validation_workspace",
        }
    }

    pub fn is_directory(self) -> bool {
        matches!(self, Artifact::Source | Artifact::ValidationWorkspace)
    }

    /// Artifacts left behind by a previous run, in cleanup order.
    pub fn previous_run_outputs() -> [Artifact; 6] {
        [
            Artifact::Deliverable,
            Artifact::FixedDeliverable,
            Artifact::Source,
            Artifact::ValidationWorkspace,
            Artifact::Spec,
            Artifact::Validation,
        ]
    }
}

/// Resolves artifacts against one working directory.
#[derive(Debug, Clone)]
pub struct ArtifactRegistry {
    root: PathBuf,
}

impl ArtifactRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.root.join(artifact.relative_path())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    /// Whether the artifact exists right now. Access errors count as absent.
    pub fn is_present(&self, artifact: Artifact) -> bool {
        std::fs::metadata(self.path(artifact)).is_ok()
    }

    /// `Some(path)` when present, `None` otherwise.
    pub fn locate(&self, artifact: Artifact) -> Option<PathBuf> {
        let path = self.path(artifact);
        std::fs::metadata(&path).ok().map(|_| path)
    }

    /// Snapshot of the four artifacts reported in a run result.
    pub fn snapshot(&self) -> ArtifactSet {
        ArtifactSet {
            spec: self.locate(Artifact::Spec),
            deliverable: self.locate(Artifact::Deliverable),
            validation: self.locate(Artifact::Validation),
            source: self.locate(Artifact::Source),
        }
    }
}

/// Point-in-time view of the reportable artifacts. `None` means absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactSet {
    pub spec: Option<PathBuf>,
    pub deliverable: Option<PathBuf>,
    pub validation: Option<PathBuf>,
    pub source: Option<PathBuf>,
}

impl ArtifactSet {
    /// True iff the three stage outputs (spec, deliverable, validation) exist.
    pub fn pipeline_complete(&self) -> bool {
        self.spec.is_some() && self.deliverable.is_some() && self.validation.is_some()
    }

    /// Keys of every absent artifact, in declaration order.
    pub fn missing(&self) -> Vec<&'static str> {
        self.entries()
            .into_iter()
            .filter(|(_, path)| path.is_none())
            .map(|(key, _)| key)
            .collect()
    }

    pub fn entries(&self) -> [(&'static str, Option<&PathBuf>); 4] {
        [
            (Artifact::Spec.key(), self.spec.as_ref()),
            (Artifact::Deliverable.key(), self.deliverable.as_ref()),
            (Artifact::Validation.key(), self.validation.as_ref()),
            (Artifact::Source.key(), self.source.as_ref()),
        ]
    }
}
