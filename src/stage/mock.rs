//! Scripted stages for tests.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::{Stage, StageInput, StageOutput};

/// A stage that counts its calls and creates an artifact on a chosen call.
pub struct ScriptedStage {
    name: &'static str,
    calls: AtomicUsize,
    inputs: Mutex<Vec<Vec<String>>>,
    artifact: Option<(PathBuf, usize)>,
    report: bool,
    fail: bool,
}

impl ScriptedStage {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            artifact: None,
            report: false,
            fail: false,
        }
    }

    /// Write `path` during the `on_call`-th call (1-based) and every call after.
    pub fn creating(mut self, path: impl Into<PathBuf>, on_call: usize) -> Self {
        self.artifact = Some((path.into(), on_call));
        self
    }

    /// Report `artifact_created` instead of leaving it to the filesystem check.
    pub fn reporting(mut self) -> Self {
        self.report = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every input received, flattened to strings, in call order.
    pub fn inputs(&self) -> Vec<Vec<String>> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let recorded = match input {
            StageInput::Transcript(turns) => turns.to_vec(),
            StageInput::Instruction(text) => vec![text.to_string()],
        };
        self.inputs.lock().unwrap().push(recorded);

        if self.fail {
            bail!("{} unavailable", self.name);
        }

        let mut created = false;
        if let Some((path, on_call)) = &self.artifact {
            if call >= *on_call {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, format!("written by {}", self.name))?;
                created = true;
            }
        }

        Ok(StageOutput {
            text: format!("{} response {}", self.name, call),
            artifact_created: self.report.then_some(created),
        })
    }
}
