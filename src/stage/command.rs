//! Stage backed by an external agent CLI.
//!
//! The agent is spawned in the working directory with the stage instructions
//! and context on stdin. Its stdout is the response; stderr is streamed to the
//! debug log. Artifacts are whatever the agent leaves on disk, so this stage
//! never reports `artifact_created` itself.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info};

use super::{Stage, StageInput, StageOutput, prompts};
use crate::config::{AgentCommand, Config};
use crate::errors::StageError;
use crate::phase::StageKind;

const STDERR_TAIL_LINES: usize = 20;

/// Exported to the agent so one command can serve every stage.
pub const ENV_STAGE: &str = "CONDUCTOR_STAGE";

pub struct CommandAgent {
    kind: StageKind,
    command: AgentCommand,
    work_dir: PathBuf,
    env: Vec<(&'static str, String)>,
}

impl CommandAgent {
    pub fn new(kind: StageKind, command: AgentCommand, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            command,
            work_dir: work_dir.into(),
            env: Vec::new(),
        }
    }

    pub fn from_config(kind: StageKind, config: &Config) -> Self {
        let mut env = config.agent_env();
        env.push((ENV_STAGE, kind.to_string()));
        Self {
            env,
            ..Self::new(kind, config.agent(kind).clone(), &config.work_dir)
        }
    }

    /// Full stdin payload: role instructions followed by the stage input.
    pub fn render_prompt(&self, input: StageInput<'_>) -> String {
        let mut prompt = String::from(prompts::instructions(self.kind));
        prompt.push('\n');
        match input {
            StageInput::Transcript(turns) => {
                prompt.push_str("## Conversation so far\n\n");
                for (i, turn) in turns.iter().enumerate() {
                    let speaker = if i % 2 == 0 { "User" } else { "Agent" };
                    prompt.push_str(&format!("**{}:** {}\n\n", speaker, turn));
                }
            }
            StageInput::Instruction(text) => {
                prompt.push_str("## Task\n\n");
                prompt.push_str(text.trim());
                prompt.push('\n');
            }
        }
        prompt
    }
}

#[async_trait]
impl Stage for CommandAgent {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput> {
        let prompt = self.render_prompt(input);
        let start = Instant::now();

        let mut cmd = Command::new(&self.command.cmd);
        cmd.args(&self.command.args)
            .envs(self.env.iter().map(|(k, v)| (*k, v.as_str())))
            .current_dir(&self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Spawning {}: {}", self.kind.agent_name(), self.command.display());

        let mut child = cmd.spawn().map_err(|source| StageError::SpawnFailed {
            cmd: self.command.cmd.clone(),
            source,
        })?;

        // Agents may start writing before they finish reading
        let stdin = child.stdin.take().context("Failed to open agent stdin")?;
        let writer = tokio::spawn(write_prompt(stdin, prompt).with_current_subscriber());

        let stderr = child.stderr.take().context("Failed to open agent stderr")?;
        let agent = self.kind.agent_name();
        let stderr_task = tokio::spawn(drain_stderr(stderr, agent).with_current_subscriber());

        let mut stdout = child.stdout.take().context("Failed to open agent stdout")?;
        let mut text = String::new();
        stdout
            .read_to_string(&mut text)
            .await
            .map_err(StageError::Io)?;

        let status = child.wait().await.map_err(StageError::Io)?;
        let stderr_tail = stderr_task.await.context("stderr reader panicked")?;

        match writer.await.context("stdin writer panicked")? {
            Ok(()) => {}
            // The agent may exit without reading all of its input
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("{} closed stdin early", agent);
            }
            Err(e) => return Err(StageError::Io(e).into()),
        }

        info!(
            "{} finished in {:.1}s (exit: {})",
            agent,
            start.elapsed().as_secs_f64(),
            status.code().unwrap_or(-1)
        );

        if !status.success() {
            return Err(StageError::NonZeroExit {
                exit_code: status.code().unwrap_or(-1),
                stderr_tail,
            }
            .into());
        }

        Ok(StageOutput::text(text))
    }
}

async fn write_prompt(mut stdin: tokio::process::ChildStdin, prompt: String) -> io::Result<()> {
    stdin.write_all(prompt.as_bytes()).await?;
    stdin.shutdown().await
}

/// Log every stderr line and keep the last few for error reports.
async fn drain_stderr(stderr: tokio::process::ChildStderr, agent: &'static str) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[{}] {}", agent, line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(kind: StageKind, script: &str, dir: &std::path::Path) -> CommandAgent {
        CommandAgent::new(kind, AgentCommand::new("sh", &["-c", script]), dir)
    }

    #[test]
    fn test_transcript_alternates_speakers() {
        let agent = CommandAgent::new(
            StageKind::Requirements,
            AgentCommand::new("cat", &[]),
            "/tmp",
        );
        let turns = vec![
            "build a CLI".to_string(),
            "Which language?".to_string(),
            "Python".to_string(),
        ];
        let prompt = agent.render_prompt(StageInput::Transcript(&turns));

        assert!(prompt.starts_with("# Requirements Analyst"));
        assert!(prompt.contains("**User:** build a CLI"));
        assert!(prompt.contains("**Agent:** Which language?"));
        assert!(prompt.contains("**User:** Python"));
    }

    #[test]
    fn test_instruction_prompt_includes_task() {
        let agent = CommandAgent::new(StageKind::Coding, AgentCommand::new("cat", &[]), "/tmp");
        let prompt = agent.render_prompt(StageInput::Instruction(prompts::CODER_PROMPT));
        assert!(prompt.contains("# Coder"));
        assert!(prompt.contains("## Task"));
        assert!(prompt.contains("deliverable.zip"));
    }

    #[tokio::test]
    async fn test_stdout_becomes_response() {
        let dir = tempdir().unwrap();
        let agent = CommandAgent::new(StageKind::Validation, AgentCommand::new("cat", &[]), dir.path());

        let output = agent
            .run(StageInput::Instruction("check everything"))
            .await
            .unwrap();

        assert!(output.text.contains("check everything"));
        assert_eq!(output.artifact_created, None);
    }

    #[tokio::test]
    async fn test_agent_runs_in_work_dir_with_env() {
        let dir = tempdir().unwrap();
        let mut agent = sh(
            StageKind::Coding,
            "cat > /dev/null; echo \"$AZURE_AI_MODEL_DEPLOYMENT_NAME\"; touch deliverable.zip",
            dir.path(),
        );
        agent.env = vec![("AZURE_AI_MODEL_DEPLOYMENT_NAME", "gpt-4.1".to_string())];

        let output = agent.run(StageInput::Instruction("go")).await.unwrap();

        assert_eq!(output.text.trim(), "gpt-4.1");
        assert!(dir.path().join("deliverable.zip").exists());
    }

    #[tokio::test]
    async fn test_from_config_exports_stage_and_endpoint() {
        let dir = tempdir().unwrap();
        let mut config = Config::for_work_dir(dir.path(), Some("https://test.example.com"));
        config.validation_agent = AgentCommand::new(
            "sh",
            &[
                "-c",
                "cat > /dev/null; echo \"$CONDUCTOR_STAGE $AZURE_AI_PROJECT_ENDPOINT\"",
            ],
        );
        let agent = CommandAgent::from_config(StageKind::Validation, &config);

        let output = agent.run(StageInput::Instruction("x")).await.unwrap();

        assert_eq!(output.text.trim(), "validation https://test.example.com");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let dir = tempdir().unwrap();
        let agent = sh(StageKind::Coding, "echo 'model overloaded' >&2; exit 3", dir.path());

        let err = agent.run(StageInput::Instruction("go")).await.unwrap_err();

        match err.downcast_ref::<StageError>() {
            Some(StageError::NonZeroExit {
                exit_code,
                stderr_tail,
            }) => {
                assert_eq!(*exit_code, 3);
                assert!(stderr_tail.contains("model overloaded"));
            }
            other => panic!("Expected NonZeroExit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let dir = tempdir().unwrap();
        let agent = CommandAgent::new(
            StageKind::Requirements,
            AgentCommand::new("conductor-no-such-agent", &[]),
            dir.path(),
        );

        let err = agent
            .run(StageInput::Transcript(&["hi".to_string()]))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::SpawnFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_agent_ignoring_stdin_still_succeeds() {
        let dir = tempdir().unwrap();
        let agent = sh(StageKind::Validation, "echo done", dir.path());

        let output = agent.run(StageInput::Instruction("x")).await.unwrap();

        assert_eq!(output.text.trim(), "done");
    }
}
