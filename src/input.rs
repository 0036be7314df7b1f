//! Sources of user turns for the blocking run loop.

use std::collections::VecDeque;

use anyhow::{Context, Result, bail};

/// Supplies the next user turn, given the agent's latest message as prompt.
pub trait UserInput: Send {
    fn next_turn(&mut self, prompt: &str) -> Result<String>;
}

/// Interactive terminal input.
#[derive(Debug, Default)]
pub struct TerminalInput;

impl UserInput for TerminalInput {
    fn next_turn(&mut self, prompt: &str) -> Result<String> {
        use console::style;
        use dialoguer::Input;

        println!();
        println!("{}", style(prompt).cyan());

        Input::<String>::new()
            .with_prompt("Your answer")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read answer from terminal")
    }
}

/// Pre-recorded answers, for unattended runs.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    answers: VecDeque<String>,
    fallback: Option<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            fallback: None,
        }
    }

    /// Answer with `text` once the recorded answers run out instead of failing.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }
}

impl UserInput for ScriptedInput {
    fn next_turn(&mut self, prompt: &str) -> Result<String> {
        if let Some(answer) = self.answers.pop_front() {
            return Ok(answer);
        }
        match &self.fallback {
            Some(text) => Ok(text.clone()),
            None => bail!("No scripted answer left for: {}", prompt),
        }
    }
}
