//! Conversation accumulator shared by every stage of one run.
//!
//! Two views are kept in lock-step:
//! - the **display** transcript, `(role, text)` pairs for rendering
//! - the **plain** transcript, text only, which is exactly what the
//!   Requirements stage receives on every call
//!
//! Both are append-only. Nothing truncates or reorders them within a run.

use serde::{Deserialize, Serialize};

/// Instruction substituted for a blank user answer so the loop cannot stall.
pub const DEFAULT_ANSWER: &str =
    "I don't have more info. Please proceed with reasonable assumptions.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One entry of the display transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    display: Vec<Turn>,
    plain: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn, substituting [`DEFAULT_ANSWER`] for blank input.
    ///
    /// Returns the text that was actually recorded.
    pub fn push_user(&mut self, text: &str) -> &str {
        let text = normalize_answer(text);
        self.push(Role::User, text)
    }

    /// Append an agent response verbatim.
    pub fn push_agent(&mut self, text: impl Into<String>) -> &str {
        self.push(Role::Agent, text.into())
    }

    fn push(&mut self, role: Role, text: String) -> &str {
        self.plain.push(text.clone());
        self.display.push(Turn { role, text });
        self.plain.last().map(String::as_str).unwrap_or_default()
    }

    /// The literal sequence passed to the Requirements stage.
    pub fn plain(&self) -> &[String] {
        &self.plain
    }

    pub fn display(&self) -> &[Turn] {
        &self.display
    }

    /// Most recent agent response, used as the prompt for the next user turn.
    pub fn last_agent_text(&self) -> Option<&str> {
        self.display
            .iter()
            .rev()
            .find(|t| t.role == Role::Agent)
            .map(|t| t.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.plain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plain.is_empty()
    }
}

/// Trim user input; blank input becomes [`DEFAULT_ANSWER`].
pub fn normalize_answer(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        DEFAULT_ANSWER.to_string()
    } else {
        trimmed.to_string()
    }
}
