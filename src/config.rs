//! Layered configuration for conductor.
//!
//! Sources, lowest precedence first:
//! 1. `conductor.toml` in the working directory (or the file given by `--config`)
//! 2. Environment variables, after `.env` has been loaded
//! 3. Command-line flags
//!
//! # Configuration File Format
//!
//! ```toml
//! [azure]
//! endpoint = "https://example.openai.azure.com"
//! deployment = "gpt-4.1"
//!
//! [agents]
//! cmd = "claude"
//! args = ["--print", "--dangerously-skip-permissions"]
//!
//! [agents.coding]
//! args = ["--print", "--dangerously-skip-permissions", "--model", "opus"]
//!
//! [server]
//! port = 8501
//! poll_interval_ms = 2000
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactRegistry;
use crate::errors::ConfigError;
use crate::phase::StageKind;

pub const CONFIG_FILE: &str = "conductor.toml";

pub const ENV_ENDPOINT: &str = "AZURE_AI_PROJECT_ENDPOINT";
pub const ENV_DEPLOYMENT: &str = "AZURE_AI_MODEL_DEPLOYMENT_NAME";
pub const ENV_API_KEY: &str = "AZURE_AI_PROJECT_KEY";
pub const ENV_AGENT_CMD: &str = "CONDUCTOR_AGENT_CMD";

const DEFAULT_DEPLOYMENT: &str = "gpt-4.1";

/// `[azure]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureSection {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub deployment: Option<String>,
}

/// Per-stage `[agents.<stage>]` override. Unset fields inherit from `[agents]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOverride {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

/// `[agents]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsSection {
    #[serde(default = "default_agent_cmd")]
    pub cmd: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub requirements: Option<AgentOverride>,
    #[serde(default)]
    pub coding: Option<AgentOverride>,
    #[serde(default)]
    pub validation: Option<AgentOverride>,
}

fn default_agent_cmd() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec![
        "--print".to_string(),
        "--dangerously-skip-permissions".to_string(),
    ]
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            cmd: default_agent_cmd(),
            args: default_agent_args(),
            requirements: None,
            coding: None,
            validation: None,
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Poll cadence suggested to clients while a stage runs unattended
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_port() -> u16 {
    8501
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Contents of `conductor.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub azure: AzureSection,
    #[serde(default)]
    pub agents: AgentsSection,
    #[serde(default)]
    pub server: ServerSection,
}

impl ConductorToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `conductor.toml` from `work_dir`, or defaults if there is none.
    pub fn load_or_default(work_dir: &Path) -> Result<Self, ConfigError> {
        let path = work_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn agent_override(&self, kind: StageKind) -> Option<&AgentOverride> {
        match kind {
            StageKind::Requirements => self.agents.requirements.as_ref(),
            StageKind::Coding => self.agents.coding.as_ref(),
            StageKind::Validation => self.agents.validation.as_ref(),
        }
    }
}

/// Command line used to launch one stage's agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub cmd: String,
    pub args: Vec<String>,
}

impl AgentCommand {
    pub fn new(cmd: impl Into<String>, args: &[&str]) -> Self {
        Self {
            cmd: cmd.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.cmd.clone()
        } else {
            format!("{} {}", self.cmd, self.args.join(" "))
        }
    }
}

/// Values given on the command line. `None` leaves lower layers in effect.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub work_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub verbose: bool,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: PathBuf,
    /// Required before an orchestrator can be built, see [`Config::require_endpoint`]
    pub endpoint: Option<String>,
    pub deployment: String,
    pub api_key: Option<String>,
    pub requirements_agent: AgentCommand,
    pub coding_agent: AgentCommand,
    pub validation_agent: AgentCommand,
    pub port: u16,
    pub poll_interval_ms: u64,
    pub verbose: bool,
}

impl Config {
    /// Resolve configuration from file, process environment and CLI flags.
    pub fn load(cli: CliOverrides) -> Result<Self, ConfigError> {
        Self::from_sources(cli, |key| std::env::var(key).ok())
    }

    /// Resolve configuration with an explicit environment lookup.
    pub fn from_sources(
        cli: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let requested = cli.work_dir.unwrap_or_else(|| PathBuf::from("."));
        let work_dir = requested
            .canonicalize()
            .map_err(|source| ConfigError::WorkDir {
                path: requested.clone(),
                source,
            })?;

        let file = match &cli.config_file {
            Some(path) => ConductorToml::load(path)?,
            None => ConductorToml::load_or_default(&work_dir)?,
        };

        let non_blank = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let endpoint = cli
            .endpoint
            .or_else(|| non_blank(ENV_ENDPOINT))
            .or_else(|| file.azure.endpoint.clone())
            .filter(|v| !v.trim().is_empty());
        let deployment = non_blank(ENV_DEPLOYMENT)
            .or_else(|| file.azure.deployment.clone())
            .unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_string());
        let api_key = non_blank(ENV_API_KEY);
        let cmd_from_env = non_blank(ENV_AGENT_CMD);

        let agent = |kind: StageKind| {
            let stage = file.agent_override(kind);
            let cmd = cmd_from_env
                .clone()
                .or_else(|| stage.and_then(|o| o.cmd.clone()))
                .unwrap_or_else(|| file.agents.cmd.clone());
            let args = stage
                .and_then(|o| o.args.clone())
                .unwrap_or_else(|| file.agents.args.clone());
            AgentCommand { cmd, args }
        };

        Ok(Self {
            requirements_agent: agent(StageKind::Requirements),
            coding_agent: agent(StageKind::Coding),
            validation_agent: agent(StageKind::Validation),
            work_dir,
            endpoint,
            deployment,
            api_key,
            port: cli.port.unwrap_or(file.server.port),
            poll_interval_ms: file.server.poll_interval_ms,
            verbose: cli.verbose,
        })
    }

    /// Defaults for `work_dir` with the given endpoint and no file or environment.
    pub fn for_work_dir(work_dir: impl Into<PathBuf>, endpoint: Option<&str>) -> Self {
        let file = ConductorToml::default();
        let agent = AgentCommand {
            cmd: file.agents.cmd,
            args: file.agents.args,
        };
        Self {
            work_dir: work_dir.into(),
            endpoint: endpoint.map(str::to_string),
            deployment: DEFAULT_DEPLOYMENT.to_string(),
            api_key: None,
            requirements_agent: agent.clone(),
            coding_agent: agent.clone(),
            validation_agent: agent,
            port: file.server.port,
            poll_interval_ms: file.server.poll_interval_ms,
            verbose: false,
        }
    }

    /// The endpoint, or the fatal error every orchestrator construction reports.
    pub fn require_endpoint(&self) -> Result<&str, ConfigError> {
        self.endpoint
            .as_deref()
            .ok_or(ConfigError::MissingEndpoint)
    }

    pub fn agent(&self, kind: StageKind) -> &AgentCommand {
        match kind {
            StageKind::Requirements => &self.requirements_agent,
            StageKind::Coding => &self.coding_agent,
            StageKind::Validation => &self.validation_agent,
        }
    }

    pub fn registry(&self) -> ArtifactRegistry {
        ArtifactRegistry::new(&self.work_dir)
    }

    /// Environment exported to agent processes.
    pub fn agent_env(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![(ENV_DEPLOYMENT, self.deployment.clone())];
        if let Some(endpoint) = &self.endpoint {
            vars.push((ENV_ENDPOINT, endpoint.clone()));
        }
        if let Some(key) = &self.api_key {
            vars.push((ENV_API_KEY, key.clone()));
        }
        vars
    }
}
