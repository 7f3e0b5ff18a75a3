use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MathGraphError, Result};

pub const CONFIG_ENV: &str = "MATHGRAPH_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "mathgraph.toml";
pub const DEFAULT_MCP_SERVER: &str = "mathgraph-mcp";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            organization: None,
            stream: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_timeout_secs() -> u64 {
    60
}

/// A tool server launched as a child process and spoken to over stdio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl McpServerConfig {
    /// The command to spawn. A bare program name that exists next to the
    /// running executable is resolved to that sibling binary.
    pub fn resolved_command(&self) -> String {
        let is_bare = Path::new(&self.command).components().count() == 1;
        if is_bare {
            if let Some(sibling) = sibling_binary(&self.command) {
                return sibling.to_string_lossy().into_owned();
            }
        }
        self.command.clone()
    }
}

fn sibling_binary(name: &str) -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let candidate = exe.parent()?.join(format!("{name}{}", env::consts::EXE_SUFFIX));
    candidate.is_file().then_some(candidate)
}

fn default_mcp_servers() -> BTreeMap<String, McpServerConfig> {
    BTreeMap::from([(
        "math".to_string(),
        McpServerConfig {
            command: DEFAULT_MCP_SERVER.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        },
    )])
}

/// How one agent is built: its instructions and the tools it may use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    pub system_prompt: String,
    /// Exact tool names; `None` grants every tool the servers provide.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl AgentProfile {
    pub fn solver() -> Self {
        Self {
            name: "solver".into(),
            system_prompt: "Use the available tools to answer user math questions step by step."
                .into(),
            tools: Some(vec!["add".into()]),
            max_steps: default_max_steps(),
        }
    }

    pub fn reviewer() -> Self {
        Self {
            name: "reviewer".into(),
            system_prompt:
                "Use the available tools to verify and finalize user math questions step by step."
                    .into(),
            tools: None,
            max_steps: default_max_steps(),
        }
    }
}

fn default_max_steps() -> usize {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentsConfig {
    #[serde(default = "AgentProfile::solver")]
    pub solver: AgentProfile,
    #[serde(default = "AgentProfile::reviewer")]
    pub reviewer: AgentProfile,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            solver: AgentProfile::solver(),
            reviewer: AgentProfile::reviewer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubAgentConfig {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    #[serde(default = "default_coordinator_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_coordinator_steps")]
    pub max_steps: usize,
    #[serde(default = "default_solver_subagent")]
    pub solver: SubAgentConfig,
    #[serde(default = "default_reviewer_subagent")]
    pub reviewer: SubAgentConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_coordinator_prompt(),
            max_steps: default_coordinator_steps(),
            solver: default_solver_subagent(),
            reviewer: default_reviewer_subagent(),
        }
    }
}

fn default_coordinator_prompt() -> String {
    "You are a coordinator agent. Assign tasks to subagents and combine their results.".into()
}

fn default_coordinator_steps() -> usize {
    6
}

fn default_solver_subagent() -> SubAgentConfig {
    SubAgentConfig {
        name: "solver-agent".into(),
        description: "Solves math problems using MCP tools, but needs validation of results".into(),
    }
}

fn default_reviewer_subagent() -> SubAgentConfig {
    SubAgentConfig {
        name: "reviewer-agent".into(),
        description: "Validates and extends solver-agent outputs".into(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "warn,mathgraph=info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_mcp_servers")]
    pub mcp: BTreeMap<String, McpServerConfig>,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            mcp: default_mcp_servers(),
            agents: AgentsConfig::default(),
            coordinator: CoordinatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            MathGraphError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        toml::from_str(&raw)
            .map_err(|err| MathGraphError::Config(format!("failed to parse configuration: {err}")))
    }

    /// Load `.env` if present, then the config file named by `MATHGRAPH_CONFIG`
    /// (or `./mathgraph.toml` when it exists, or built-in defaults), then
    /// apply environment overrides.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!(path = %path.display(), "loaded environment file");
        }
        let mut cfg = match env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            Err(_) => Self::default(),
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(model) = env::var("MATHGRAPH_MODEL") {
            self.model.model = model;
        }
        if let Ok(endpoint) = env::var("MATHGRAPH_OPENAI_ENDPOINT") {
            self.model.base_url = Some(endpoint);
        }
        if let Ok(org) = env::var("MATHGRAPH_OPENAI_ORG") {
            self.model.organization = Some(org);
        }
        if let Ok(stream) = env::var("MATHGRAPH_STREAMING") {
            self.model.stream = parse_flag("MATHGRAPH_STREAMING", &stream)?;
        }
        if let Ok(filter) = env::var("MATHGRAPH_LOG") {
            self.logging.filter = filter;
        }
        if let Ok(json) = env::var("MATHGRAPH_LOG_JSON") {
            self.logging.json = parse_flag("MATHGRAPH_LOG_JSON", &json)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.provider != "openai" {
            return Err(MathGraphError::Config(format!(
                "unsupported model provider `{}` (only `openai` is available)",
                self.model.provider
            )));
        }
        if self.mcp.is_empty() {
            return Err(MathGraphError::Config(
                "at least one [mcp.<name>] tool server is required".into(),
            ));
        }
        if let Some((name, _)) = self.mcp.iter().find(|(_, s)| s.command.trim().is_empty()) {
            return Err(MathGraphError::Config(format!(
                "mcp server `{name}` has an empty command"
            )));
        }
        if self.coordinator.solver.name == self.coordinator.reviewer.name {
            return Err(MathGraphError::Config(format!(
                "coordinator sub-agents share the name `{}`",
                self.coordinator.solver.name
            )));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(MathGraphError::Config(format!(
            "{key} must be a boolean, got `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_the_math_pipeline() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.model.model, "gpt-4o-mini");
        assert_eq!(cfg.mcp["math"].command, DEFAULT_MCP_SERVER);
        assert_eq!(cfg.agents.solver.tools, Some(vec!["add".to_string()]));
        assert_eq!(cfg.agents.reviewer.tools, None);
        assert_eq!(cfg.coordinator.max_steps, 6);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[model]\nmodel='gpt-4o'\n\n[mcp.math]\ncommand='python'\nargs=['./mcp_server.py']\n\n[agents.solver]\nname='solver'\nsystem_prompt='Only add.'\ntools=['add']"
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).unwrap();

        assert_eq!(cfg.model.model, "gpt-4o");
        assert_eq!(cfg.model.provider, "openai");
        assert_eq!(cfg.mcp["math"].args, vec!["./mcp_server.py"]);
        assert_eq!(cfg.agents.solver.system_prompt, "Only add.");
        assert_eq!(cfg.agents.solver.max_steps, 6);
        assert_eq!(cfg.agents.reviewer, AgentProfile::reviewer());
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[model]\nmodel='gpt-4o'\napi_key='from-file'").unwrap();

        env::set_var("MATHGRAPH_MODEL", "gpt-4.1-mini");
        env::set_var("MATHGRAPH_STREAMING", "yes");
        let cfg = AppConfig::from_env_or_file(file.path());
        env::remove_var("MATHGRAPH_MODEL");
        env::remove_var("MATHGRAPH_STREAMING");

        let cfg = cfg.unwrap();
        assert_eq!(cfg.model.model, "gpt-4.1-mini");
        assert!(cfg.model.stream);
    }

    #[test]
    fn rejects_unknown_provider_and_bad_flags() {
        let mut cfg = AppConfig::default();
        cfg.model.provider = "cohere".into();
        assert!(matches!(cfg.validate(), Err(MathGraphError::Config(_))));

        assert!(parse_flag("X", "maybe").is_err());
        assert!(!parse_flag("X", " Off ").unwrap());
    }

    #[test]
    fn keeps_paths_and_unknown_programs_as_given() {
        let server = McpServerConfig {
            command: "./bin/definitely-not-a-sibling".into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        };
        assert_eq!(server.resolved_command(), "./bin/definitely-not-a-sibling");

        let bare = McpServerConfig {
            command: "definitely-not-a-sibling".into(),
            ..server
        };
        assert_eq!(bare.resolved_command(), "definitely-not-a-sibling");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = AppConfig::from_file("/nonexistent/mathgraph.toml").unwrap_err();
        assert!(matches!(err, MathGraphError::Config(_)));
    }
}
