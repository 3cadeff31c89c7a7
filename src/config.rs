use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use xdg::BaseDirectories;

use crate::agents::AgentRole;

/// Directory name for project-local configuration (`.mergeguard/`)
pub const LOCAL_DIR: &str = ".mergeguard";
pub const CONFIG_FILE: &str = "config.toml";
const APP_PREFIX: &str = "mergeguard";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: {value:?} (expected \"server\" or \"sequential\")")]
    InvalidEnv { var: &'static str, value: String },

    #[error("MISTRAL_API_KEY is not set")]
    MissingApiKey,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub mistral: MistralConfig,
    pub github: GitHubConfig,
    pub pipeline: PipelineConfig,
    pub agents: AgentsConfig,
    /// Custom prompt directory (relative paths resolve against the project root)
    pub prompt_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MistralConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for MistralConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mistral.ai".to_owned(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_owned(),
            timeout_secs: 30,
        }
    }
}

/// How control moves between the four agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffMode {
    /// Handoffs are wired on the agents and executed by the platform
    #[default]
    Server,
    /// Each agent runs in its own conversation, driven from here
    #[serde(alias = "client")]
    Sequential,
}

impl std::str::FromStr for HandoffMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "sequential" | "client" => Ok(Self::Sequential),
            other => Err(format!("unknown handoff mode: {}", other)),
        }
    }
}

impl fmt::Display for HandoffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Sequential => f.write_str("sequential"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub handoff_mode: HandoffMode,
    /// Per-stage timeout; the whole server-side chain gets four of these
    pub stage_timeout_secs: u64,
    /// Retries for transient HTTP failures (429 / 5xx / connect errors)
    pub max_retries: u32,
    /// Upper bound on function-call round trips within one conversation
    pub max_tool_rounds: u32,
    /// Re-run sequentially when the server-side chain fails before producing a report
    pub fallback_to_sequential: bool,
    /// Skip deleting the created agents at the end of a run
    pub keep_agents: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            handoff_mode: HandoffMode::Server,
            stage_timeout_secs: 300,
            max_retries: 2,
            max_tool_rounds: 32,
            fallback_to_sequential: true,
            keep_agents: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentOverride {
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    pub planner: AgentOverride,
    pub reviewer: AgentOverride,
    pub verifier: AgentOverride,
    pub reporter: AgentOverride,
}

impl AgentsConfig {
    pub fn get(&self, role: AgentRole) -> &AgentOverride {
        match role {
            AgentRole::Planner => &self.planner,
            AgentRole::Reviewer => &self.reviewer,
            AgentRole::Verifier => &self.verifier,
            AgentRole::Reporter => &self.reporter,
        }
    }

    fn get_mut(&mut self, role: AgentRole) -> &mut AgentOverride {
        match role {
            AgentRole::Planner => &mut self.planner,
            AgentRole::Reviewer => &mut self.reviewer,
            AgentRole::Verifier => &mut self.verifier,
            AgentRole::Reporter => &mut self.reporter,
        }
    }

    /// Model for `role`: override if set, otherwise the role's default.
    pub fn model_for(&self, role: AgentRole) -> String {
        self.get(role)
            .model
            .clone()
            .unwrap_or_else(|| role.default_model().to_owned())
    }

    pub fn temperature_for(&self, role: AgentRole) -> f32 {
        self.get(role)
            .temperature
            .unwrap_or_else(|| role.default_temperature())
    }

    /// Force one model for every agent
    pub fn set_model_all(&mut self, model: &str) {
        for role in AgentRole::ALL {
            self.get_mut(role).model = Some(model.to_owned());
        }
    }
}

impl Config {
    /// Load the global config merged with the project-local one.
    ///
    /// Resolution (later wins): defaults → `~/.config/mergeguard/config.toml`
    /// → `{project_root}/.mergeguard/config.toml`. Missing files are skipped.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let global = global_config_path();
        let local = project_root.join(LOCAL_DIR).join(CONFIG_FILE);
        Self::load_from(global.as_deref(), &local)
    }

    fn load_from(global: Option<&Path>, local: &Path) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for path in global.into_iter().chain(std::iter::once(local)) {
            if let Some(value) = read_toml(path)? {
                debug!(path = %path.display(), "loaded config layer");
                deep_merge(&mut merged, value);
            }
        }
        merged.try_into().map_err(|source| ConfigError::Parse {
            path: local.to_path_buf(),
            source,
        })
    }

    /// Apply `MERGEGUARD_MODEL` and `MERGEGUARD_HANDOFF_MODE` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("MERGEGUARD_MODEL").filter(|m| !m.trim().is_empty()) {
            self.agents.set_model_all(model.trim());
        }
        if let Some(mode) = lookup("MERGEGUARD_HANDOFF_MODE").filter(|m| !m.trim().is_empty()) {
            self.pipeline.handoff_mode =
                mode.parse().map_err(|_| ConfigError::InvalidEnv {
                    var: "MERGEGUARD_HANDOFF_MODE",
                    value: mode,
                })?;
        }
        Ok(())
    }
}

fn global_config_path() -> Option<PathBuf> {
    BaseDirectories::with_prefix(APP_PREFIX)
        .ok()
        .map(|dirs| dirs.get_config_home().join(CONFIG_FILE))
}

fn read_toml(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Merge `overlay` into `base`; tables merge key by key, everything else replaces.
fn deep_merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Walk up from the current directory to the nearest `.git`; falls back to cwd.
pub fn find_project_root() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_project_root_from(&cwd)
}

fn find_project_root_from(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .unwrap_or(start)
        .to_path_buf()
}

/// API credentials, read from the environment only.
#[derive(Clone)]
pub struct Secrets {
    pub mistral_api_key: String,
    pub github_token: Option<String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("mistral_api_key", &"<redacted>")
            .field(
                "github_token",
                &self.github_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mistral_api_key = non_empty("MISTRAL_API_KEY").ok_or(ConfigError::MissingApiKey)?;
        let github_token = non_empty("GITHUB_TOKEN");
        if github_token.is_none() {
            warn!("GITHUB_TOKEN is not set; GitHub requests are unauthenticated and rate limited");
        }
        Ok(Self {
            mistral_api_key,
            github_token,
        })
    }
}
