//! Agent construction parameters
//!
//! Agents can be built in code or loaded from YAML files, one agent per
//! file, keyed by file stem:
//!
//! ```yaml
//! description: Answers questions about orders
//! provider:
//!   name: DeepSeek
//!   base_url: https://api.deepseek.com/v1
//!   api_key_env: DEEPSEEK_API_KEY
//!   default_model: deepseek-chat
//! knowledge_files: [knowledge/orders]
//! max_rounds: 30
//! stateful: true
//! ```

use crate::error::ConfigurationError;
use crate::knowledge::DEFAULT_HEADING_LEVEL;
use crate::provider::ProviderConfig;
use crate::tool::DEFAULT_MAX_CALL_DEPTH;
use crate::tools::shell::DEFAULT_TIMEOUT_SECS;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_rounds() -> usize {
    50
}

fn default_retry_threshold() -> usize {
    3
}

fn default_max_result_chars() -> usize {
    2000
}

fn default_window_size() -> usize {
    50
}

fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

fn default_heading_level() -> usize {
    DEFAULT_HEADING_LEVEL
}

fn default_shell_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique within a registry; also the mailbox directory name
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Files or directories, relative paths resolve against `work_dir`
    #[serde(default)]
    pub knowledge_files: Vec<PathBuf>,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Keep conversation and history across runs
    #[serde(default)]
    pub stateful: bool,
    /// Identical consecutive failures tolerated before giving up
    #[serde(default = "default_retry_threshold")]
    pub retry_threshold: usize,
    /// Tool output kept per recorded action
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    /// Messages kept in working memory before each decision, 0 for no limit
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    #[serde(default = "default_heading_level")]
    pub heading_level: usize,
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    /// Per-agent directory holding `tools/`; defaults to `work_dir/.agents/<name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<PathBuf>,
    /// Register create_agent / delete_agent
    #[serde(default = "default_true")]
    pub allow_spawn: bool,
    /// Register send_message against this mailbox root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailbox_root: Option<PathBuf>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            work_dir: default_work_dir(),
            provider: ProviderConfig::default(),
            knowledge_files: Vec::new(),
            max_rounds: default_max_rounds(),
            stateful: false,
            retry_threshold: default_retry_threshold(),
            max_result_chars: default_max_result_chars(),
            window_size: default_window_size(),
            max_call_depth: default_max_call_depth(),
            heading_level: default_heading_level(),
            shell_timeout_secs: default_shell_timeout(),
            home_dir: None,
            allow_spawn: true,
            mailbox_root: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_knowledge(mut self, path: impl Into<PathBuf>) -> Self {
        self.knowledge_files.push(path.into());
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    pub fn with_retry_threshold(mut self, retry_threshold: usize) -> Self {
        self.retry_threshold = retry_threshold;
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_mailbox_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mailbox_root = Some(root.into());
        self
    }

    pub fn with_spawn(mut self, allow_spawn: bool) -> Self {
        self.allow_spawn = allow_spawn;
        self
    }

    pub fn home_dir(&self) -> PathBuf {
        self.home_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join(".agents").join(&self.name))
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.home_dir().join("tools")
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    pub fn resolved_knowledge_files(&self) -> Vec<PathBuf> {
        self.knowledge_files.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !is_valid_name(&self.name) {
            return Err(ConfigurationError::InvalidName(self.name.clone()));
        }
        let positive = [
            ("max_rounds", self.max_rounds),
            ("retry_threshold", self.retry_threshold),
            ("max_result_chars", self.max_result_chars),
            ("max_call_depth", self.max_call_depth),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::InvalidField {
                    field,
                    reason: "must be at least 1".into(),
                });
            }
        }
        if !(1..=6).contains(&self.heading_level) {
            return Err(ConfigurationError::InvalidField {
                field: "heading_level",
                reason: format!("{} is not a markdown heading level", self.heading_level),
            });
        }
        if self.provider.default_model.trim().is_empty() {
            return Err(ConfigurationError::InvalidField {
                field: "provider.default_model",
                reason: "must not be empty".into(),
            });
        }
        for path in self.resolved_knowledge_files() {
            if !path.exists() {
                return Err(ConfigurationError::MissingKnowledge(path));
            }
        }
        Ok(())
    }
}

/// Names double as directory names and tool names
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= 64
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Load every `*.yaml` / `*.yml` in `dir`, keyed by file stem.
///
/// Files that fail to parse are skipped with a warning.
pub fn load_agent_configs(dir: &Path) -> IndexMap<String, AgentConfig> {
    let mut configs = IndexMap::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return configs;
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        let ext = path.extension().and_then(|e| e.to_str());
        if !matches!(ext, Some("yaml") | Some("yml")) {
            continue;
        }
        match load_config_file(&path) {
            Ok(config) => {
                configs.insert(config.name.clone(), config);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping agent config");
            }
        }
    }
    configs
}

/// Load a single agent config; the name defaults to the file stem
pub fn load_config_file(path: &Path) -> Result<AgentConfig, ConfigurationError> {
    let load_err = |reason: String| ConfigurationError::Load {
        path: path.to_path_buf(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
    let mut config: AgentConfig =
        serde_yaml::from_str(&content).map_err(|e| load_err(e.to_string()))?;
    if config.name.is_empty() {
        config.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
    }
    Ok(config)
}

pub fn save_config_file(path: &Path, config: &AgentConfig) -> Result<(), ConfigurationError> {
    let save_err = |reason: String| ConfigurationError::Load {
        path: path.to_path_buf(),
        reason,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| save_err(e.to_string()))?;
    }
    let content = serde_yaml::to_string(config).map_err(|e| save_err(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| save_err(e.to_string()))
}
