//! Runtime configuration for the mesh-agent binary
//!
//! Read from `mesh_agent.yaml` in the working directory when present; every
//! field has a default so a missing file is fine.
//!
//! ```yaml
//! llm:
//!   name: DeepSeek
//!   base_url: https://api.deepseek.com/v1
//!   api_key_env: DEEPSEEK_API_KEY
//!   default_model: deepseek-chat
//! telemetry:
//!   verbose: true
//! mailbox:
//!   root: .mailbox
//!   backend: notify
//! agents_dir: agents
//! ```

use crate::mailbox::{WatchBackend, DEFAULT_POLL_INTERVAL};
use crate::provider::ProviderConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "mesh_agent.yaml";

/// Default location for logs and the journal: `<data dir>/mesh_agent/logs`
pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("mesh_agent").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".mesh_logs"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider used by agents that don't name their own
    pub llm: ProviderConfig,

    /// Base for every relative path below and for agent work dirs
    pub working_dir: PathBuf,

    pub telemetry: TelemetryConfig,

    pub mailbox: MailboxConfig,

    /// Directory of per-agent YAML files
    pub agents_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_dir: PathBuf,

    /// Also log to the console
    pub verbose: bool,

    /// OTLP/HTTP collector, e.g. http://localhost:4318
    pub otel_endpoint: Option<String>,

    /// Record runs and actions in the SQLite journal
    pub journal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub root: PathBuf,
    pub backend: WatchBackend,
    pub poll_interval_ms: u64,
    /// How long `send --wait` blocks
    pub reply_timeout_secs: u64,
    /// JSON slash-command table
    pub commands_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: ProviderConfig::default(),
            working_dir: PathBuf::from("."),
            telemetry: TelemetryConfig::default(),
            mailbox: MailboxConfig::default(),
            agents_dir: None,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            verbose: false,
            otel_endpoint: None,
            journal: true,
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".mailbox"),
            backend: WatchBackend::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            reply_timeout_secs: 300,
            commands_file: None,
        }
    }
}

impl MailboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

impl Config {
    /// Load `path`, or `mesh_agent.yaml` under `working_dir` if it exists.
    ///
    /// Also loads `.env` so provider key variables can live there.
    pub fn load(path: Option<&Path>, working_dir: &Path) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Some(working_dir.join(CONFIG_FILE)).filter(|p| p.is_file()),
        };
        let mut config = match &path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_yaml::from_str::<Config>(&content)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => Config::default(),
        };

        if config.working_dir == Path::new(".") {
            config.working_dir = working_dir.to_path_buf();
        } else if config.working_dir.is_relative() {
            config.working_dir = working_dir.join(&config.working_dir);
        }
        Ok(config)
    }

    /// Resolve a path against the working directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    pub fn mailbox_root(&self) -> PathBuf {
        self.resolve(&self.mailbox.root)
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.telemetry.verbose = verbose;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.llm = self.llm.with_model(model);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(None, temp.path()).unwrap();
        assert_eq!(config.working_dir, temp.path());
        assert_eq!(config.mailbox_root(), temp.path().join(".mailbox"));
        assert!(config.telemetry.journal);
        assert_eq!(config.mailbox.poll_interval(), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_partial_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            "llm:\n  name: DeepSeek\n  base_url: https://api.deepseek.com/v1\n  api_key_env: DEEPSEEK_API_KEY\n  default_model: deepseek-chat\nmailbox:\n  backend: notify\n  root: mail\n",
        )
        .unwrap();

        let config = Config::load(None, temp.path()).unwrap();
        assert_eq!(config.llm.default_model, "deepseek-chat");
        assert_eq!(config.mailbox.backend, WatchBackend::Notify);
        assert_eq!(config.mailbox_root(), temp.path().join("mail"));
        assert_eq!(config.mailbox.reply_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.yaml");
        std::fs::write(&path, "mailbox: [unclosed").unwrap();
        assert!(Config::load(Some(&path), temp.path()).is_err());
    }
}
