//! Slash-command fast path
//!
//! A request whose content is `/name args...` and names a registered command
//! runs that command's script directly, without a decision loop. Anything
//! else falls through to the agent.

use crate::tools::script::run_script;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

fn command_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]*$").expect("static regex"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub script: PathBuf,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intercept {
    /// The command ran; this text is the reply
    Handled(String),
    /// Not a fast-path command
    Unhandled,
}

/// A parsed `/name args...` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashCommand<'a> {
    pub name: &'a str,
    pub args: Vec<String>,
}

pub struct CommandInterceptor {
    commands: IndexMap<String, CommandEntry>,
    working_dir: PathBuf,
    timeout: Duration,
    table_path: Option<PathBuf>,
}

impl CommandInterceptor {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            commands: IndexMap::new(),
            working_dir: working_dir.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            table_path: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load the command table from JSON; a missing file is an empty table.
    ///
    /// Usage counts are written back to the same file.
    pub fn load(working_dir: impl Into<PathBuf>, path: &Path) -> anyhow::Result<Self> {
        let mut interceptor = Self::new(working_dir);
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            interceptor.commands = serde_json::from_str(&content)?;
        }
        interceptor.table_path = Some(path.to_path_buf());
        tracing::info!(
            path = %path.display(),
            commands = interceptor.commands.len(),
            "Loaded slash commands"
        );
        Ok(interceptor)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.commands)?)?;
        Ok(())
    }

    pub fn register(
        &mut self,
        name: &str,
        script: impl Into<PathBuf>,
        description: impl Into<String>,
    ) -> anyhow::Result<()> {
        if !command_name_re().is_match(name) {
            anyhow::bail!("invalid command name '{}'", name);
        }
        self.commands.insert(
            name.to_string(),
            CommandEntry {
                script: script.into(),
                description: description.into(),
                usage_count: 0,
                last_used: None,
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<CommandEntry> {
        self.commands.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&CommandEntry> {
        self.commands.get(name)
    }

    pub fn commands(&self) -> impl Iterator<Item = (&String, &CommandEntry)> {
        self.commands.iter()
    }

    pub fn parse(message: &str) -> Option<SlashCommand<'_>> {
        let rest = message.trim().strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let name = parts.next()?;
        if !command_name_re().is_match(name) {
            return None;
        }
        Some(SlashCommand {
            name,
            args: parts.map(str::to_string).collect(),
        })
    }

    /// Run `message` as a command if it is one we know.
    ///
    /// A script failure is still `Handled`: the error text is the reply.
    pub async fn intercept(&mut self, message: &str, cancel: &CancellationToken) -> Intercept {
        let Some(command) = Self::parse(message) else {
            return Intercept::Unhandled;
        };
        let Some(entry) = self.commands.get_mut(command.name) else {
            tracing::debug!(command = command.name, "Unknown slash command, passing to agent");
            return Intercept::Unhandled;
        };
        let script = if entry.script.is_absolute() {
            entry.script.clone()
        } else {
            self.working_dir.join(&entry.script)
        };
        if !script.is_file() {
            tracing::warn!(
                command = command.name,
                script = %script.display(),
                "Slash command script missing, passing to agent"
            );
            return Intercept::Unhandled;
        }

        entry.usage_count += 1;
        entry.last_used = Some(Utc::now());

        let result = run_script(&script, &command.args, &self.working_dir, self.timeout, cancel).await;
        tracing::info!(
            command = command.name,
            args = ?command.args,
            success = result.is_ok(),
            "Slash command handled"
        );

        if let Some(path) = &self.table_path {
            if let Err(e) = self.save(path) {
                tracing::warn!(error = %e, "Failed to save slash command usage");
            }
        }

        Intercept::Handled(match result {
            Ok(output) => output,
            Err(e) => format!("Command /{} failed: {}", command.name, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_parse() {
        let cmd = CommandInterceptor::parse("  /add 2 3 ").unwrap();
        assert_eq!(cmd.name, "add");
        assert_eq!(cmd.args, vec!["2", "3"]);
        assert!(CommandInterceptor::parse("add 2 3").is_none());
        assert!(CommandInterceptor::parse("/").is_none());
        assert!(CommandInterceptor::parse("/../x").is_none());
        assert!(CommandInterceptor::parse("/usr/bin/env").is_none());
    }

    #[tokio::test]
    async fn test_registered_command_runs_script() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "add.sh", "echo $(($1 + $2))\n");
        let mut interceptor = CommandInterceptor::new(temp.path());
        interceptor.register("add", &script, "Add two numbers").unwrap();

        let cancel = CancellationToken::new();
        assert_eq!(
            interceptor.intercept("/add 2 2", &cancel).await,
            Intercept::Handled("4".into())
        );
        assert_eq!(interceptor.get("add").unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn test_fails_open() {
        let temp = TempDir::new().unwrap();
        let mut interceptor = CommandInterceptor::new(temp.path());
        interceptor
            .register("gone", temp.path().join("missing.sh"), "")
            .unwrap();
        let cancel = CancellationToken::new();

        assert_eq!(interceptor.intercept("hello", &cancel).await, Intercept::Unhandled);
        assert_eq!(interceptor.intercept("/nope", &cancel).await, Intercept::Unhandled);
        assert_eq!(interceptor.intercept("/gone", &cancel).await, Intercept::Unhandled);
    }

    #[tokio::test]
    async fn test_script_failure_is_handled_with_error_text() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "fail.sh", "echo broken >&2\nexit 3\n");
        let mut interceptor = CommandInterceptor::new(temp.path());
        interceptor.register("fail", &script, "").unwrap();

        match interceptor.intercept("/fail", &CancellationToken::new()).await {
            Intercept::Handled(text) => {
                assert!(text.starts_with("Command /fail failed"));
                assert!(text.contains("broken"));
            }
            Intercept::Unhandled => panic!("expected handled"),
        }
    }

    #[test]
    fn test_table_save_and_load() {
        let temp = TempDir::new().unwrap();
        let table = temp.path().join("commands.json");
        let mut interceptor = CommandInterceptor::new(temp.path());
        interceptor.register("report", "tools/report.py", "Daily report").unwrap();
        assert!(interceptor.register("bad name", "x", "").is_err());
        interceptor.save(&table).unwrap();

        let loaded = CommandInterceptor::load(temp.path(), &table).unwrap();
        let entry = loaded.get("report").unwrap();
        assert_eq!(entry.script, PathBuf::from("tools/report.py"));
        assert_eq!(entry.description, "Daily report");

        let empty = CommandInterceptor::load(temp.path(), &temp.path().join("none.json")).unwrap();
        assert_eq!(empty.commands().count(), 0);
    }
}
