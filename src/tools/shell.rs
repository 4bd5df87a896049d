//! Shell tool - runs a command through `bash -c` with a timeout

use crate::tool::{ParamKind, ParameterSchema, Tool, ToolContext, ToolDefinition, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
const MAX_TIMEOUT_SECS: u64 = 600;
const MAX_OUTPUT_LENGTH: usize = 30_000;

#[derive(Debug, Deserialize)]
struct Args {
    command: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

pub struct ShellTool {
    default_timeout: Duration,
}

impl ShellTool {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

/// Join stdout and stderr, truncating very long output
pub(crate) fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).to_string();
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    if combined.len() > MAX_OUTPUT_LENGTH {
        let cut = (0..=MAX_OUTPUT_LENGTH)
            .rev()
            .find(|i| combined.is_char_boundary(*i))
            .unwrap_or(0);
        combined.truncate(cut);
        combined.push_str("\n\n(Output truncated due to length limit)");
    }
    combined
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "shell".to_string(),
            description: format!(
                "Run a shell command in the working directory and return its combined output. \
                 Commands time out after {}s unless timeout_secs is given (max {}s).",
                self.default_timeout.as_secs(),
                MAX_TIMEOUT_SECS
            ),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new()
                .required("command", ParamKind::String, "The command to execute")
                .optional("timeout_secs", ParamKind::Integer, "Timeout in seconds", None),
        }
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        let timeout = args
            .timeout_secs
            .map(|t| Duration::from_secs(t.min(MAX_TIMEOUT_SECS)))
            .unwrap_or(self.default_timeout);

        let child = match Command::new("bash")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&ctx.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
        };

        let output = tokio::select! {
            biased;

            _ = ctx.cancellation.cancelled() => {
                return ToolResult::error("Command was cancelled");
            }

            _ = tokio::time::sleep(timeout) => {
                return ToolResult::error(format!("Command timed out after {}s", timeout.as_secs()));
            }

            result = child.wait_with_output() => {
                match result {
                    Ok(output) => output,
                    Err(e) => return ToolResult::error(format!("Failed to execute command: {}", e)),
                }
            }
        };

        let combined = combine_output(&output.stdout, &output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        if exit_code == 0 {
            ToolResult::success(combined)
        } else {
            ToolResult::error(format!("Command exited with code {}\n{}", exit_code, combined))
        }
    }

    fn humanize(&self, args: &serde_json::Value, result: &ToolResult) -> String {
        let command = args.get("command").and_then(|c| c.as_str()).unwrap_or("?");
        let command = crate::tool::truncate(command, 60);
        if result.is_error {
            format!("$ {} (failed)", command)
        } else {
            format!("$ {}", command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> ToolContext {
        ToolContext::new(PathBuf::from("/tmp"), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_shell_echo() {
        let result = ShellTool::default()
            .execute(json!({"command": "echo 'hello world'"}), &test_ctx())
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("hello world"));
    }

    #[tokio::test]
    async fn test_shell_exit_code() {
        let result = ShellTool::default()
            .execute(json!({"command": "exit 42"}), &test_ctx())
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("42"));
    }

    #[tokio::test]
    async fn test_shell_working_dir() {
        let result = ShellTool::default()
            .execute(json!({"command": "pwd"}), &test_ctx())
            .await;
        assert!(result.output.contains("/tmp"));
    }

    #[tokio::test]
    async fn test_shell_timeout() {
        let start = std::time::Instant::now();
        let result = ShellTool::default()
            .execute(json!({"command": "sleep 10", "timeout_secs": 1}), &test_ctx())
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_shell_cancellation() {
        let cancel = CancellationToken::new();
        let ctx = ToolContext::new(PathBuf::from("/tmp"), cancel.clone());

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let result = ShellTool::default()
            .execute(json!({"command": "sleep 10"}), &ctx)
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("cancelled"));
    }
}
