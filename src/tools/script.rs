//! External script tools
//!
//! Scripts live in an agent's `tools/` directory. The interpreter is picked
//! from the extension: `.py` runs under python3, `.sh` under bash, anything
//! else is executed directly.

use super::shell::combine_output;
use crate::error::ToolError;
use crate::tool::{ParamKind, ParameterSchema, Tool, ToolContext, ToolDefinition, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Program and leading arguments used to run `path`
fn interpreter(path: &Path) -> (PathBuf, Vec<PathBuf>) {
    match path.extension().and_then(|e| e.to_str()) {
        Some("py") => (PathBuf::from("python3"), vec![path.to_path_buf()]),
        Some("sh") => (PathBuf::from("bash"), vec![path.to_path_buf()]),
        _ => (path.to_path_buf(), Vec::new()),
    }
}

/// Run a script to completion and return its trimmed stdout.
///
/// A non-zero exit is an error carrying the combined output.
pub async fn run_script(
    path: &Path,
    args: &[String],
    working_dir: &Path,
    timeout: Duration,
    cancellation: &CancellationToken,
) -> Result<String, ToolError> {
    let (program, prefix) = interpreter(path);
    let child = Command::new(&program)
        .args(&prefix)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::Spawn {
            program: program.display().to_string(),
            reason: e.to_string(),
        })?;

    let output = tokio::select! {
        biased;
        _ = cancellation.cancelled() => return Err(ToolError::Cancelled),
        _ = tokio::time::sleep(timeout) => return Err(ToolError::Timeout(timeout)),
        result = child.wait_with_output() => result.map_err(|e| ToolError::Io {
            path: path.to_path_buf(),
            source: e,
        })?,
    };

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(ToolError::NonZeroExit {
            code: output.status.code().unwrap_or(-1),
            output: combine_output(&output.stdout, &output.stderr),
        })
    }
}

/// First comment line of a script, skipping the shebang
pub fn script_description(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content
        .lines()
        .filter(|l| !l.starts_with("#!"))
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.strip_prefix('#'))
        .map(|l| l.trim().trim_start_matches("description:").trim().to_string())
        .filter(|l| !l.is_empty())
}

#[derive(Debug, Deserialize)]
struct Args {
    #[serde(default)]
    args: String,
}

/// A script exposed as a tool
pub struct ScriptTool {
    name: String,
    description: String,
    path: PathBuf,
    timeout: Duration,
}

impl ScriptTool {
    pub fn new(name: impl Into<String>, path: PathBuf, timeout: Duration) -> Self {
        let description = script_description(&path)
            .unwrap_or_else(|| format!("Run the script {}", path.display()));
        Self {
            name: name.into(),
            description,
            path,
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Tool for ScriptTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            kind: ToolKind::Script,
            parameters: ParameterSchema::new().optional(
                "args",
                ParamKind::String,
                "Whitespace-separated arguments passed to the script",
                Some(json!("")),
            ),
        }
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Script
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };
        let argv: Vec<String> = args.args.split_whitespace().map(String::from).collect();
        tracing::debug!(script = %self.path.display(), ?argv, "Running script tool");
        run_script(&self.path, &argv, &ctx.working_dir, self.timeout, &ctx.cancellation)
            .await
            .into()
    }
}

/// Scripts found directly inside `dir`, sorted by file name
pub fn discover_scripts(dir: &Path, timeout: Duration) -> Vec<ScriptTool> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
        })
        .collect();
    paths.sort();

    paths
        .into_iter()
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?;
            let name: String = stem
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
                .collect();
            Some(ScriptTool::new(name, path, timeout))
        })
        .collect()
}
