//! Write file tool - creates or overwrites a file, creating parent directories

use super::resolve_path;
use crate::tool::{ParamKind, ParameterSchema, Tool, ToolContext, ToolDefinition, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct Args {
    path: String,
    /// Strings are written as-is, anything else is pretty-printed JSON
    content: Value,
}

pub struct WriteFileTool;

impl WriteFileTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WriteFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write content to a file in the working directory, replacing it if it \
                          exists. Parent directories are created as needed."
                .to_string(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new()
                .required("path", ParamKind::String, "Path relative to the working directory")
                .required("content", ParamKind::String, "Full file content"),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let content = match args.content {
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
        };

        let path = match resolve_path(&ctx.working_dir, &args.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create {}: {}", parent.display(), e));
            }
        }

        match tokio::fs::write(&path, content.as_bytes()).await {
            Ok(()) => ToolResult::success(format!(
                "Wrote {} bytes to {}",
                content.len(),
                args.path
            )),
            Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
        }
    }

    fn humanize(&self, args: &Value, result: &ToolResult) -> String {
        let path = args.get("path").and_then(|p| p.as_str()).unwrap_or("?");
        if result.is_error {
            format!("write {} failed", path)
        } else {
            format!("wrote {}", path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), CancellationToken::new());
        let result = WriteFileTool::new()
            .execute(json!({"path": "out/deep/a.txt", "content": "hello"}), &ctx)
            .await;

        assert!(!result.is_error, "{}", result.output);
        let written = std::fs::read_to_string(temp.path().join("out/deep/a.txt")).unwrap();
        assert_eq!(written, "hello");
    }

    #[tokio::test]
    async fn test_write_refuses_escape() {
        let temp = TempDir::new().unwrap();
        let ctx = ToolContext::new(temp.path().join("inner"), CancellationToken::new());
        let result = WriteFileTool::new()
            .execute(json!({"path": "../escape.txt", "content": "x"}), &ctx)
            .await;
        assert!(result.is_error);
        assert!(!temp.path().join("escape.txt").exists());
    }
}
