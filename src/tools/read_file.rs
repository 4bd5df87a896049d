//! Read file tool - reads file contents with line numbering

use super::resolve_path;
use crate::tool::{ParamKind, ParameterSchema, Tool, ToolContext, ToolDefinition, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_LINE_LIMIT: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;
const BINARY_CHECK_SIZE: usize = 8192;

#[derive(Debug, Deserialize)]
struct Args {
    path: String,
    /// 1-indexed first line
    offset: usize,
    limit: usize,
}

pub struct ReadFileTool;

impl ReadFileTool {
    pub fn new() -> Self {
        Self
    }

    fn is_binary(bytes: &[u8]) -> bool {
        bytes[..bytes.len().min(BINARY_CHECK_SIZE)].contains(&0)
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a text file from the working directory. Lines are numbered \
                          starting at 1. Use offset and limit to page through long files."
                .to_string(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new()
                .required("path", ParamKind::String, "Path relative to the working directory")
                .optional("offset", ParamKind::Integer, "First line to read (1-indexed)", Some(json!(1)))
                .optional(
                    "limit",
                    ParamKind::Integer,
                    "Maximum number of lines to read",
                    Some(json!(DEFAULT_LINE_LIMIT)),
                ),
        }
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let path = match resolve_path(&ctx.working_dir, &args.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        if !path.is_file() {
            return ToolResult::error(format!("File not found: {}", args.path));
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        if Self::is_binary(&bytes) {
            return ToolResult::error(format!("Binary file cannot be read as text: {}", args.path));
        }

        let content = String::from_utf8_lossy(&bytes);
        if content.is_empty() {
            return ToolResult::success("Warning: File exists but has empty contents");
        }

        let offset = args.offset.saturating_sub(1);
        let lines: Vec<String> = content
            .lines()
            .enumerate()
            .skip(offset)
            .take(args.limit)
            .map(|(idx, line)| {
                let line: String = line.chars().take(MAX_LINE_LENGTH).collect();
                format!("{:6}\t{}", idx + 1, line)
            })
            .collect();

        if lines.is_empty() {
            return ToolResult::error(format!(
                "Offset {} is past the end of {} ({} lines)",
                args.offset,
                args.path,
                content.lines().count()
            ));
        }

        ToolResult::success(lines.join("\n"))
    }
}
