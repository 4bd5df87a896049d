//! Task complete tool - signals task completion

use crate::tool::{ParamKind, ParameterSchema, Tool, ToolContext, ToolDefinition, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;

pub const TASK_COMPLETE: &str = "task_complete";

#[derive(Debug, Deserialize)]
struct Args {
    summary: String,
}

pub struct TaskCompleteTool;

impl TaskCompleteTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TaskCompleteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TaskCompleteTool {
    fn name(&self) -> &str {
        TASK_COMPLETE
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TASK_COMPLETE.to_string(),
            description: "Call when the task is complete. The summary becomes the final answer."
                .to_string(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new().required(
                "summary",
                ParamKind::String,
                "The final answer, or a summary of what was accomplished",
            ),
        }
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        // The decision loop checks for this tool name and stops on success
        ToolResult::success(args.summary)
    }
}
