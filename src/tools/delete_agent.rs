//! delete_agent - drop a child agent this agent created

use super::create_agent::SpawnContext;
use crate::events::{emit, AgentEvent};
use crate::tool::{ParamKind, ParameterSchema, Tool, ToolContext, ToolDefinition, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

pub const DELETE_AGENT: &str = "delete_agent";

#[derive(Debug, Deserialize)]
struct Args {
    name: String,
}

pub struct DeleteAgentTool {
    spawn: SpawnContext,
}

impl DeleteAgentTool {
    pub fn new(spawn: SpawnContext) -> Self {
        Self { spawn }
    }
}

#[async_trait]
impl Tool for DeleteAgentTool {
    fn name(&self) -> &str {
        DELETE_AGENT
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: DELETE_AGENT.to_string(),
            description: "Remove an agent you created earlier with create_agent".to_string(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new().required("name", ParamKind::String, "Name of the agent to delete"),
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        if !self.spawn.children.lock().contains(&args.name) {
            return ToolResult::error(format!("'{}' is not an agent created by this agent", args.name));
        }
        let Some(registry) = self.spawn.registry.upgrade() else {
            return ToolResult::error("Parent agent no longer exists");
        };

        registry.remove_tool(&args.name);
        self.spawn.children.lock().retain(|child| child != &args.name);

        tracing::info!(parent = %self.spawn.parent, child = %args.name, "Agent deleted");
        emit(
            self.spawn.runtime.events.as_ref(),
            AgentEvent::AgentDeleted {
                parent: self.spawn.parent.clone(),
                child: args.name.clone(),
            },
        );
        ToolResult::success(format!("Deleted agent '{}'", args.name))
    }
}
