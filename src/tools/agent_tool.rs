//! Agent-as-tool: a call forwards the task into another agent's decision loop

use crate::agent::Agent;
use crate::error::RecursionError;
use crate::events::{emit, AgentEvent};
use crate::tool::{AgentFrame, ParamKind, ParameterSchema, Tool, ToolContext, ToolDefinition, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type SharedAgent = Arc<Mutex<Agent>>;

#[derive(Debug, Deserialize)]
struct Args {
    task: String,
}

#[derive(Clone)]
pub struct AgentTool {
    id: Uuid,
    name: String,
    description: String,
    agent: SharedAgent,
}

impl AgentTool {
    pub fn from_agent(agent: Agent) -> Self {
        let description = if agent.config().description.is_empty() {
            format!("Delegate a task to the agent '{}'", agent.name())
        } else {
            agent.config().description.clone()
        };
        Self {
            id: agent.id(),
            name: agent.name().to_string(),
            description,
            agent: Arc::new(Mutex::new(agent)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn agent(&self) -> SharedAgent {
        self.agent.clone()
    }

    /// Refuse a call that would re-enter an agent already on the call path
    fn check_recursion(&self, ctx: &ToolContext) -> Result<(), RecursionError> {
        if ctx.call_stack.contains(self.id) {
            let stack = ctx.call_stack.push(AgentFrame {
                id: self.id,
                name: self.name.clone(),
            });
            return Err(RecursionError::Cycle {
                agent: self.name.clone(),
                stack: stack.render(),
            });
        }
        if ctx.call_stack.depth() >= ctx.max_depth {
            return Err(RecursionError::DepthExceeded {
                agent: self.name.clone(),
                depth: ctx.call_stack.depth(),
                max: ctx.max_depth,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            kind: ToolKind::Agent,
            parameters: ParameterSchema::new().required(
                "task",
                ParamKind::String,
                "Complete description of the task for this agent",
            ),
        }
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Agent
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        if let Err(e) = self.check_recursion(ctx) {
            tracing::warn!(agent = %self.name, stack = %ctx.call_stack.render(), error = %e, "Agent call refused");
            return ToolResult::error(e.to_string());
        }

        let Ok(mut agent) = self.agent.try_lock() else {
            return ToolResult::error(format!("Agent '{}' is busy with another task", self.name));
        };

        let parent = ctx
            .call_stack
            .frames()
            .last()
            .map(|f| f.name.clone())
            .unwrap_or_default();
        emit(
            agent.events(),
            AgentEvent::SubagentStart {
                parent: parent.clone(),
                subagent: self.name.clone(),
                task: args.task.clone(),
            },
        );

        let outcome = agent
            .run_with(&args.task, &ctx.call_stack, ctx.cancellation.child_token())
            .await;

        emit(
            agent.events(),
            AgentEvent::SubagentEnd {
                parent,
                subagent: self.name.clone(),
                completed: outcome.is_completed(),
            },
        );

        if outcome.is_completed() {
            ToolResult::success(outcome.to_text())
        } else {
            ToolResult::error(outcome.to_text())
        }
    }

    fn humanize(&self, args: &Value, result: &ToolResult) -> String {
        let task = args.get("task").and_then(|t| t.as_str()).unwrap_or("");
        let verb = if result.is_error { "failed" } else { "completed" };
        format!(
            "{} {}: {}",
            self.name,
            verb,
            crate::tool::truncate(task, 80)
        )
    }
}
