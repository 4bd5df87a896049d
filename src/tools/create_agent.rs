//! create_agent - build a child agent and expose it as a tool

use super::agent_tool::AgentTool;
use crate::agent::{is_valid_name, Agent, AgentConfig, AgentRuntime};
use crate::events::{emit, AgentEvent};
use crate::provider::{DecisionProvider, ProviderClient};
use crate::tool::{
    ParamKind, ParameterSchema, Tool, ToolContext, ToolDefinition, ToolKind, ToolResult, WeakToolRegistry,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

pub const CREATE_AGENT: &str = "create_agent";

/// What a parent shares with the agent-management tools in its registry
#[derive(Clone)]
pub struct SpawnContext {
    pub parent: String,
    pub registry: WeakToolRegistry,
    pub provider: Arc<dyn DecisionProvider>,
    /// Parent config; children start from a copy of it
    pub template: AgentConfig,
    pub runtime: AgentRuntime,
    /// Names of agents this parent created and may delete
    pub children: Arc<Mutex<Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct Args {
    name: String,
    description: String,
    #[serde(default)]
    knowledge_files: Vec<String>,
    max_rounds: Option<usize>,
    #[serde(default)]
    stateful: bool,
    model: Option<String>,
    #[serde(default)]
    inherit_tools: Vec<String>,
}

pub struct CreateAgentTool {
    spawn: SpawnContext,
}

impl CreateAgentTool {
    pub fn new(spawn: SpawnContext) -> Self {
        Self { spawn }
    }

    fn child_config(&self, args: &Args) -> AgentConfig {
        let mut config = self.spawn.template.clone();
        config.name = args.name.clone();
        config.description = args.description.clone();
        config.knowledge_files = args.knowledge_files.iter().map(PathBuf::from).collect();
        config.stateful = args.stateful;
        config.home_dir = None;
        if let Some(max_rounds) = args.max_rounds {
            config.max_rounds = max_rounds;
        }
        if let Some(model) = &args.model {
            config.provider = config.provider.with_model(model);
        }
        config
    }

    fn child_provider(&self, config: &AgentConfig) -> Result<Arc<dyn DecisionProvider>, String> {
        if config.provider == self.spawn.template.provider {
            return Ok(self.spawn.provider.clone());
        }
        ProviderClient::new(config.provider.clone())
            .map(|client| Arc::new(client) as Arc<dyn DecisionProvider>)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Tool for CreateAgentTool {
    fn name(&self) -> &str {
        CREATE_AGENT
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: CREATE_AGENT.to_string(),
            description: "Create a child agent with its own knowledge and tools. The new agent becomes a tool you can call with a task.".to_string(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new()
                .required("name", ParamKind::String, "Agent name: letters, digits, '_' or '-'")
                .required("description", ParamKind::String, "What the agent is for; shown as its tool description")
                .optional("knowledge_files", ParamKind::Array, "Knowledge files or directories for the agent", Some(json!([])))
                .optional("max_rounds", ParamKind::Integer, "Round budget per task", None)
                .optional("stateful", ParamKind::Boolean, "Keep conversation between tasks", Some(json!(false)))
                .optional("model", ParamKind::String, "Model id, defaults to your own", None)
                .optional("inherit_tools", ParamKind::Array, "Names of your tools to share with the agent", Some(json!([]))),
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };
        if !is_valid_name(&args.name) {
            return ToolResult::error(format!(
                "Invalid agent name '{}': use letters, digits, '_' or '-'",
                args.name
            ));
        }
        let Some(registry) = self.spawn.registry.upgrade() else {
            return ToolResult::error("Parent agent no longer exists");
        };
        if registry.contains(&args.name) {
            return ToolResult::error(format!("A tool named '{}' already exists", args.name));
        }

        let mut inherited = Vec::with_capacity(args.inherit_tools.len());
        for name in &args.inherit_tools {
            match registry.get(name) {
                Some(tool) => inherited.push(tool),
                None => return ToolResult::error(format!("Cannot inherit unknown tool '{}'", name)),
            }
        }

        let config = self.child_config(&args);
        let provider = match self.child_provider(&config) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Cannot create agent '{}': {}", args.name, e)),
        };
        let child = match Agent::with_runtime(config, provider, self.spawn.runtime.clone()) {
            Ok(child) => child,
            Err(e) => return ToolResult::error(format!("Cannot create agent '{}': {}", args.name, e)),
        };
        for tool in inherited {
            child.registry().add_tool(tool);
        }
        let tool_count = child.registry().len();

        registry.add_tool(Arc::new(AgentTool::from_agent(child)));
        self.spawn.children.lock().push(args.name.clone());

        tracing::info!(parent = %self.spawn.parent, child = %args.name, tools = tool_count, "Agent created");
        emit(
            self.spawn.runtime.events.as_ref(),
            AgentEvent::AgentCreated {
                parent: self.spawn.parent.clone(),
                child: args.name.clone(),
            },
        );

        ToolResult::success(format!(
            "Created agent '{}' with {} tools. Call it as a tool with {{\"task\": \"...\"}}.",
            args.name, tool_count
        ))
    }
}
