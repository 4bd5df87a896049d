//! Agent - long-lived owner of knowledge, tools and conversation
//!
//! Each `run` drives one `DecisionLoop`. A stateless agent starts every run
//! from a clean conversation; a stateful one keeps messages, loaded
//! knowledge and action history between runs.

use super::base::{DecisionLoop, LoopLimits, RunContext, RunOutcome};
use super::config::AgentConfig;
use super::prompt::SystemPromptContext;
use super::task::{Action, Task};
use crate::error::ConfigurationError;
use crate::events::EventSender;
use crate::knowledge::{KnowledgeIndex, LoadedKnowledge};
use crate::mailbox::Mailbox;
use crate::message::{render_transcript, ContextMessage};
use crate::provider::DecisionProvider;
use crate::telemetry::Telemetry;
use crate::templates::Templates;
use crate::tool::{AgentFrame, CallStack, ToolContext, ToolRegistry};
use crate::tools::{
    discover_scripts, register_builtins, CreateAgentTool, DeleteAgentTool, SendMessageTool, SpawnContext,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Process-wide sinks shared by an agent and every agent it creates
#[derive(Clone, Default)]
pub struct AgentRuntime {
    pub telemetry: Option<Arc<Telemetry>>,
    pub events: Option<EventSender>,
}

impl AgentRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }
}

pub struct Agent {
    id: Uuid,
    config: AgentConfig,
    provider: Arc<dyn DecisionProvider>,
    knowledge: Arc<KnowledgeIndex>,
    loaded: LoadedKnowledge,
    registry: ToolRegistry,
    conversation: Vec<ContextMessage>,
    history: Vec<Action>,
    tasks: Vec<Task>,
    templates: Arc<Templates>,
    runtime: AgentRuntime,
    children: Arc<Mutex<Vec<String>>>,
}

impl Agent {
    pub fn new(config: AgentConfig, provider: Arc<dyn DecisionProvider>) -> Result<Self, ConfigurationError> {
        Self::with_runtime(config, provider, AgentRuntime::default())
    }

    pub fn with_runtime(
        config: AgentConfig,
        provider: Arc<dyn DecisionProvider>,
        runtime: AgentRuntime,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let tools_dir = config.tools_dir();
        std::fs::create_dir_all(&tools_dir).map_err(|source| ConfigurationError::Directory {
            path: tools_dir.clone(),
            source,
        })?;

        let knowledge = KnowledgeIndex::build_with_level(&config.resolved_knowledge_files(), config.heading_level);
        if !knowledge.diagnostics().is_empty() {
            tracing::warn!(
                agent = %config.name,
                diagnostics = knowledge.diagnostics().len(),
                "Knowledge loaded with diagnostics"
            );
        }

        let templates = Templates::new()?;
        let registry = ToolRegistry::new();
        let shell_timeout = Duration::from_secs(config.shell_timeout_secs);
        register_builtins(&registry, shell_timeout);
        for script in discover_scripts(&tools_dir, shell_timeout) {
            registry.register(script);
        }

        let children = Arc::new(Mutex::new(Vec::new()));
        if config.allow_spawn {
            let spawn = SpawnContext {
                parent: config.name.clone(),
                registry: registry.downgrade(),
                provider: provider.clone(),
                template: config.clone(),
                runtime: runtime.clone(),
                children: children.clone(),
            };
            registry.register(CreateAgentTool::new(spawn.clone()));
            registry.register(DeleteAgentTool::new(spawn));
        }

        if let Some(root) = &config.mailbox_root {
            let root = config.resolve(root);
            let mailbox = Mailbox::open(&root, &config.name).map_err(|e| ConfigurationError::Load {
                path: root.clone(),
                reason: e.to_string(),
            })?;
            registry.register(SendMessageTool::new(mailbox));
        }

        tracing::info!(
            agent = %config.name,
            knowledge = knowledge.len(),
            tools = registry.len(),
            model = %provider.model(),
            "Agent created"
        );

        Ok(Self {
            id: Uuid::new_v4(),
            config,
            provider,
            knowledge: Arc::new(knowledge),
            loaded: LoadedKnowledge::new(),
            registry,
            conversation: Vec::new(),
            history: Vec::new(),
            tasks: Vec::new(),
            templates,
            runtime,
            children,
        })
    }

    /// Run a top-level task
    pub async fn run(&mut self, task: &str) -> RunOutcome {
        self.run_with(task, &CallStack::new(), CancellationToken::new()).await
    }

    /// Run a task as part of an existing call chain
    pub async fn run_with(&mut self, task: &str, call_stack: &CallStack, cancel: CancellationToken) -> RunOutcome {
        if !self.config.stateful {
            self.conversation.clear();
            self.loaded.clear();
            self.history.clear();
            self.tasks.clear();
        }

        let call_stack = call_stack.push(AgentFrame {
            id: self.id,
            name: self.config.name.clone(),
        });
        let tool_ctx = ToolContext::new(self.config.work_dir.clone(), cancel)
            .with_call_stack(call_stack)
            .with_max_depth(self.config.max_call_depth);

        let system_prompt = match SystemPromptContext::new(&self.config, &self.knowledge).render(&self.templates) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!(agent = %self.config.name, error = %e, "Failed to render system prompt");
                format!("You are {}.", self.config.name)
            }
        };

        let limits = LoopLimits::from(&self.config);
        let decision_loop = DecisionLoop::new(&self.config.name, self.provider.as_ref(), limits)
            .with_telemetry(self.runtime.telemetry.as_deref())
            .with_events(self.runtime.events.as_ref());
        let outcome = decision_loop
            .run(RunContext {
                task,
                system_prompt,
                messages: &mut self.conversation,
                knowledge: &self.knowledge,
                loaded: &mut self.loaded,
                templates: &self.templates,
                registry: &self.registry,
                history: &mut self.history,
                tool_ctx,
            })
            .await;

        self.tasks.push(outcome.task.clone());
        outcome
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn knowledge(&self) -> &KnowledgeIndex {
        &self.knowledge
    }

    /// Every action since the last reset
    pub fn history(&self) -> &[Action] {
        &self.history
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn conversation(&self) -> &[ContextMessage] {
        &self.conversation
    }

    pub fn transcript(&self) -> String {
        render_transcript(&self.conversation)
    }

    /// Names of agents created through create_agent and not yet deleted
    pub fn children(&self) -> Vec<String> {
        self.children.lock().clone()
    }

    pub fn events(&self) -> Option<&EventSender> {
        self.runtime.events.as_ref()
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{RawDecision, ScriptedProvider};
    use serde_json::json;
    use tempfile::TempDir;

    fn write(path: &std::path::Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_construction_registers_tools() {
        let temp = TempDir::new().unwrap();
        write(
            &temp.path().join(".agents/ops/tools/add.sh"),
            "echo $(($1 + $2))\n",
        );
        let config = AgentConfig::new("ops")
            .with_work_dir(temp.path())
            .with_mailbox_root(temp.path().join("mail"));
        let agent = Agent::new(config, Arc::new(ScriptedProvider::new([]))).unwrap();

        let names = agent.registry().names();
        for expected in ["read_file", "write_file", "shell", "task_complete", "add", "create_agent", "delete_agent", "send_message"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}: {names:?}");
        }
        assert!(temp.path().join("mail/ops").is_dir());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp = TempDir::new().unwrap();
        let config = AgentConfig::new("bad name").with_work_dir(temp.path());
        assert!(matches!(
            Agent::new(config, Arc::new(ScriptedProvider::new([]))),
            Err(ConfigurationError::InvalidName(_))
        ));

        let config = AgentConfig::new("ok")
            .with_work_dir(temp.path())
            .with_knowledge("missing.md");
        assert!(matches!(
            Agent::new(config, Arc::new(ScriptedProvider::new([]))),
            Err(ConfigurationError::MissingKnowledge(_))
        ));
    }

    #[tokio::test]
    async fn test_stateless_agent_resets_between_runs() {
        let temp = TempDir::new().unwrap();
        let provider = ScriptedProvider::new([RawDecision::finish("one"), RawDecision::finish("two")]);
        let config = AgentConfig::new("solo").with_work_dir(temp.path());
        let mut agent = Agent::new(config, Arc::new(provider)).unwrap();

        agent.run("first").await;
        let outcome = agent.run("second").await;
        assert_eq!(outcome.answer.as_deref(), Some("two"));
        assert!(!agent.transcript().contains("first"));
        assert_eq!(agent.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_stateful_agent_keeps_conversation() {
        let temp = TempDir::new().unwrap();
        let provider = ScriptedProvider::new([
            RawDecision::call("shell", json!({"command": "echo hi"})),
            RawDecision::finish("one"),
            RawDecision::finish("two"),
        ]);
        let config = AgentConfig::new("memo").with_work_dir(temp.path()).with_stateful(true);
        let mut agent = Agent::new(config, Arc::new(provider)).unwrap();

        agent.run("first").await;
        agent.run("second").await;
        let transcript = agent.transcript();
        assert!(transcript.contains("first"));
        assert!(transcript.contains("second"));
        assert_eq!(agent.history().len(), 1);
        assert_eq!(agent.tasks().len(), 2);
        let systems = agent
            .conversation()
            .iter()
            .filter(|m| matches!(m, ContextMessage::System { .. }))
            .count();
        assert_eq!(systems, 1);
    }

    #[tokio::test]
    async fn test_knowledge_injected_once_per_stateful_agent() {
        let temp = TempDir::new().unwrap();
        write(
            &temp.path().join("kb.md"),
            "# Support\n\n## concept @refunds\nRefunds take 5 days.\n",
        );
        let provider = ScriptedProvider::new([RawDecision::finish("a"), RawDecision::finish("b")]);
        let config = AgentConfig::new("support")
            .with_work_dir(temp.path())
            .with_knowledge("kb.md")
            .with_stateful(true);
        let mut agent = Agent::new(config, Arc::new(provider)).unwrap();

        let first = agent.run("How do @refunds work?").await;
        let second = agent.run("@refunds again?").await;
        assert_eq!(first.injected, vec!["refunds".to_string()]);
        assert!(second.injected.is_empty());
    }

    #[tokio::test]
    async fn test_stateful_working_memory_stays_in_window() {
        let temp = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::<Vec<ContextMessage>>::new()));
        let recorded = seen.clone();
        let mut n = 0;
        let provider = ScriptedProvider::from_fn(move |request| {
            recorded.lock().push(request.messages.to_vec());
            n += 1;
            if n % 5 == 0 {
                RawDecision::finish(format!("done {n}"))
            } else {
                RawDecision::call("shell", json!({ "command": format!("echo {n}") }))
            }
        });
        let config = AgentConfig::new("memo")
            .with_work_dir(temp.path())
            .with_stateful(true)
            .with_window_size(6);
        let mut agent = Agent::new(config, Arc::new(provider)).unwrap();

        for task in ["first", "second", "third"] {
            let outcome = agent.run(task).await;
            assert!(outcome.is_completed(), "{}", outcome.to_text());
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 15);
        for messages in seen.iter() {
            assert!(messages.len() <= 6, "{} messages offered", messages.len());
            assert!(matches!(messages[0], ContextMessage::System { .. }));
            for (i, message) in messages.iter().enumerate() {
                if let ContextMessage::Tool { call_id, .. } = message {
                    let paired = i > 0
                        && matches!(
                            &messages[i - 1],
                            ContextMessage::Assistant { tool_call: Some(call), .. } if &call.id == call_id
                        );
                    assert!(paired, "tool reply {call_id} without its call");
                }
            }
        }
        // the current task is never dropped
        assert!(seen[14].contains(&ContextMessage::user("third")));
        assert!(agent.conversation().len() <= 7);
        assert!(!agent.transcript().contains("[user]\nfirst"));
    }
}
