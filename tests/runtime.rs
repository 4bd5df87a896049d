//! End-to-end runs through the public API with a scripted provider

use async_trait::async_trait;
use mesh_agent::agent::{ActionKind, Agent, AgentConfig, AgentRuntime, FailureReason, RunStatus};
use mesh_agent::events::AgentEvent;
use mesh_agent::mailbox::{Mailbox, MailboxService, MessageKind};
use mesh_agent::provider::{RawDecision, ScriptedProvider};
use mesh_agent::tool::{
    ParamKind, ParameterSchema, Tool, ToolContext, ToolDefinition, ToolKind, ToolResult, WeakToolRegistry,
};
use mesh_agent::tools::AgentTool;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn write_tool(work_dir: &Path, agent: &str, file: &str, body: &str) {
    let dir = work_dir.join(".agents").join(agent).join("tools");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), body).unwrap();
}

#[tokio::test]
async fn test_add_then_echo() {
    let temp = TempDir::new().unwrap();
    write_tool(temp.path(), "calc", "add.sh", "# Add two integers\necho $(($1 + $2))\n");
    write_tool(temp.path(), "calc", "echo.sh", "# Print the arguments\necho \"$@\"\n");

    let provider = Arc::new(ScriptedProvider::new([
        RawDecision::call("add", json!({"args": "2 2"})),
        RawDecision::call("echo", json!({"args": "4"})),
        RawDecision::finish("The answer is 4"),
    ]));
    let config = AgentConfig::new("calc").with_work_dir(temp.path());
    let mut agent = Agent::new(config, provider.clone()).unwrap();

    let outcome = agent.run("What is 2 + 2? Echo the result.").await;
    assert!(outcome.is_completed(), "{}", outcome.to_text());
    assert_eq!(outcome.actions.len(), 2);
    assert_eq!(outcome.actions[0].tool, "add");
    assert_eq!(outcome.actions[0].result, "4");
    assert_eq!(outcome.actions[0].tool_kind, Some(ToolKind::Script));
    assert_eq!(outcome.actions[1].result, "4");
    assert!(agent.transcript().contains('4'));
    assert_eq!(provider.calls(), 3);
}

struct Add;

#[async_trait]
impl Tool for Add {
    fn name(&self) -> &str {
        "add"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "add".into(),
            description: "Add two integers".into(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new()
                .required("a", ParamKind::Integer, "First addend")
                .required("b", ParamKind::Integer, "Second addend"),
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        match (args["a"].as_i64(), args["b"].as_i64()) {
            (Some(a), Some(b)) => ToolResult::success((a + b).to_string()),
            _ => ToolResult::error("a and b must be integers"),
        }
    }
}

struct Echo;

#[async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "Repeat the text".into(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new().required("text", ParamKind::String, "Text to repeat"),
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::success(args["text"].as_str().unwrap_or_default())
    }
}

#[tokio::test]
async fn test_typed_add_then_echo() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new([
        RawDecision::call("add", json!({"a": 2, "b": "2"})),
        RawDecision::call("add", json!({"a": "two", "b": 2})),
        RawDecision::call("echo", json!({"text": 4})),
        RawDecision::finish("The answer is 4"),
    ]));
    let config = AgentConfig::new("typed").with_work_dir(temp.path());
    let mut agent = Agent::new(config, provider).unwrap();
    agent.registry().register(Add);
    agent.registry().register(Echo);

    let outcome = agent.run("What is 2 + 2? Echo the result.").await;
    assert!(outcome.is_completed(), "{}", outcome.to_text());
    assert_eq!(outcome.actions.len(), 3);

    // "2" is coerced to an integer
    assert_eq!(outcome.actions[0].kind, ActionKind::ToolCall);
    assert_eq!(outcome.actions[0].params, json!({"a": 2, "b": 2}));
    assert_eq!(outcome.actions[0].result, "4");

    // "two" is not, so the call never reaches the tool
    assert_eq!(outcome.actions[1].kind, ActionKind::Invalid);
    assert!(outcome.actions[1]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("parameter 'a' for 'add' must be integer")));

    assert_eq!(outcome.actions[2].params, json!({"text": "4"}));
    assert_eq!(outcome.actions[2].result, "4");
    assert_eq!(outcome.answer.as_deref(), Some("The answer is 4"));
}

#[tokio::test]
async fn test_round_budget() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::from_fn(|_| {
        RawDecision::call("shell", json!({"command": "echo still going"}))
    }));
    let config = AgentConfig::new("busy").with_work_dir(temp.path()).with_max_rounds(3);
    let mut agent = Agent::new(config, provider.clone()).unwrap();

    let outcome = agent.run("never finish").await;
    assert_eq!(
        outcome.status,
        RunStatus::Failed(FailureReason::BudgetExceeded { max_rounds: 3 })
    );
    assert_eq!(outcome.actions.len(), 3);
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn test_agent_calling_itself_is_refused() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new([
        RawDecision::call("echo_chamber", json!({"task": "again"})),
        RawDecision::finish("gave up on recursion"),
    ]));
    let config = AgentConfig::new("echo_chamber").with_work_dir(temp.path());
    let agent = Agent::new(config, provider).unwrap();

    let registry = agent.registry().clone();
    let tool = AgentTool::from_agent(agent);
    registry.add_tool(Arc::new(tool.clone()));

    let shared = tool.agent();
    let outcome = shared.lock().await.run("start").await;
    assert!(outcome.is_completed());
    assert_eq!(outcome.actions.len(), 1);
    assert!(!outcome.actions[0].success);
    assert!(outcome.actions[0].result.contains("recursive call refused"));
    assert!(outcome.actions[0].result.contains("echo_chamber -> echo_chamber"));
}

struct Greet;

#[async_trait]
impl Tool for Greet {
    fn name(&self) -> &str {
        "greet"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "greet".into(),
            description: "Say hello".into(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new(),
        }
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::success("hello")
    }
}

/// Adds `greet` on first call, removes it on the second
struct Toggle {
    registry: WeakToolRegistry,
}

#[async_trait]
impl Tool for Toggle {
    fn name(&self) -> &str {
        "toggle"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "toggle".into(),
            description: "Install or uninstall greet".into(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new(),
        }
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
        let Some(registry) = self.registry.upgrade() else {
            return ToolResult::error("registry gone");
        };
        if registry.remove_tool("greet").is_some() {
            ToolResult::success("removed greet")
        } else {
            registry.register(Greet);
            ToolResult::success("added greet")
        }
    }
}

#[tokio::test]
async fn test_registry_changes_apply_to_next_decision() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new([
        RawDecision::call("toggle", json!({})),
        RawDecision::call("greet", json!({})),
        RawDecision::call("toggle", json!({})),
        RawDecision::call("greet", json!({})),
        RawDecision::finish("done"),
    ]));
    let config = AgentConfig::new("dynamic").with_work_dir(temp.path());
    let mut agent = Agent::new(config, provider.clone()).unwrap();
    agent.registry().register(Toggle {
        registry: agent.registry().downgrade(),
    });

    let outcome = agent.run("play with tools").await;
    assert!(outcome.is_completed());

    let seen = provider.seen_tools();
    let offers_greet = |round: usize| seen[round].iter().any(|t| t == "greet");
    assert!(!offers_greet(0));
    assert!(offers_greet(1));
    assert!(offers_greet(2));
    assert!(!offers_greet(3));

    assert_eq!(outcome.actions[1].result, "hello");
    // greet was gone by round 4: the call is rejected, not executed
    assert_eq!(outcome.actions[3].kind, ActionKind::Invalid);
    assert!(outcome.actions[3]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("unknown tool 'greet'")));
}

#[tokio::test]
async fn test_agents_talk_through_mailboxes() {
    let temp = TempDir::new().unwrap();
    let mail = temp.path().join("mail");

    let bob_provider = Arc::new(ScriptedProvider::new([RawDecision::finish("pong")]));
    let bob = Agent::new(
        AgentConfig::new("bob").with_work_dir(temp.path()),
        bob_provider,
    )
    .unwrap();
    let service = MailboxService::new(bob, &mail)
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
    let bob_mailbox = service.mailbox().clone();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(service.run(shutdown.clone()));

    let alice_provider = Arc::new(ScriptedProvider::new([
        RawDecision::call("send_message", json!({"to": "bob", "content": "ping", "wait_secs": 5})),
        RawDecision::finish("bob answered"),
    ]));
    let mut alice = Agent::new(
        AgentConfig::new("alice")
            .with_work_dir(temp.path())
            .with_mailbox_root(&mail),
        alice_provider,
    )
    .unwrap();

    let outcome = alice.run("ask bob").await;
    shutdown.cancel();
    let stats = server.await.unwrap();

    assert!(outcome.is_completed(), "{}", outcome.to_text());
    assert_eq!(outcome.actions[0].result, "Reply from bob: pong");
    assert_eq!(stats.processed, 1);
    assert!(bob_mailbox.pending(MessageKind::Request).await.unwrap().is_empty());

    let alice_mailbox = Mailbox::open(&mail, "alice").unwrap();
    assert!(alice_mailbox.pending(MessageKind::Reply).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_call_and_delete_child() {
    let temp = TempDir::new().unwrap();
    // The child shares the parent's provider, so its decision sits in the
    // middle of the queue.
    let provider = Arc::new(ScriptedProvider::new([
        RawDecision::call("create_agent", json!({"name": "helper", "description": "Helps out"})),
        RawDecision::call("helper", json!({"task": "say hi"})),
        RawDecision::finish("hi from helper"),
        RawDecision::call("delete_agent", json!({"name": "helper"})),
        RawDecision::finish("done"),
    ]));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runtime = AgentRuntime::new().with_events(tx);
    let mut agent = Agent::with_runtime(
        AgentConfig::new("boss").with_work_dir(temp.path()),
        provider,
        runtime,
    )
    .unwrap();

    let outcome = agent.run("delegate a greeting").await;
    assert!(outcome.is_completed(), "{}", outcome.to_text());
    assert_eq!(outcome.actions.len(), 3);
    assert_eq!(outcome.actions[1].result, "hi from helper");
    assert_eq!(outcome.actions[1].tool_kind, Some(ToolKind::Agent));
    assert!(!agent.registry().contains("helper"));
    assert!(agent.children().is_empty());

    drop(agent);
    let mut created = false;
    let mut delegated = false;
    let mut deleted = false;
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::AgentCreated { child, .. } => created |= child == "helper",
            AgentEvent::SubagentStart { subagent, .. } => delegated |= subagent == "helper",
            AgentEvent::AgentDeleted { child, .. } => deleted |= child == "helper",
            _ => {}
        }
    }
    assert!(created && delegated && deleted);
}
