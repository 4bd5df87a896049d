//! Agent event types
//!
//! Emitted by the decision loop and agent tools on an optional channel and
//! consumed by output adapters (the CLI renderer, tests).

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;

/// Events emitted during agent execution
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    // === Run Lifecycle ===
    RunStart {
        agent: String,
        run_id: Uuid,
        task: String,
        depth: usize,
    },
    RunComplete {
        agent: String,
        run_id: Uuid,
        /// "completed" or the failure reason
        status: String,
        rounds: usize,
        answer: Option<String>,
    },

    // === Knowledge ===
    KnowledgeInjected {
        agent: String,
        items: Vec<String>,
    },

    // === Decisions ===
    StepStart {
        agent: String,
        step: String,
    },
    /// Assistant text accompanying a tool call
    Thought {
        agent: String,
        text: String,
    },
    /// A decision that could not be acted on; the error is fed back
    DecisionRejected {
        agent: String,
        round: usize,
        error: String,
    },

    // === Tool Execution ===
    ToolCallStart {
        agent: String,
        call_id: String,
        tool: String,
        arguments: serde_json::Value,
    },
    ToolCallEnd {
        agent: String,
        call_id: String,
        tool: String,
        output: String,
        is_error: bool,
        duration_ms: u64,
    },

    // === Agent Management ===
    SubagentStart {
        parent: String,
        subagent: String,
        task: String,
    },
    SubagentEnd {
        parent: String,
        subagent: String,
        completed: bool,
    },
    AgentCreated {
        parent: String,
        child: String,
    },
    AgentDeleted {
        parent: String,
        child: String,
    },
}

impl AgentEvent {
    /// Name of the agent this event is about
    pub fn agent(&self) -> &str {
        match self {
            AgentEvent::RunStart { agent, .. }
            | AgentEvent::RunComplete { agent, .. }
            | AgentEvent::KnowledgeInjected { agent, .. }
            | AgentEvent::StepStart { agent, .. }
            | AgentEvent::Thought { agent, .. }
            | AgentEvent::DecisionRejected { agent, .. }
            | AgentEvent::ToolCallStart { agent, .. }
            | AgentEvent::ToolCallEnd { agent, .. } => agent,
            AgentEvent::SubagentStart { parent, .. }
            | AgentEvent::SubagentEnd { parent, .. }
            | AgentEvent::AgentCreated { parent, .. }
            | AgentEvent::AgentDeleted { parent, .. } => parent,
        }
    }
}

/// Send if a channel is attached; a closed receiver is not an error
pub fn emit(events: Option<&EventSender>, event: AgentEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
