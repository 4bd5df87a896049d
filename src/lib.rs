//! mesh_agent - a runtime for knowledge-driven tool-using agents
//!
//! This crate provides:
//! - A knowledge index built from markdown files, injected on `@name` reference
//! - A tool registry of builtins, script tools and agents exposed as tools
//! - The decision loop that drives one agent run
//! - File mailboxes and a slash-command fast path between agents
//! - A CLI for running, serving and inspecting agents

pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod telemetry;
pub mod templates;

// Agent system
pub mod agent;
pub mod knowledge;
pub mod mailbox;
pub mod provider;
pub mod tool;
pub mod tools;

pub use config::Config;
pub use error::{ConfigurationError, KnowledgeParseError, RecursionError, ToolError, ValidationError};
pub use events::{AgentEvent, EventSender};
pub use telemetry::Telemetry;

pub use agent::{Agent, AgentConfig, AgentRuntime, RunOutcome, RunStatus};
pub use knowledge::{KnowledgeIndex, KnowledgeItem};
pub use mailbox::{CommandInterceptor, Mailbox, MailboxService};
pub use message::ContextMessage;
pub use provider::{DecisionProvider, ProviderClient, ProviderConfig, RawDecision, ScriptedProvider};
pub use tool::{Tool, ToolContext, ToolRegistry, ToolResult};
