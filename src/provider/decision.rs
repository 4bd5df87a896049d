//! The decision boundary between the loop and whatever produces decisions

use crate::message::ContextMessage;
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{env} not found in environment or auth.json")]
    MissingApiKey { env: String },

    #[error("failed to build request: {0}")]
    Build(String),

    #[error("API call failed after {attempts} attempt(s): {message}")]
    Request { attempts: usize, message: String },

    #[error("provider returned no choices")]
    EmptyResponse,

    #[error("no scripted decisions left")]
    Exhausted,
}

/// Everything the provider sees for one decision
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub agent: &'a str,
    pub messages: &'a [ContextMessage],
    pub tools: &'a [ToolDefinition],
}

impl DecisionRequest<'_> {
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }
}

/// An unvalidated decision as produced by the provider
#[derive(Debug, Clone, PartialEq)]
pub enum RawDecision {
    /// The model wants to call a tool. `name` may be missing or unknown and
    /// `arguments` may not be valid JSON; the loop validates both.
    ToolCall {
        id: Option<String>,
        name: Option<String>,
        arguments: String,
        thought: Option<String>,
        step: Option<String>,
    },
    /// Explicit completion with a final answer
    Finish { answer: String },
    /// Nothing actionable
    Empty { text: Option<String> },
}

impl RawDecision {
    pub fn call(name: impl Into<String>, arguments: Value) -> Self {
        RawDecision::ToolCall {
            id: None,
            name: Some(name.into()),
            arguments: arguments.to_string(),
            thought: None,
            step: None,
        }
    }

    pub fn finish(answer: impl Into<String>) -> Self {
        RawDecision::Finish {
            answer: answer.into(),
        }
    }

    /// Attach a step label to a tool call
    pub fn in_step(self, label: impl Into<String>) -> Self {
        match self {
            RawDecision::ToolCall {
                id,
                name,
                arguments,
                thought,
                ..
            } => RawDecision::ToolCall {
                id,
                name,
                arguments,
                thought,
                step: Some(label.into()),
            },
            other => other,
        }
    }
}

#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Model identifier, for logs and the journal
    fn model(&self) -> &str;

    async fn decide(&self, request: DecisionRequest<'_>) -> Result<RawDecision, ProviderError>;
}
