//! Conversation context exchanged with the decision provider

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Range;

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ContextMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call: Option<ToolCall>,
    },
    Tool {
        call_id: String,
        name: String,
        content: String,
    },
}

impl ContextMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ContextMessage::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ContextMessage::User {
            content: content.into(),
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        ContextMessage::Assistant {
            content: Some(content.into()),
            tool_call: None,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            ContextMessage::System { .. } => "system",
            ContextMessage::User { .. } => "user",
            ContextMessage::Assistant { .. } => "assistant",
            ContextMessage::Tool { .. } => "tool",
        }
    }

    /// Text content, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            ContextMessage::System { content }
            | ContextMessage::User { content }
            | ContextMessage::Tool { content, .. } => Some(content),
            ContextMessage::Assistant { content, .. } => content.as_deref(),
        }
    }
}

/// Plain-text rendering of a conversation, one block per message
pub fn render_transcript(messages: &[ContextMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        match message {
            ContextMessage::System { content } => {
                out.push_str(&format!("[system]\n{}\n\n", content));
            }
            ContextMessage::User { content } => {
                out.push_str(&format!("[user]\n{}\n\n", content));
            }
            ContextMessage::Assistant { content, tool_call } => {
                out.push_str("[assistant]\n");
                if let Some(text) = content {
                    out.push_str(text);
                    out.push('\n');
                }
                if let Some(call) = tool_call {
                    out.push_str(&format!("-> {}({})\n", call.name, call.arguments));
                }
                out.push('\n');
            }
            ContextMessage::Tool { name, content, .. } => {
                out.push_str(&format!("[tool {}]\n{}\n\n", name, content));
            }
        }
    }
    out
}

/// Bound working memory to `window` messages.
///
/// System messages and the message at `task` are always kept. The rest is
/// split into units, an assistant tool call together with the tool replies
/// that follow it or any other single message, and the newest units that
/// fit are kept. A tool reply never outlives its call. Returns the new index
/// of the task message. A `window` of 0 disables trimming.
pub fn trim_window(messages: &mut Vec<ContextMessage>, window: usize, task: usize) -> usize {
    if window == 0 || messages.len() <= window {
        return task;
    }

    let mut keep: Vec<bool> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| i == task || matches!(m, ContextMessage::System { .. }))
        .collect();
    let reserved = keep.iter().filter(|k| **k).count();

    let mut units: Vec<Range<usize>> = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        if keep[i] {
            i += 1;
            continue;
        }
        let start = i;
        i += 1;
        if matches!(
            messages[start],
            ContextMessage::Assistant {
                tool_call: Some(_),
                ..
            }
        ) {
            while i < messages.len() && !keep[i] && matches!(messages[i], ContextMessage::Tool { .. }) {
                i += 1;
            }
        }
        units.push(start..i);
    }

    let mut budget = window.saturating_sub(reserved);
    for unit in units.iter().rev() {
        if unit.len() > budget {
            break;
        }
        budget -= unit.len();
        keep[unit.clone()].iter_mut().for_each(|k| *k = true);
    }

    let new_task = keep.iter().take(task).filter(|k| **k).count();
    let mut flags = keep.into_iter();
    messages.retain(|_| flags.next().unwrap_or(false));
    new_task
}
