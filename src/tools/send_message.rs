//! send_message - drop a request into another agent's mailbox

use crate::mailbox::Mailbox;
use crate::tool::{ParamKind, ParameterSchema, Tool, ToolContext, ToolDefinition, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const SEND_MESSAGE: &str = "send_message";

const DEFAULT_REPLY_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct Args {
    to: String,
    content: String,
    #[serde(default)]
    wait_secs: u64,
}

pub struct SendMessageTool {
    mailbox: Mailbox,
    poll: Duration,
}

impl SendMessageTool {
    pub fn new(mailbox: Mailbox) -> Self {
        Self {
            mailbox,
            poll: DEFAULT_REPLY_POLL,
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        SEND_MESSAGE
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: SEND_MESSAGE.to_string(),
            description: "Send a message to another agent's mailbox. Set wait_secs to block for its reply.".to_string(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new()
                .required("to", ParamKind::String, "Recipient agent name")
                .required("content", ParamKind::String, "Message body; '/command args' runs a registered command")
                .optional("wait_secs", ParamKind::Integer, "Seconds to wait for a reply, 0 to not wait", Some(json!(0))),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        let id = match self.mailbox.send(&args.to, &args.content).await {
            Ok(id) => id,
            Err(e) => return ToolResult::error(format!("Failed to send message: {}", e)),
        };
        if args.wait_secs == 0 {
            return ToolResult::success(format!("Sent message {} to {}", id, args.to));
        }

        match self
            .mailbox
            .await_reply(id, Duration::from_secs(args.wait_secs), self.poll, &ctx.cancellation)
            .await
        {
            Ok(reply) => ToolResult::success(format!("Reply from {}: {}", reply.from, reply.content)),
            Err(e) => ToolResult::error(format!("Sent message {} to {}, but {}", id, args.to, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MessageKind;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_send_without_waiting() {
        let temp = TempDir::new().unwrap();
        let tool = SendMessageTool::new(Mailbox::open(temp.path(), "alice").unwrap());
        let bob = Mailbox::open(temp.path(), "bob").unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), CancellationToken::new());

        let result = tool.execute(json!({"to": "bob", "content": "hello"}), &ctx).await;
        assert!(!result.is_error);
        assert!(result.output.starts_with("Sent message"));

        let pending = bob.pending(MessageKind::Request).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message.content, "hello");
    }

    #[tokio::test]
    async fn test_waits_for_reply() {
        let temp = TempDir::new().unwrap();
        let tool = SendMessageTool::new(Mailbox::open(temp.path(), "alice").unwrap())
            .with_poll(Duration::from_millis(10));
        let bob = Mailbox::open(temp.path(), "bob").unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), CancellationToken::new());

        let responder = tokio::spawn(async move {
            loop {
                let mut pending = bob.pending(MessageKind::Request).await.unwrap();
                if let Some(request) = pending.pop() {
                    bob.reply(&request.message, "pong").await.unwrap();
                    bob.delete(&request).await.unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let result = tool
            .execute(json!({"to": "bob", "content": "ping", "wait_secs": 5}), &ctx)
            .await;
        responder.await.unwrap();
        assert_eq!(result, ToolResult::success("Reply from bob: pong"));
    }

    #[tokio::test]
    async fn test_unrepresentable_wait_still_gets_reply() {
        let temp = TempDir::new().unwrap();
        let tool = SendMessageTool::new(Mailbox::open(temp.path(), "alice").unwrap())
            .with_poll(Duration::from_millis(10));
        let bob = Mailbox::open(temp.path(), "bob").unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), CancellationToken::new());

        let responder = tokio::spawn(async move {
            loop {
                let mut pending = bob.pending(MessageKind::Request).await.unwrap();
                if let Some(request) = pending.pop() {
                    bob.reply(&request.message, "late but here").await.unwrap();
                    bob.delete(&request).await.unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let result = tool
            .execute(
                json!({"to": "bob", "content": "take your time", "wait_secs": 9223372036854775807u64}),
                &ctx,
            )
            .await;
        responder.await.unwrap();
        assert_eq!(result, ToolResult::success("Reply from bob: late but here"));
    }

    #[tokio::test]
    async fn test_reply_timeout_is_error_text() {
        let temp = TempDir::new().unwrap();
        let tool = SendMessageTool::new(Mailbox::open(temp.path(), "alice").unwrap())
            .with_poll(Duration::from_millis(10));
        let ctx = ToolContext::new(temp.path().to_path_buf(), CancellationToken::new());

        let result = tool
            .execute(json!({"to": "nobody", "content": "hello?", "wait_secs": 1}), &ctx)
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("no reply"));
    }
}
