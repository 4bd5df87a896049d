//! OpenAI-compatible provider client
//!
//! Non-streaming chat completions with tool support. Each decision is one
//! request; the first tool call in the response becomes the decision.

use super::decision::{DecisionProvider, DecisionRequest, ProviderError, RawDecision};
use super::ProviderConfig;
use crate::message::ContextMessage;
use crate::tool::ToolDefinition;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs,
        FunctionCall, FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use std::time::Duration;

const MAX_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const TEMPERATURE: f32 = 0.3;

/// OpenAI-compatible client wrapper
#[derive(Clone)]
pub struct ProviderClient {
    config: ProviderConfig,
    client: Client<OpenAIConfig>,
}

impl ProviderClient {
    /// Create a new provider client from config
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = Self::get_api_key(&config)?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(&api_key)
            .with_api_base(&config.base_url);

        Ok(Self {
            config,
            client: Client::with_config(openai_config),
        })
    }

    /// Get API key from environment (after loading .env) or auth.json
    fn get_api_key(config: &ProviderConfig) -> Result<String, ProviderError> {
        let _ = dotenvy::dotenv();

        if let Ok(key) = std::env::var(&config.api_key_env) {
            return Ok(key);
        }

        if let Some(key) = Self::get_key_from_auth_json(&config.name) {
            return Ok(key);
        }

        Err(ProviderError::MissingApiKey {
            env: config.api_key_env.clone(),
        })
    }

    /// `{"openrouter": {"key": "..."}}` under the user data dir
    fn get_key_from_auth_json(provider_name: &str) -> Option<String> {
        let auth_path = dirs::data_dir()?.join("mesh_agent").join("auth.json");
        let content = std::fs::read_to_string(&auth_path).ok()?;
        let auth: serde_json::Value = serde_json::from_str(&content).ok()?;
        auth.get(provider_name.to_lowercase())?
            .get("key")?
            .as_str()
            .map(|s| s.to_string())
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Convert our context into async-openai request messages
pub fn to_openai_messages(
    messages: &[ContextMessage],
) -> Result<Vec<ChatCompletionRequestMessage>, ProviderError> {
    let build_err = |e: async_openai::error::OpenAIError| ProviderError::Build(e.to_string());
    messages
        .iter()
        .map(|message| {
            Ok(match message {
                ContextMessage::System { content } => ChatCompletionRequestSystemMessageArgs::default()
                    .content(content.clone())
                    .build()
                    .map_err(build_err)?
                    .into(),
                ContextMessage::User { content } => ChatCompletionRequestUserMessageArgs::default()
                    .content(content.clone())
                    .build()
                    .map_err(build_err)?
                    .into(),
                ContextMessage::Assistant { content, tool_call } => {
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    if let Some(text) = content {
                        args.content(text.clone());
                    }
                    if let Some(call) = tool_call {
                        args.tool_calls(vec![ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        }]);
                    }
                    ChatCompletionRequestMessage::Assistant(args.build().map_err(build_err)?)
                }
                ContextMessage::Tool {
                    call_id, content, ..
                } => ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(content.clone())
                        .tool_call_id(call_id.clone())
                        .build()
                        .map_err(build_err)?,
                ),
            })
        })
        .collect()
}

/// Convert tool definitions to OpenAI function tools
pub fn to_openai_tools(tools: &[ToolDefinition]) -> Vec<ChatCompletionTool> {
    tools
        .iter()
        .map(|def| ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: def.name.clone(),
                description: Some(def.description.clone()),
                parameters: Some(def.parameters.to_json_schema()),
                strict: None,
            },
        })
        .collect()
}

/// A leading "Step: <label>" line in the assistant text names the step
fn extract_step(content: &str) -> Option<String> {
    let first = content.lines().find(|l| !l.trim().is_empty())?.trim();
    let (key, value) = first.split_once(':')?;
    if key.trim().eq_ignore_ascii_case("step") && !value.trim().is_empty() {
        Some(value.trim().to_string())
    } else {
        None
    }
}

/// Map one response message to a raw decision
pub fn decision_from_response(
    content: Option<String>,
    tool_calls: Option<Vec<ChatCompletionMessageToolCall>>,
) -> RawDecision {
    let content = content.filter(|c| !c.trim().is_empty());
    let mut calls = tool_calls.unwrap_or_default();

    if !calls.is_empty() {
        if calls.len() > 1 {
            tracing::warn!(
                count = calls.len(),
                "Model returned several tool calls, executing only the first"
            );
        }
        let call = calls.remove(0);
        let name = Some(call.function.name).filter(|n| !n.trim().is_empty());
        return RawDecision::ToolCall {
            id: Some(call.id).filter(|id| !id.is_empty()),
            name,
            arguments: call.function.arguments,
            step: content.as_deref().and_then(extract_step),
            thought: content,
        };
    }

    match content {
        Some(answer) => RawDecision::Finish { answer },
        None => RawDecision::Empty { text: None },
    }
}

#[async_trait]
impl DecisionProvider for ProviderClient {
    fn model(&self) -> &str {
        &self.config.default_model
    }

    async fn decide(&self, request: DecisionRequest<'_>) -> Result<RawDecision, ProviderError> {
        let messages = to_openai_messages(request.messages)?;
        let tools = to_openai_tools(request.tools);

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.config.default_model)
            .messages(messages)
            .temperature(TEMPERATURE);
        if !tools.is_empty() {
            builder.tools(tools);
        }
        let chat_request = builder
            .build()
            .map_err(|e| ProviderError::Build(e.to_string()))?;

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.chat().create(chat_request.clone()).await {
                Ok(response) => {
                    let choice = response
                        .choices
                        .into_iter()
                        .next()
                        .ok_or(ProviderError::EmptyResponse)?;
                    tracing::debug!(
                        agent = %request.agent,
                        model = %self.config.default_model,
                        finish_reason = ?choice.finish_reason,
                        "Received decision"
                    );
                    return Ok(decision_from_response(
                        choice.message.content,
                        choice.message.tool_calls,
                    ));
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        agent = %request.agent,
                        attempt,
                        error = %last_error,
                        "Provider call failed"
                    );
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(ProviderError::Request {
            attempts: MAX_ATTEMPTS,
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;
    use crate::tool::{ParamKind, ParameterSchema, ToolKind};
    use serde_json::json;

    fn openai_call(name: &str, args: &str) -> ChatCompletionMessageToolCall {
        ChatCompletionMessageToolCall {
            id: "call_1".into(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: name.into(),
                arguments: args.into(),
            },
        }
    }

    #[test]
    fn test_tool_call_becomes_decision() {
        let decision = decision_from_response(
            Some("Step: gather inputs\nI will read the file.".into()),
            Some(vec![openai_call("read_file", r#"{"path":"a"}"#), openai_call("shell", "{}")]),
        );
        match decision {
            RawDecision::ToolCall { id, name, arguments, step, .. } => {
                assert_eq!(id.as_deref(), Some("call_1"));
                assert_eq!(name.as_deref(), Some("read_file"));
                assert_eq!(arguments, r#"{"path":"a"}"#);
                assert_eq!(step.as_deref(), Some("gather inputs"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_blank_tool_name_is_kept_as_missing() {
        let decision = decision_from_response(None, Some(vec![openai_call(" ", "{}")]));
        assert!(matches!(decision, RawDecision::ToolCall { name: None, .. }));
    }

    #[test]
    fn test_text_only_is_finish_and_nothing_is_empty() {
        assert_eq!(
            decision_from_response(Some("done: 4".into()), None),
            RawDecision::finish("done: 4")
        );
        assert_eq!(
            decision_from_response(Some("  ".into()), Some(vec![])),
            RawDecision::Empty { text: None }
        );
    }

    #[test]
    fn test_message_conversion() {
        let messages = vec![
            ContextMessage::system("be brief"),
            ContextMessage::user("hi"),
            ContextMessage::Assistant {
                content: None,
                tool_call: Some(ToolCall {
                    id: "c1".into(),
                    name: "echo".into(),
                    arguments: json!({"text": "x"}),
                }),
            },
            ContextMessage::Tool {
                call_id: "c1".into(),
                name: "echo".into(),
                content: "x".into(),
            },
        ];
        let converted = to_openai_messages(&messages).unwrap();
        assert_eq!(converted.len(), 4);
        assert!(matches!(converted[2], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(converted[3], ChatCompletionRequestMessage::Tool(_)));
    }

    #[test]
    fn test_tool_conversion_uses_json_schema() {
        let defs = vec![ToolDefinition {
            name: "echo".into(),
            description: "Echo".into(),
            kind: ToolKind::Builtin,
            parameters: ParameterSchema::new().required("text", ParamKind::String, "text"),
        }];
        let tools = to_openai_tools(&defs);
        let params = tools[0].function.parameters.clone().unwrap();
        assert_eq!(params["required"], json!(["text"]));
    }

    #[test]
    fn test_missing_key_is_reported() {
        let config = ProviderConfig::custom(
            "nowhere",
            "http://localhost:1",
            "MESH_AGENT_TEST_KEY_THAT_IS_NOT_SET",
            "m",
        );
        match ProviderClient::new(config) {
            Err(ProviderError::MissingApiKey { env }) => {
                assert_eq!(env, "MESH_AGENT_TEST_KEY_THAT_IS_NOT_SET")
            }
            _ => panic!("expected missing key error"),
        }
    }
}
