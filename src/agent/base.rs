//! DecisionLoop - one agent run
//!
//! INIT -> DECIDING -> EXECUTING -> (DECIDING | TERMINATED | FAILED)
//!
//! Each round asks the provider for one decision, validates it against a
//! snapshot of the tool registry, executes it and records the action. The
//! loop never returns an error: every ending is a `RunOutcome`.

use super::prompt::knowledge_message;
use super::task::{Action, ActionKind, Task};
use crate::error::ValidationError;
use crate::events::{emit, AgentEvent, EventSender};
use crate::knowledge::{KnowledgeIndex, LoadedKnowledge};
use crate::message::{trim_window, ContextMessage, ToolCall};
use crate::provider::{DecisionProvider, DecisionRequest, RawDecision};
use crate::telemetry::Telemetry;
use crate::templates::Templates;
use crate::tool::{truncate, ToolContext, ToolRegistry, ToolSnapshot};
use crate::tools::task_complete::TASK_COMPLETE;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_rounds: usize,
    pub retry_threshold: usize,
    pub max_result_chars: usize,
    pub window_size: usize,
}

impl From<&super::AgentConfig> for LoopLimits {
    fn from(config: &super::AgentConfig) -> Self {
        Self {
            max_rounds: config.max_rounds,
            retry_threshold: config.retry_threshold,
            max_result_chars: config.max_result_chars,
            window_size: config.window_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Init,
    Deciding,
    Executing,
    Terminated,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    BudgetExceeded { max_rounds: usize },
    NoProgress { attempts: usize, last_error: String },
    Provider { message: String },
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::BudgetExceeded { max_rounds } => {
                write!(f, "round budget of {} exhausted", max_rounds)
            }
            FailureReason::NoProgress {
                attempts,
                last_error,
            } => write!(
                f,
                "no progress: the same call failed {} times in a row ({})",
                attempts, last_error
            ),
            FailureReason::Provider { message } => write!(f, "provider error: {}", message),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed(FailureReason),
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub agent: String,
    pub status: RunStatus,
    pub answer: Option<String>,
    pub rounds: usize,
    pub actions: Vec<Action>,
    pub task: Task,
    /// Knowledge items injected during this run
    pub injected: Vec<String>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Text form used when this run is the result of an agent tool call
    pub fn to_text(&self) -> String {
        match &self.status {
            RunStatus::Completed => self
                .answer
                .clone()
                .unwrap_or_else(|| format!("Agent '{}' completed without an answer", self.agent)),
            RunStatus::Failed(reason) => {
                let mut text = format!(
                    "Agent '{}' failed after {} round(s): {}",
                    self.agent, self.rounds, reason
                );
                if let Some(last) = self.actions.iter().rev().find(|a| a.success) {
                    text.push_str(&format!("\nLast successful result ({}): {}", last.tool, last.result));
                }
                text
            }
        }
    }
}

/// Counts consecutive identical failures (same tool, arguments and error)
struct FailureTracker {
    threshold: usize,
    last: Option<u64>,
    count: usize,
}

impl FailureTracker {
    fn new(threshold: usize) -> Self {
        Self {
            threshold,
            last: None,
            count: 0,
        }
    }

    /// Record a failure; true once the threshold is reached
    fn failed(&mut self, tool: &str, args: &str, error: &str) -> bool {
        let mut hasher = DefaultHasher::new();
        tool.hash(&mut hasher);
        args.hash(&mut hasher);
        error.hash(&mut hasher);
        let signature = hasher.finish();

        if self.last == Some(signature) {
            self.count += 1;
        } else {
            self.last = Some(signature);
            self.count = 1;
        }
        self.count >= self.threshold
    }

    fn reset(&mut self) {
        self.last = None;
        self.count = 0;
    }
}

/// Agent state a run reads and mutates
pub struct RunContext<'a> {
    pub task: &'a str,
    /// Pushed only when the conversation is empty
    pub system_prompt: String,
    pub messages: &'a mut Vec<ContextMessage>,
    pub knowledge: &'a KnowledgeIndex,
    pub loaded: &'a mut LoadedKnowledge,
    pub templates: &'a Templates,
    pub registry: &'a ToolRegistry,
    pub history: &'a mut Vec<Action>,
    pub tool_ctx: ToolContext,
}

/// A decision that passed validation
struct Decision {
    call_id: String,
    tool: String,
    args: Value,
    thought: Option<String>,
}

/// Parse the raw argument string; empty means no arguments
fn parse_arguments(tool: &str, raw: &str) -> Result<Value, ValidationError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(Value::Null) => Ok(Value::Object(Map::new())),
        Ok(_) => Err(ValidationError::MalformedArguments {
            tool: tool.to_string(),
            reason: "expected an object".into(),
        }),
        Err(e) => Err(ValidationError::MalformedArguments {
            tool: tool.to_string(),
            reason: e.to_string(),
        }),
    }
}

pub struct DecisionLoop<'a> {
    agent: &'a str,
    provider: &'a dyn DecisionProvider,
    limits: LoopLimits,
    telemetry: Option<&'a Telemetry>,
    events: Option<&'a EventSender>,
}

impl<'a> DecisionLoop<'a> {
    pub fn new(agent: &'a str, provider: &'a dyn DecisionProvider, limits: LoopLimits) -> Self {
        Self {
            agent,
            provider,
            limits,
            telemetry: None,
            events: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Option<&'a Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_events(mut self, events: Option<&'a EventSender>) -> Self {
        self.events = events;
        self
    }

    fn transition(&self, state: &mut LoopState, next: LoopState) {
        tracing::trace!(agent = %self.agent, from = ?*state, to = ?next, "Loop transition");
        *state = next;
    }

    /// Inject knowledge referenced by `text` that this agent has not loaded yet
    fn inject(&self, ctx: &mut RunContext<'_>, text: &str) -> Vec<String> {
        let items = ctx.loaded.inject(ctx.knowledge, text);
        if items.is_empty() {
            return Vec::new();
        }
        let names: Vec<String> = items.iter().map(|item| item.name.clone()).collect();
        match knowledge_message(ctx.templates, &items) {
            Ok(Some(message)) => ctx.messages.push(ContextMessage::system(message)),
            Ok(None) => {}
            Err(e) => tracing::warn!(agent = %self.agent, error = %e, "Failed to render knowledge"),
        }
        tracing::debug!(agent = %self.agent, items = ?names, "Knowledge injected");
        emit(
            self.events,
            AgentEvent::KnowledgeInjected {
                agent: self.agent.to_string(),
                items: names.clone(),
            },
        );
        names
    }

    /// Turn a raw decision into a validated tool call, or the reason it is rejected
    fn validate(
        &self,
        snapshot: &ToolSnapshot,
        name: Option<String>,
        id: Option<String>,
        arguments: &str,
        thought: Option<String>,
    ) -> Result<Decision, ValidationError> {
        let tool = name.ok_or(ValidationError::MissingAction)?;
        if !snapshot.contains(&tool) {
            return Err(snapshot.unknown_tool(&tool));
        }
        let args = parse_arguments(&tool, arguments)?;
        let args = snapshot.validate(&tool, args)?;
        Ok(Decision {
            call_id: id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
            tool,
            args,
            thought,
        })
    }

    fn record(&self, run_id: Uuid, action: Action, task: &mut Task, history: &mut Vec<Action>, actions: &mut Vec<Action>) {
        if let Some(telemetry) = self.telemetry {
            telemetry.record_action(run_id, self.agent, &action);
        }
        task.record(action.clone());
        history.push(action.clone());
        actions.push(action);
    }

    pub async fn run(&self, mut ctx: RunContext<'_>) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let depth = ctx.tool_ctx.call_stack.depth();
        let task_text = ctx.task;
        let mut task = Task::new(task_text);
        let mut state = LoopState::Init;
        task.start();

        tracing::info!(agent = %self.agent, %run_id, depth, model = %self.provider.model(), "Run started");
        emit(
            self.events,
            AgentEvent::RunStart {
                agent: self.agent.to_string(),
                run_id,
                task: task_text.to_string(),
                depth,
            },
        );
        if let Some(telemetry) = self.telemetry {
            telemetry.record_run_start(run_id, self.agent, self.provider.model(), task_text, depth);
        }

        if ctx.messages.is_empty() {
            let prompt = std::mem::take(&mut ctx.system_prompt);
            ctx.messages.push(ContextMessage::system(prompt));
        }
        let mut injected = self.inject(&mut ctx, task_text);
        ctx.messages.push(ContextMessage::user(task_text));
        let mut task_index = ctx.messages.len() - 1;

        let mut rounds = 0;
        let mut actions = Vec::new();
        let mut failures = FailureTracker::new(self.limits.retry_threshold);
        let cancel = ctx.tool_ctx.cancellation.clone();

        let (status, answer) = loop {
            if cancel.is_cancelled() {
                break (RunStatus::Failed(FailureReason::Cancelled), None);
            }
            if rounds >= self.limits.max_rounds {
                tracing::warn!(agent = %self.agent, max_rounds = self.limits.max_rounds, "Round budget exhausted");
                break (
                    RunStatus::Failed(FailureReason::BudgetExceeded {
                        max_rounds: self.limits.max_rounds,
                    }),
                    None,
                );
            }
            rounds += 1;
            self.transition(&mut state, LoopState::Deciding);

            let before = ctx.messages.len();
            task_index = trim_window(ctx.messages, self.limits.window_size, task_index);
            if ctx.messages.len() < before {
                tracing::debug!(
                    agent = %self.agent,
                    dropped = before - ctx.messages.len(),
                    kept = ctx.messages.len(),
                    "Working memory trimmed"
                );
            }

            let snapshot = ctx.registry.snapshot();
            let definitions = snapshot.definitions();
            let request = DecisionRequest {
                agent: self.agent,
                messages: ctx.messages.as_slice(),
                tools: &definitions,
            };
            let decided = tokio::select! {
                biased;
                _ = cancel.cancelled() => break (RunStatus::Failed(FailureReason::Cancelled), None),
                decided = self.provider.decide(request) => decided,
            };
            let raw = match decided {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(agent = %self.agent, round = rounds, error = %e, "Provider failed");
                    break (
                        RunStatus::Failed(FailureReason::Provider {
                            message: e.to_string(),
                        }),
                        None,
                    );
                }
            };

            let (name, id, arguments, thought) = match raw {
                RawDecision::Finish { answer } => {
                    tracing::debug!(agent = %self.agent, round = rounds, "Explicit finish");
                    ctx.messages.push(ContextMessage::assistant_text(answer.clone()));
                    break (RunStatus::Completed, Some(answer));
                }
                RawDecision::Empty { text } => (None, None, String::new(), text),
                RawDecision::ToolCall {
                    id,
                    name,
                    arguments,
                    thought,
                    step,
                } => {
                    if let Some(label) = step {
                        task.enter_step(&label);
                        emit(
                            self.events,
                            AgentEvent::StepStart {
                                agent: self.agent.to_string(),
                                step: label,
                            },
                        );
                    }
                    (name, id, arguments, thought)
                }
            };

            if let Some(text) = &thought {
                emit(
                    self.events,
                    AgentEvent::Thought {
                        agent: self.agent.to_string(),
                        text: text.clone(),
                    },
                );
                injected.extend(self.inject(&mut ctx, text));
            }

            let attempted = name.clone().unwrap_or_default();
            let decision = match self.validate(&snapshot, name, id, &arguments, thought.clone()) {
                Ok(decision) => decision,
                Err(error) => {
                    let error_text = error.to_string();
                    tracing::warn!(agent = %self.agent, round = rounds, error = %error_text, "Decision rejected");
                    emit(
                        self.events,
                        AgentEvent::DecisionRejected {
                            agent: self.agent.to_string(),
                            round: rounds,
                            error: error_text.clone(),
                        },
                    );

                    let echo = thought.unwrap_or_else(|| {
                        if attempted.is_empty() {
                            "(no action)".to_string()
                        } else {
                            format!("(attempted call: {} {})", attempted, arguments)
                        }
                    });
                    ctx.messages.push(ContextMessage::assistant_text(echo));
                    ctx.messages.push(ContextMessage::user(format!(
                        "Your last response was rejected: {}. Respond with exactly one valid tool call or a final answer.",
                        error_text
                    )));

                    let now = Utc::now();
                    let action = Action {
                        id: Uuid::new_v4(),
                        round: rounds,
                        kind: ActionKind::Invalid,
                        tool_kind: None,
                        tool: attempted.clone(),
                        params: Value::String(truncate(&arguments, self.limits.max_result_chars)),
                        description: format!("rejected decision: {}", error_text),
                        started_at: now,
                        finished_at: now,
                        duration_ms: 0,
                        success: false,
                        error: Some(error_text.clone()),
                        result: String::new(),
                    };
                    self.record(run_id, action, &mut task, ctx.history, &mut actions);

                    if failures.failed(&attempted, &arguments, &error_text) {
                        break (
                            RunStatus::Failed(FailureReason::NoProgress {
                                attempts: failures.count,
                                last_error: error_text,
                            }),
                            None,
                        );
                    }
                    continue;
                }
            };

            self.transition(&mut state, LoopState::Executing);
            let Decision {
                call_id,
                tool,
                args,
                thought,
            } = decision;

            ctx.messages.push(ContextMessage::Assistant {
                content: thought,
                tool_call: Some(ToolCall {
                    id: call_id.clone(),
                    name: tool.clone(),
                    arguments: args.clone(),
                }),
            });
            emit(
                self.events,
                AgentEvent::ToolCallStart {
                    agent: self.agent.to_string(),
                    call_id: call_id.clone(),
                    tool: tool.clone(),
                    arguments: args.clone(),
                },
            );

            let started_at = Utc::now();
            let timer = Instant::now();
            let result = snapshot.execute(&tool, args.clone(), &ctx.tool_ctx).await;
            let duration_ms = timer.elapsed().as_millis() as u64;

            tracing::info!(
                agent = %self.agent,
                round = rounds,
                tool = %tool,
                duration_ms,
                is_error = result.is_error,
                "Tool executed"
            );

            let truncated = truncate(&result.output, self.limits.max_result_chars);
            let action = Action {
                id: Uuid::new_v4(),
                round: rounds,
                kind: ActionKind::ToolCall,
                tool_kind: snapshot.get(&tool).map(|t| t.kind()),
                tool: tool.clone(),
                params: args.clone(),
                description: snapshot.humanize(&tool, &args, &result),
                started_at,
                finished_at: Utc::now(),
                duration_ms,
                success: !result.is_error,
                error: result.is_error.then(|| truncated.clone()),
                result: truncated,
            };
            self.record(run_id, action, &mut task, ctx.history, &mut actions);

            ctx.messages.push(ContextMessage::Tool {
                call_id: call_id.clone(),
                name: tool.clone(),
                content: result.output.clone(),
            });
            emit(
                self.events,
                AgentEvent::ToolCallEnd {
                    agent: self.agent.to_string(),
                    call_id,
                    tool: tool.clone(),
                    output: result.output.clone(),
                    is_error: result.is_error,
                    duration_ms,
                },
            );

            if result.is_error {
                let args_text = args.to_string();
                if failures.failed(&tool, &args_text, &result.output) {
                    tracing::warn!(agent = %self.agent, tool = %tool, "Repeated identical failure");
                    break (
                        RunStatus::Failed(FailureReason::NoProgress {
                            attempts: failures.count,
                            last_error: truncate(&result.output, 200),
                        }),
                        None,
                    );
                }
            } else {
                failures.reset();
                if tool == TASK_COMPLETE {
                    break (RunStatus::Completed, Some(result.output));
                }
            }
        };

        match &status {
            RunStatus::Completed => {
                self.transition(&mut state, LoopState::Terminated);
                if let Err(e) = task.complete() {
                    tracing::warn!(agent = %self.agent, error = %e, "Task left open");
                }
            }
            RunStatus::Failed(_) => {
                self.transition(&mut state, LoopState::Failed);
                task.fail();
            }
        }

        let status_text = status.to_string();
        tracing::info!(agent = %self.agent, %run_id, rounds, status = %status_text, "Run finished");
        if let Some(telemetry) = self.telemetry {
            telemetry.record_run_end(run_id, &status_text, rounds, answer.as_deref());
        }
        emit(
            self.events,
            AgentEvent::RunComplete {
                agent: self.agent.to_string(),
                run_id,
                status: status_text,
                rounds,
                answer: answer.clone(),
            },
        );

        RunOutcome {
            run_id,
            agent: self.agent.to_string(),
            status,
            answer,
            rounds,
            actions,
            task,
            injected,
        }
    }
}
