//! Tool system
//!
//! Builtin primitives, external scripts and nested agents all implement the
//! `Tool` trait and live in a shared `ToolRegistry`. The decision loop never
//! dispatches through the live registry: it takes a `ToolSnapshot` at the
//! start of each step, so tools added or removed mid-step (including by the
//! tool currently running) only show up in the next one.

use crate::error::{ToolError, ValidationError};
use async_trait::async_trait;
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Builtin,
    Script,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }

    /// Lenient conversions for values models commonly send with the wrong type
    fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ParamKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ParamKind::Integer, Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| Value::from(f as i64)),
            (ParamKind::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (ParamKind::Boolean, Value::String(s)) => match s.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub kind: ParamKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Typed parameter schema, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSchema {
    params: IndexMap<String, ParamSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.insert(
            name.to_string(),
            ParamSpec {
                kind,
                description: description.to_string(),
                required: true,
                default: None,
            },
        );
        self
    }

    pub fn optional(
        mut self,
        name: &str,
        kind: ParamKind,
        description: &str,
        default: Option<Value>,
    ) -> Self {
        self.params.insert(
            name.to_string(),
            ParamSpec {
                kind,
                description: description.to_string(),
                required: false,
                default,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamSpec)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// JSON Schema object in the shape OpenAI function calling expects
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, spec) in &self.params {
            let mut prop = json!({
                "type": spec.kind.as_str(),
                "description": spec.description,
            });
            if let Some(default) = &spec.default {
                prop["default"] = default.clone();
            }
            properties.insert(name.clone(), prop);
            if spec.required {
                required.push(Value::String(name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `args` against the schema, filling defaults.
    ///
    /// Unknown keys are passed through untouched.
    pub fn validate(&self, tool: &str, args: Value) -> Result<Value, ValidationError> {
        let mut map = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ValidationError::MalformedArguments {
                    tool: tool.to_string(),
                    reason: format!("got {}", json_type_name(&other)),
                })
            }
        };

        for (name, spec) in &self.params {
            match map.get(name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &spec.default {
                        map.insert(name.clone(), default.clone());
                    } else if spec.required {
                        return Err(ValidationError::MissingParameter {
                            tool: tool.to_string(),
                            param: name.clone(),
                        });
                    } else {
                        map.remove(name);
                    }
                }
                Some(value) if spec.kind.accepts(value) => {}
                Some(value) => match spec.kind.coerce(value) {
                    Some(coerced) => {
                        map.insert(name.clone(), coerced);
                    }
                    None => {
                        return Err(ValidationError::TypeMismatch {
                            tool: tool.to_string(),
                            param: name.clone(),
                            expected: spec.kind.as_str(),
                            found: json_type_name(value).to_string(),
                        })
                    }
                },
            }
        }
        Ok(Value::Object(map))
    }
}

/// Tool definition for the decision provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub kind: ToolKind,
    pub parameters: ParameterSchema,
}

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: message.into(),
            is_error: true,
        }
    }
}

impl From<Result<String, ToolError>> for ToolResult {
    fn from(result: Result<String, ToolError>) -> Self {
        match result {
            Ok(output) => ToolResult::success(output),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

/// One agent on the active call path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFrame {
    pub id: Uuid,
    pub name: String,
}

/// Agents currently executing, outermost first.
///
/// Passed by value into nested tool calls so each branch of a delegation
/// tree sees only its own ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<AgentFrame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frame: AgentFrame) -> Self {
        let mut frames = self.frames.clone();
        frames.push(frame);
        Self { frames }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.frames.iter().any(|f| f.id == id)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[AgentFrame] {
        &self.frames
    }

    pub fn render(&self) -> String {
        self.frames
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Context passed to tools during execution
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub cancellation: CancellationToken,
    pub call_stack: CallStack,
    pub max_depth: usize,
}

impl ToolContext {
    pub fn new(working_dir: PathBuf, cancellation: CancellationToken) -> Self {
        Self {
            working_dir,
            cancellation,
            call_stack: CallStack::new(),
            max_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_call_stack(mut self, call_stack: CallStack) -> Self {
        self.call_stack = call_stack;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used for dispatch)
    fn name(&self) -> &str;

    /// Get the tool definition for the decision provider
    fn definition(&self) -> ToolDefinition;

    fn kind(&self) -> ToolKind {
        ToolKind::Builtin
    }

    /// Execute the tool with arguments already validated against its schema
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult;

    /// One-line description of a call, used for action records
    fn humanize(&self, args: &Value, result: &ToolResult) -> String {
        if result.is_error {
            format!("{} failed: {}", self.name(), truncate(&result.output, 100))
        } else {
            format!("{}({})", self.name(), summarize_args(args))
        }
    }
}

/// Summarize args into a short string for humanization
fn summarize_args(args: &Value) -> String {
    match args {
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .take(2)
                .map(|(k, v)| {
                    let val = match v {
                        Value::String(s) => truncate(s, 30),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => "...".to_string(),
                    };
                    format!("{}={}", k, val)
                })
                .collect();
            parts.join(", ")
        }
        _ => "...".to_string(),
    }
}

/// Truncate to at most `max` characters, appending an ellipsis
pub fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}...", &s[..idx]),
    }
}

/// Shared, mutable table of tools.
///
/// Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<IndexMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&self, tool: T) -> Option<Arc<dyn Tool>> {
        self.add_tool(Arc::new(tool))
    }

    /// Add a tool, replacing any tool with the same name
    pub fn add_tool(&self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.name().to_string();
        let previous = self.tools.write().insert(name.clone(), tool);
        if previous.is_some() {
            tracing::debug!(tool = %name, "Replaced existing tool");
        } else {
            tracing::debug!(tool = %name, "Added tool");
        }
        previous
    }

    pub fn remove_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let removed = self.tools.write().shift_remove(name);
        if removed.is_some() {
            tracing::debug!(tool = %name, "Removed tool");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Capture the current table for one decision step
    pub fn snapshot(&self) -> ToolSnapshot {
        let tools = self.tools.read().clone();
        let entries = tools
            .into_iter()
            .map(|(name, tool)| {
                let definition = tool.definition();
                (name, SnapshotEntry { tool, definition })
            })
            .collect();
        ToolSnapshot { entries }
    }

    /// Validate and execute against the current table
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        self.snapshot().dispatch(name, args, ctx).await
    }

    /// Handle for tools that live inside the registry they modify
    pub fn downgrade(&self) -> WeakToolRegistry {
        WeakToolRegistry {
            tools: Arc::downgrade(&self.tools),
        }
    }
}

/// Non-owning registry handle; see `ToolRegistry::downgrade`
#[derive(Clone)]
pub struct WeakToolRegistry {
    tools: Weak<RwLock<IndexMap<String, Arc<dyn Tool>>>>,
}

impl WeakToolRegistry {
    pub fn upgrade(&self) -> Option<ToolRegistry> {
        self.tools.upgrade().map(|tools| ToolRegistry { tools })
    }
}

struct SnapshotEntry {
    tool: Arc<dyn Tool>,
    definition: ToolDefinition,
}

/// Immutable tool table for one decision step
pub struct ToolSnapshot {
    entries: IndexMap<String, SnapshotEntry>,
}

impl ToolSnapshot {
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.values().map(|e| e.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries.get(name).map(|e| e.tool.clone())
    }

    pub fn unknown_tool(&self, name: &str) -> ValidationError {
        ValidationError::UnknownTool {
            name: name.to_string(),
            available: self.names(),
        }
    }

    /// Check a call against the tool's schema, returning the filled arguments
    pub fn validate(&self, name: &str, args: Value) -> Result<Value, ValidationError> {
        let entry = self.entries.get(name).ok_or_else(|| self.unknown_tool(name))?;
        entry.definition.parameters.validate(name, args)
    }

    /// Run a tool. Panics inside the tool become error results.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(entry) = self.entries.get(name) else {
            return ToolResult::error(self.unknown_tool(name).to_string());
        };
        match AssertUnwindSafe(entry.tool.execute(args, ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(tool = %name, panic = %message, "Tool panicked");
                ToolResult::error(format!("Tool '{}' panicked: {}", name, message))
            }
        }
    }

    /// Validate then execute; validation failures become error results
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        match self.validate(name, args) {
            Ok(args) => self.execute(name, args, ctx).await,
            Err(e) => ToolResult::error(e.to_string()),
        }
    }

    pub fn humanize(&self, name: &str, args: &Value, result: &ToolResult) -> String {
        match self.entries.get(name) {
            Some(entry) => entry.tool.humanize(args, result),
            None => format!("{} (unknown tool)", name),
        }
    }
}
