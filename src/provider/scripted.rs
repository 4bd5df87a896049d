//! Deterministic provider for tests and offline demos

use super::decision::{DecisionProvider, DecisionRequest, ProviderError, RawDecision};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

type Responder = Box<dyn FnMut(&DecisionRequest<'_>) -> RawDecision + Send>;

enum Script {
    Queue(VecDeque<RawDecision>),
    Responder(Responder),
}

/// Replays a fixed list of decisions, or computes each one with a closure.
///
/// Every request's tool listing is recorded so callers can check what the
/// loop offered at each step.
pub struct ScriptedProvider {
    model: String,
    script: Mutex<Script>,
    seen_tools: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(decisions: impl IntoIterator<Item = RawDecision>) -> Self {
        Self {
            model: "scripted".to_string(),
            script: Mutex::new(Script::Queue(decisions.into_iter().collect())),
            seen_tools: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fn(
        responder: impl FnMut(&DecisionRequest<'_>) -> RawDecision + Send + 'static,
    ) -> Self {
        Self {
            model: "scripted".to_string(),
            script: Mutex::new(Script::Responder(Box::new(responder))),
            seen_tools: Mutex::new(Vec::new()),
        }
    }

    /// Number of decisions requested so far
    pub fn calls(&self) -> usize {
        self.seen_tools.lock().len()
    }

    /// Tool names offered on each request, in order
    pub fn seen_tools(&self) -> Vec<Vec<String>> {
        self.seen_tools.lock().clone()
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn decide(&self, request: DecisionRequest<'_>) -> Result<RawDecision, ProviderError> {
        self.seen_tools.lock().push(request.tool_names());
        match &mut *self.script.lock() {
            Script::Queue(queue) => queue.pop_front().ok_or(ProviderError::Exhausted),
            Script::Responder(responder) => Ok(responder(&request)),
        }
    }
}
