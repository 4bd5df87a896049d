//! Task / Step / Action hierarchy recorded for every run

use crate::tool::{truncate, ToolKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_STEP_NAME_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl Status {
    pub fn is_done(&self) -> bool {
        matches!(self, Status::Completed | Status::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ToolCall,
    /// A decision rejected before dispatch
    Invalid,
}

/// One round's outcome. Never modified after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub round: usize,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_kind: Option<ToolKind>,
    pub tool: String,
    pub params: Value,
    pub description: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool output, truncated
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub status: Status,
    pub actions: Vec<Action>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Status::Pending,
            actions: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    fn start(&mut self) {
        self.status = Status::InProgress;
        self.started_at = Some(Utc::now());
    }

    fn finish(&mut self, status: Status) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("task cannot complete, unfinished steps: {}", .0.join(", "))]
pub struct IncompleteSteps(pub Vec<String>);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub status: Status,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            status: Status::Pending,
            steps: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = Status::InProgress;
    }

    /// Add a step that has not started yet
    pub fn plan_step(&mut self, name: impl Into<String>) {
        self.steps.push(Step::new(name));
    }

    /// Mark a pending step skipped. Returns false if no such pending step exists.
    pub fn skip_step(&mut self, name: &str) -> bool {
        match self
            .steps
            .iter_mut()
            .find(|s| s.name == name && s.status == Status::Pending)
        {
            Some(step) => {
                step.finish(Status::Skipped);
                true
            }
            None => false,
        }
    }

    fn active_index(&self) -> Option<usize> {
        self.steps.iter().rposition(|s| s.status == Status::InProgress)
    }

    /// Make `label` the active step, completing the previous one.
    ///
    /// A planned step with the same name is started rather than duplicated.
    pub fn enter_step(&mut self, label: &str) -> usize {
        if let Some(idx) = self.active_index() {
            if self.steps[idx].name == label {
                return idx;
            }
            self.steps[idx].finish(Status::Completed);
        }
        match self
            .steps
            .iter()
            .position(|s| s.name == label && s.status == Status::Pending)
        {
            Some(idx) => {
                self.steps[idx].start();
                idx
            }
            None => {
                let mut step = Step::new(label);
                step.start();
                self.steps.push(step);
                self.steps.len() - 1
            }
        }
    }

    /// Append an action to the active step, opening a default step if needed
    pub fn record(&mut self, action: Action) {
        let idx = match self.active_index() {
            Some(idx) => idx,
            None => {
                let name = truncate(&self.description, DEFAULT_STEP_NAME_CHARS);
                self.enter_step(&name)
            }
        };
        self.steps[idx].actions.push(action);
    }

    /// Finish the active step and the task.
    ///
    /// Fails without changing the task status if any other step is not
    /// completed or skipped.
    pub fn complete(&mut self) -> Result<(), IncompleteSteps> {
        if let Some(idx) = self.active_index() {
            self.steps[idx].finish(Status::Completed);
        }
        let unfinished: Vec<String> = self
            .steps
            .iter()
            .filter(|s| !s.status.is_done())
            .map(|s| s.name.clone())
            .collect();
        if !unfinished.is_empty() {
            return Err(IncompleteSteps(unfinished));
        }
        self.status = Status::Completed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self) {
        if let Some(idx) = self.active_index() {
            self.steps[idx].finish(Status::Failed);
        }
        self.status = Status::Failed;
        self.finished_at = Some(Utc::now());
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.steps.iter().flat_map(|s| s.actions.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(tool: &str) -> Action {
        let now = Utc::now();
        Action {
            id: Uuid::new_v4(),
            round: 1,
            kind: ActionKind::ToolCall,
            tool_kind: Some(ToolKind::Builtin),
            tool: tool.to_string(),
            params: json!({}),
            description: tool.to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            success: true,
            error: None,
            result: String::new(),
        }
    }

    #[test]
    fn test_default_step_and_completion() {
        let mut task = Task::new("add numbers");
        task.start();
        task.record(action("add"));
        task.record(action("echo"));

        assert_eq!(task.steps.len(), 1);
        assert_eq!(task.steps[0].name, "add numbers");
        task.complete().unwrap();
        assert_eq!(task.status, Status::Completed);
        assert_eq!(task.steps[0].status, Status::Completed);
        assert_eq!(task.actions().count(), 2);
    }

    #[test]
    fn test_labelled_steps() {
        let mut task = Task::new("report");
        task.enter_step("gather");
        task.record(action("read_file"));
        task.enter_step("gather");
        task.enter_step("write");
        task.record(action("write_file"));

        assert_eq!(task.steps.len(), 2);
        assert_eq!(task.steps[0].status, Status::Completed);
        assert_eq!(task.steps[1].status, Status::InProgress);
        assert_eq!(task.steps[1].actions.len(), 1);
    }

    #[test]
    fn test_unlabelled_action_joins_planned_default_step() {
        let mut task = Task::new("add numbers");
        task.plan_step("add numbers");
        task.plan_step("report");
        task.record(action("add"));

        assert_eq!(task.steps.len(), 2);
        assert_eq!(task.steps[0].status, Status::InProgress);
        assert_eq!(task.steps[0].actions.len(), 1);
        assert!(task.steps[1].actions.is_empty());
        assert_eq!(task.steps[1].status, Status::Pending);
    }

    #[test]
    fn test_completion_requires_all_steps_done() {
        let mut task = Task::new("plan");
        task.plan_step("one");
        task.plan_step("two");
        task.plan_step("three");
        task.enter_step("one");
        assert!(task.skip_step("two"));

        let err = task.complete().unwrap_err();
        assert_eq!(err, IncompleteSteps(vec!["three".into()]));
        assert_ne!(task.status, Status::Completed);

        assert!(task.skip_step("three"));
        task.complete().unwrap();
        assert_eq!(task.status, Status::Completed);
    }

    #[test]
    fn test_fail_marks_active_step() {
        let mut task = Task::new("x");
        task.record(action("shell"));
        task.fail();
        assert_eq!(task.status, Status::Failed);
        assert_eq!(task.steps[0].status, Status::Failed);
    }
}
