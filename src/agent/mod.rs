//! Agent system
//!
//! - `Agent`: owns config, knowledge, tools and conversation across runs
//! - `DecisionLoop`: one run, from task to `RunOutcome`
//! - `Task`: steps and actions recorded during a run

mod base;
mod config;
mod instance;
pub mod prompt;
mod task;

pub use base::{DecisionLoop, FailureReason, LoopLimits, RunContext, RunOutcome, RunStatus};
pub use config::{is_valid_name, load_agent_configs, load_config_file, save_config_file, AgentConfig};
pub use instance::{Agent, AgentRuntime};
pub use task::{Action, ActionKind, IncompleteSteps, Status, Step, Task};
