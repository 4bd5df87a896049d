//! Decision providers
//!
//! The decision loop only knows the `DecisionProvider` trait. `ProviderClient`
//! talks to any API implementing the OpenAI chat completions spec;
//! `ScriptedProvider` replays fixed decisions.

mod client;
mod config;
mod decision;
mod scripted;

pub use client::{decision_from_response, to_openai_messages, to_openai_tools, ProviderClient};
pub use config::ProviderConfig;
pub use decision::{DecisionProvider, DecisionRequest, ProviderError, RawDecision};
pub use scripted::ScriptedProvider;
