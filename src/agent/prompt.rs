//! System prompt and knowledge message construction

use super::config::AgentConfig;
use crate::knowledge::{KnowledgeIndex, KnowledgeItem};
use crate::templates::{Templates, KNOWLEDGE, SYSTEM_PROMPT};
use serde::Serialize;

/// Data for rendering the system prompt template
#[derive(Serialize)]
pub struct SystemPromptContext<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub work_dir: String,
    pub os: &'static str,
    pub max_rounds: usize,
    pub retry_threshold: usize,
    pub knowledge: Vec<String>,
}

impl<'a> SystemPromptContext<'a> {
    pub fn new(config: &'a AgentConfig, index: &KnowledgeIndex) -> Self {
        Self {
            name: &config.name,
            description: &config.description,
            work_dir: config.work_dir.display().to_string(),
            os: std::env::consts::OS,
            max_rounds: config.max_rounds,
            retry_threshold: config.retry_threshold,
            knowledge: index.catalog(),
        }
    }

    pub fn render(&self, templates: &Templates) -> Result<String, handlebars::RenderError> {
        templates.render(SYSTEM_PROMPT, self)
    }
}

#[derive(Serialize)]
struct KnowledgeContext<'a> {
    items: &'a [&'a KnowledgeItem],
}

/// Full definitions of newly injected items, or None when there are none
pub fn knowledge_message(
    templates: &Templates,
    items: &[&KnowledgeItem],
) -> Result<Option<String>, handlebars::RenderError> {
    if items.is_empty() {
        return Ok(None);
    }
    templates.render(KNOWLEDGE, &KnowledgeContext { items }).map(Some)
}
