//! Handlebars templates for agent prompts

use crate::error::ConfigurationError;
use handlebars::Handlebars;
use serde::Serialize;
use std::sync::Arc;

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("templates/system_prompt.hbs");
const KNOWLEDGE_TEMPLATE: &str = include_str!("templates/knowledge.hbs");

pub const SYSTEM_PROMPT: &str = "system_prompt.hbs";
pub const KNOWLEDGE: &str = "knowledge.hbs";

/// Holds the handlebars templates
pub struct Templates {
    handlebars: Handlebars<'static>,
}

impl Templates {
    pub fn new() -> Result<Arc<Self>, ConfigurationError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        // Prompts are plain text, never HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("gt", Box::new(gt_helper));
        handlebars.register_helper("len", Box::new(len_helper));
        for (name, source) in [
            (SYSTEM_PROMPT, SYSTEM_PROMPT_TEMPLATE),
            (KNOWLEDGE, KNOWLEDGE_TEMPLATE),
        ] {
            handlebars
                .register_template_string(name, source)
                .map_err(|e| ConfigurationError::Template(e.to_string()))?;
        }

        Ok(Arc::new(Self { handlebars }))
    }

    /// Render a template by name with the given data
    pub fn render<T: Serialize>(
        &self,
        template_name: &str,
        data: &T,
    ) -> Result<String, handlebars::RenderError> {
        self.handlebars.render(template_name, data)
    }
}

// Greater than comparison (works as subexpression)
handlebars::handlebars_helper!(gt_helper: |a: u64, b: u64| a > b);

// Length of array (works as subexpression)
handlebars::handlebars_helper!(len_helper: |arr: Json| {
    arr.as_array().map(|a| a.len() as u64).unwrap_or(0)
});
