//! Provider configuration

use serde::{Deserialize, Serialize};

/// Endpoint, credential and model for an OpenAI-compatible provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name, also the key looked up in auth.json
    pub name: String,
    /// API base URL (e.g., "https://api.openai.com/v1")
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Model identifier sent with every request
    pub default_model: String,
}

impl ProviderConfig {
    pub fn openrouter() -> Self {
        Self::custom(
            "OpenRouter",
            "https://openrouter.ai/api/v1",
            "OPENROUTER_API_KEY",
            "anthropic/claude-sonnet-4",
        )
    }

    pub fn openai() -> Self {
        Self::custom("OpenAI", "https://api.openai.com/v1", "OPENAI_API_KEY", "gpt-4o")
    }

    pub fn deepseek() -> Self {
        Self::custom(
            "DeepSeek",
            "https://api.deepseek.com/v1",
            "DEEPSEEK_API_KEY",
            "deepseek-chat",
        )
    }

    pub fn moonshot() -> Self {
        Self::custom(
            "Moonshot",
            "https://api.moonshot.ai/v1",
            "MOONSHOT_API_KEY",
            "kimi-k2-0711-preview",
        )
    }

    /// A custom endpoint (LM Studio, vLLM, ...)
    pub fn custom(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key_env: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            default_model: default_model.into(),
        }
    }

    /// Preset by name, case-insensitive
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "openrouter" => Some(Self::openrouter()),
            "openai" => Some(Self::openai()),
            "deepseek" => Some(Self::deepseek()),
            "moonshot" | "kimi" => Some(Self::moonshot()),
            _ => None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::openrouter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_lookup() {
        assert_eq!(ProviderConfig::preset("OpenAI"), Some(ProviderConfig::openai()));
        assert_eq!(ProviderConfig::preset("kimi").unwrap().name, "Moonshot");
        assert!(ProviderConfig::preset("nope").is_none());
    }

    #[test]
    fn test_yaml_roundtrip_keeps_fields() {
        let config = ProviderConfig::deepseek().with_model("deepseek-reasoner");
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("api_key_env: DEEPSEEK_API_KEY"));
        let back: ProviderConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.default_model, "deepseek-reasoner");
    }
}
