pub mod annotator;
pub mod providers;

pub use annotator::{AnnotationError, Annotator};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// LLM provider types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LLMProvider {
    Anthropic,
    OpenAI,
    LMStudio,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    /// Provider default when unset; required for LMStudio
    pub endpoint: Option<String>,
    /// Never written to config files; supplied on the command line or via `api_key_env`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable consulted when no key is given explicitly
    pub api_key_env: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Anthropic,
            endpoint: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 4000,
            temperature: 0.0,
            timeout_seconds: 120,
        }
    }
}

impl LLMConfig {
    /// Same provider settings with a different model and token limit
    pub fn with_model(&self, model: &str, max_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            ..self.clone()
        }
    }

    /// Explicit key first, then the configured environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty()))
    }

    /// Whether this provider can be used without a key
    pub fn requires_api_key(&self) -> bool {
        self.provider != LLMProvider::LMStudio
    }
}

/// Chat message for LLM communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// LLM response
#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub content: String,
    pub tokens_used: Option<u32>,
}

/// Trait for LLM providers
#[async_trait]
pub trait LLM: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse>;
    async fn is_available(&self) -> bool;
    fn provider_type(&self) -> LLMProvider;
}

/// Create LLM instance based on configuration
pub fn create_llm(config: &LLMConfig) -> Result<Box<dyn LLM>> {
    let mut config = config.clone();
    config.api_key = config.resolve_api_key();

    match config.provider {
        LLMProvider::Anthropic => Ok(Box::new(providers::AnthropicProvider::new(config)?)),
        LLMProvider::OpenAI => Ok(Box::new(providers::OpenAIProvider::new(config)?)),
        LLMProvider::LMStudio => Ok(Box::new(providers::LMStudioProvider::new(config)?)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_key_wins() {
        let config = LLMConfig {
            api_key: Some("sk-test".to_string()),
            api_key_env: "STUDY_BIBLE_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_missing_key_is_none() {
        let config = LLMConfig {
            api_key: Some("  ".to_string()),
            api_key_env: "STUDY_BIBLE_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        assert!(config.resolve_api_key().is_none());
        assert!(create_llm(&config).is_err());
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let config = LLMConfig {
            api_key: Some("secret".to_string()),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_with_model_keeps_provider() {
        let config = LLMConfig::default().with_model("claude-haiku-4-5-20251001", 300);
        assert_eq!(config.provider, LLMProvider::Anthropic);
        assert_eq!(config.max_tokens, 300);
    }
}
