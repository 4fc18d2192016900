use super::{create_llm, ChatMessage, LLMConfig, LLM};
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Why an annotation request produced no usable result
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("malformed JSON in model response: {0}")]
    MalformedJson(String),

    #[error("model response is not a JSON object")]
    NotAnObject,

    #[error("annotation rejected: {0}")]
    Rejected(String),
}

/// Sends one prompt per request and extracts a single JSON object from the reply
#[derive(Clone)]
pub struct Annotator {
    llm: Arc<dyn LLM>,
}

impl Annotator {
    pub fn new(llm: Arc<dyn LLM>) -> Self {
        Self { llm }
    }

    pub fn from_config(config: &LLMConfig) -> Result<Self> {
        Ok(Self::new(Arc::from(create_llm(config)?)))
    }

    pub async fn is_available(&self) -> bool {
        self.llm.is_available().await
    }

    /// Send `prompt` and parse the reply into a JSON object
    pub async fn annotate(&self, prompt: &str) -> Result<Value, AnnotationError> {
        let response = self
            .llm
            .chat(vec![ChatMessage::user(prompt)])
            .await
            .map_err(|e| AnnotationError::Request(e.to_string()))?;

        if let Some(tokens) = response.tokens_used {
            debug!("{:?} used {} tokens", self.llm.provider_type(), tokens);
        }

        parse_json_object(&response.content)
    }

    /// Like [`Annotator::annotate`], decoded into `T`
    pub async fn annotate_as<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, AnnotationError> {
        let value = self.annotate(prompt).await?;
        serde_json::from_value(value).map_err(|e| AnnotationError::MalformedJson(e.to_string()))
    }
}

/// Strip surrounding markdown code fences
pub fn clean_llm_response(content: &str) -> String {
    let content = content.trim();

    // ```json ... ``` or ``` ... ```
    if content.starts_with("```") {
        if let Some(start) = content.find('\n') {
            if let Some(end) = content.rfind("```") {
                if end > start {
                    return content[start + 1..end].trim().to_string();
                }
            }
        }
    }

    content.replace("```", "").trim().to_string()
}

/// Parse a model reply that should contain exactly one JSON object.
///
/// Falls back to the outermost `{ ... }` substring when the reply carries
/// surrounding prose.
pub fn parse_json_object(content: &str) -> Result<Value, AnnotationError> {
    let cleaned = clean_llm_response(content);
    if cleaned.is_empty() {
        return Err(AnnotationError::EmptyResponse);
    }

    let value = match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => value,
        Err(first_error) => outermost_object(&cleaned)
            .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok())
            .ok_or_else(|| AnnotationError::MalformedJson(first_error.to_string()))?,
    };

    if value.is_object() {
        Ok(value)
    } else {
        Err(AnnotationError::NotAnObject)
    }
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockLLM;
    use serde::Deserialize;

    #[test]
    fn test_strips_code_fences() {
        let value = parse_json_object("```json\n{\"summary\": \"Licht\"}\n```").unwrap();
        assert_eq!(value["summary"], "Licht");
    }

    #[test]
    fn test_single_line_fence_falls_back_to_braces() {
        let value = parse_json_object("```json{\"a\": 1}```").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_outermost_object_with_trailing_prose() {
        let value = parse_json_object("Hier ist das Ergebnis: {\"a\": {\"b\": 2}} Viel Erfolg!").unwrap();
        assert_eq!(value["a"]["b"], 2);
    }

    #[test]
    fn test_error_categories() {
        assert!(matches!(parse_json_object("   "), Err(AnnotationError::EmptyResponse)));
        assert!(matches!(parse_json_object("keine Ahnung"), Err(AnnotationError::MalformedJson(_))));
        assert!(matches!(parse_json_object("[1, 2]"), Err(AnnotationError::NotAnObject)));
    }

    #[tokio::test]
    async fn test_annotate_as_typed() {
        #[derive(Deserialize)]
        struct Reply {
            speaker: Option<String>,
        }

        let annotator = Annotator::new(Arc::new(MockLLM::new(["{\"speaker\": \"Anna\"}"])));
        let reply: Reply = annotator.annotate_as("prompt").await.unwrap();
        assert_eq!(reply.speaker.as_deref(), Some("Anna"));
    }

    #[tokio::test]
    async fn test_request_failure_is_categorized() {
        let annotator = Annotator::new(Arc::new(MockLLM::failing("timeout")));
        let result = annotator.annotate("prompt").await;
        assert!(matches!(result, Err(AnnotationError::Request(msg)) if msg.contains("timeout")));
    }
}
