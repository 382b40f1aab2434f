use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::GenerationConfig;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Text generation is not configured")]
    Unavailable,
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Generation service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed generation response: {0}")]
    Malformed(String),
    #[error("Generation service returned no content")]
    Empty,
}

pub type GenerationResult<T> = std::result::Result<T, GenerationError>;

/// Text generation collaborator used for candidate re-ranking.
///
/// Any error is recoverable: callers fall back to heuristics.
#[async_trait]
pub trait TextGenerationService: Send + Sync {
    async fn generate(&self, system_prompt: &str, human_prompt: &str) -> GenerationResult<String>;
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

/// Chat-completions client for OpenAI-compatible endpoints
#[derive(Debug, Clone)]
pub struct HttpTextGenerator {
    client: reqwest::Client,
    config: GenerationConfig,
    timeout: Duration,
}

impl HttpTextGenerator {
    pub fn new(config: GenerationConfig, timeout: Duration) -> GenerationResult<Self> {
        if !config.is_enabled() {
            return Err(GenerationError::Unavailable);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config,
            timeout,
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, system_prompt: &str, human_prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": &self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": human_prompt}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }
}

fn extract_content(body: &[u8]) -> GenerationResult<String> {
    let response: CompletionResponse =
        serde_json::from_slice(body).map_err(|e| GenerationError::Malformed(e.to_string()))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(GenerationError::Empty)
}

#[async_trait]
impl TextGenerationService for HttpTextGenerator {
    async fn generate(&self, system_prompt: &str, human_prompt: &str) -> GenerationResult<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenerationError::Unavailable)?;

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&self.request_body(system_prompt, human_prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.timeout)
                } else {
                    GenerationError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        extract_content(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_first_choice() {
        let body = br#"{"choices":[{"message":{"role":"assistant","content":"{\"rankings\":[]}"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), r#"{"rankings":[]}"#);
    }

    #[test]
    fn test_extract_empty_choices() {
        assert!(matches!(
            extract_content(br#"{"choices":[]}"#),
            Err(GenerationError::Empty)
        ));
        assert!(matches!(
            extract_content(br#"{"choices":[{"message":{"content":"  "}}]}"#),
            Err(GenerationError::Empty)
        ));
    }

    #[test]
    fn test_extract_garbage() {
        assert!(matches!(
            extract_content(b"<html>"),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn test_disabled_config_is_unavailable() {
        let result = HttpTextGenerator::new(GenerationConfig::default(), Duration::from_secs(1));
        assert!(matches!(result, Err(GenerationError::Unavailable)));
    }

    #[test]
    fn test_request_body_uses_configured_model() {
        let generator = HttpTextGenerator::new(
            GenerationConfig {
                api_key: Some("sk-test".into()),
                model: "local-model".into(),
                ..GenerationConfig::default()
            },
            Duration::from_secs(1),
        )
        .unwrap();

        let body = generator.request_body("sys", "human");
        assert_eq!(body["model"], "local-model");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["messages"][1]["content"], "human");
    }
}
