// src/llm/client.rs
// OpenAI-compatible chat client for the enrichment provider

use super::prompt::{entity_enrichment_prompt, topics_prompt};
use super::{Enrichment, EnrichmentProvider, GeneratedTopic, LlmError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const DEFAULT_API_URL: &str = "https://api.deepseek.com/chat/completions";
const DEFAULT_MODEL: &str = "deepseek-chat";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Production enrichment client over an OpenAI-compatible chat API.
pub struct EnrichmentClient {
    api_key: String,
    model: String,
    thinking_budget: u32,
    api_url: String,
    http: Client,
}

impl EnrichmentClient {
    pub fn new(api_key: String, model: Option<String>, thinking_budget: u32) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            thinking_budget,
            api_url: DEFAULT_API_URL.to_string(),
            http,
        }
    }

    /// Point the client at a different endpoint (tests, self-hosted models).
    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// One chat call. 429 maps to the dedicated rate-limit error carrying
    /// Retry-After; everything else non-2xx is a provider error.
    async fn chat(&self, prompt: String) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": 2048,
            "thinking_budget": self.thinking_budget,
        });

        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(LlmError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!("API error {status}: {body}")));
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }
        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: String,
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Provider(format!("malformed response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Provider("empty choices".to_string()))?;
        debug!(model = %self.model, chars = content.len(), "enrichment response received");
        Ok(content)
    }
}

/// Strip optional markdown code fences around a JSON answer.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[async_trait]
impl EnrichmentProvider for EnrichmentClient {
    async fn enrich_summary_keywords(
        &self,
        name: &str,
        file_path: &str,
        content: &str,
    ) -> Result<Enrichment, LlmError> {
        let answer = self
            .chat(entity_enrichment_prompt(name, file_path, content))
            .await?;
        serde_json::from_str(strip_code_fences(&answer))
            .map_err(|e| LlmError::Provider(format!("unparseable enrichment answer: {e}")))
    }

    async fn generate_topics(&self, transcript: &str) -> Result<Vec<GeneratedTopic>, LlmError> {
        let answer = self.chat(topics_prompt(transcript)).await?;
        serde_json::from_str(strip_code_fences(&answer))
            .map_err(|e| LlmError::Provider(format!("unparseable topics answer: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_default_model() {
        let client = EnrichmentClient::new("key".into(), None, 1000);
        assert_eq!(client.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn test_custom_model() {
        let client = EnrichmentClient::new("key".into(), Some("deepseek-reasoner".into()), 1000);
        assert_eq!(client.model_name(), "deepseek-reasoner");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1,2]\n```"), "[1,2]");
    }
}
