//! OpenAI-compatible chat completions client
//!
//! Works with any endpoint exposing `POST {endpoint}/chat/completions`.

use crate::extract::{ExtractionError, ExtractionModel};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SYSTEM_PROMPT: &str =
    "You extract structured product data from web pages and answer only with JSON.";

/// Chat completions backed extraction model
#[derive(Debug, Clone)]
pub struct OpenAiModel {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiModel {
    /// Builds a client for the given endpoint
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Base URL, e.g. `https://api.openai.com/v1`
    /// * `model` - Model name sent with every request
    /// * `api_key` - Bearer token, omitted for local endpoints
    /// * `timeout` - Per-request timeout
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

#[async_trait]
impl ExtractionModel for OpenAiModel {
    async fn complete(&self, prompt: &str) -> Result<String, ExtractionError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        });

        let mut request = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExtractionError::Model(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Model(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                self.completions_url(),
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Model(format!("malformed completion: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExtractionError::Model("completion has no content".to_string()))
    }
}
