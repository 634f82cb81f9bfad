//! OpenRouter provider using the OpenAI-compatible Chat Completions API.
//!
//! Sends the image as a data URL in the user message content array, then
//! normalizes the chatty completion into a bare prompt.

use super::cleanup::clean_prompt;
use super::provider::{extract_error_message, LlmProvider, LlmRequest, LlmResponse};
use crate::error::GenerateError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const PROVIDER: &str = "openrouter";

/// OpenRouter provider bound to one API key and model.
pub struct OpenRouterProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    site_url: Option<String>,
    app_name: Option<String>,
}

impl OpenRouterProvider {
    pub fn new(endpoint: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", endpoint.trim_end_matches('/')),
            timeout,
            site_url: None,
            app_name: None,
        }
    }

    /// Set the optional `HTTP-Referer` / `X-Title` attribution headers.
    pub fn with_attribution(mut self, site_url: Option<&str>, app_name: Option<&str>) -> Self {
        self.site_url = site_url.map(String::from);
        self.app_name = app_name.map(String::from);
        self
    }
}

// --- Request types ---

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ChatContent>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ChatContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<ChatUsage>,
    /// OpenRouter can report upstream failures inside a 200 response
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

fn build_request(model: &str, request: &LlmRequest) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: vec![
                ChatContent::Text {
                    text: request.prompt.clone(),
                },
                ChatContent::ImageUrl {
                    image_url: ImageUrl {
                        url: request.image.data_url(),
                    },
                },
            ],
        }],
    }
}

/// Pull the cleaned prompt out of a parsed completion.
fn extract_text(response: &ChatResponse) -> Result<String, GenerateError> {
    if let Some(error) = &response.error {
        let status = error
            .get("code")
            .and_then(|c| c.as_u64())
            .and_then(|c| u16::try_from(c).ok());
        let message = extract_error_message(&serde_json::json!({ "error": error }).to_string());
        return Err(GenerateError::from_response(PROVIDER, status, message));
    }

    let raw = response
        .choices
        .first()
        .and_then(|c| c.message.content.as_deref())
        .ok_or_else(|| {
            GenerateError::from_response(
                PROVIDER,
                None,
                "empty choices array, no content generated".to_string(),
            )
        })?;

    let text = clean_prompt(raw);
    if text.is_empty() {
        return Err(GenerateError::from_response(
            PROVIDER,
            None,
            "response was empty after cleanup".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, GenerateError> {
        let start = Instant::now();

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if let Some(site_url) = &self.site_url {
            builder = builder.header("HTTP-Referer", site_url);
        }
        if let Some(app_name) = &self.app_name {
            builder = builder.header("X-Title", app_name);
        }

        let resp = builder
            .json(&build_request(&self.model, request))
            .timeout(self.timeout())
            .send()
            .await
            .map_err(|e| GenerateError::network(format!("OpenRouter request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerateError::from_response(
                PROVIDER,
                Some(status.as_u16()),
                format!("HTTP {status}: {}", extract_error_message(&body)),
            ));
        }

        let chat_resp: ChatResponse = resp.json().await.map_err(|e| {
            GenerateError::from_response(PROVIDER, None, format!("unreadable response: {e}"))
        })?;

        let text = extract_text(&chat_resp)?;

        Ok(LlmResponse {
            text,
            model: chat_resp.model.unwrap_or_else(|| self.model.clone()),
            tokens_used: chat_resp.usage.map(|u| u.total_tokens),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
