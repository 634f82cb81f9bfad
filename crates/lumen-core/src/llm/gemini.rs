//! Google Gemini provider using the `generateContent` API.
//!
//! Sends the instruction and the image as inline base64 data in a single
//! user turn and returns the generated text verbatim.

use super::provider::{extract_error_message, LlmProvider, LlmRequest, LlmResponse};
use crate::error::GenerateError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const PROVIDER: &str = "gemini";

/// Gemini provider bound to one API key and model.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(endpoint: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

// --- Request types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    InlineData {
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

// --- Response types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u32>,
}

fn build_request(request: &LlmRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts: vec![
                Part::Text {
                    text: request.prompt.clone(),
                },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: request.image.media_type.clone(),
                        data: request.image.data.clone(),
                    },
                },
            ],
        }],
        generation_config: GenerationConfig {
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
        },
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: &GenerateContentResponse) -> Result<String, GenerateError> {
    let Some(candidate) = response.candidates.first() else {
        let reason = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
            .unwrap_or("no candidates returned");
        return Err(GenerateError::from_response(
            PROVIDER,
            None,
            format!("no content generated ({reason})"),
        ));
    };

    let text: String = candidate
        .content
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.as_deref().unwrap_or("empty response");
        return Err(GenerateError::from_response(
            PROVIDER,
            None,
            format!("no text generated ({reason})"),
        ));
    }
    Ok(text)
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, GenerateError> {
        let start = Instant::now();

        let resp = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(request))
            .timeout(self.timeout())
            .send()
            .await
            .map_err(|e| GenerateError::network(format!("Gemini request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerateError::from_response(
                PROVIDER,
                Some(status.as_u16()),
                format!("HTTP {status}: {}", extract_error_message(&body)),
            ));
        }

        let parsed: GenerateContentResponse = resp.json().await.map_err(|e| {
            GenerateError::from_response(PROVIDER, None, format!("unreadable response: {e}"))
        })?;

        let text = extract_text(&parsed)?;
        tracing::debug!("Gemini returned {} chars in {:?}", text.len(), start.elapsed());

        Ok(LlmResponse {
            text,
            model: parsed.model_version.unwrap_or_else(|| self.model.clone()),
            tokens_used: parsed.usage_metadata.and_then(|u| u.total_token_count),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ImageInput;

    fn request() -> LlmRequest {
        LlmRequest {
            image: ImageInput::from_bytes(&[1, 2, 3], "image/png"),
            prompt: "Describe as a prompt.".to_string(),
            max_tokens: 256,
            temperature: 0.4,
        }
    }

    #[test]
    fn test_url_includes_model() {
        let provider = GeminiProvider::new(
            "https://generativelanguage.googleapis.com/v1beta/",
            "k",
            "gemini-2.0-flash",
            Duration::from_secs(5),
        );
        assert_eq!(
            provider.url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_request_shape() {
        let json = serde_json::to_value(build_request(&request())).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "Describe as a prompt.");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "AQID");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn test_extract_text_concatenates_parts_verbatim() {
        let body = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "A red bicycle "}, {"text": "leaning on a wall.\n"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"totalTokenCount": 321},
            "modelVersion": "gemini-2.0-flash-001"
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            extract_text(&parsed).unwrap(),
            "A red bicycle leaning on a wall.\n"
        );
    }

    #[test]
    fn test_extract_text_blocked_prompt() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let err = extract_text(&parsed).unwrap_err();
        assert!(matches!(err, GenerateError::Provider { .. }));
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_extract_text_empty_candidate() {
        let body = r#"{"candidates": [{"finishReason": "MAX_TOKENS"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let err = extract_text(&parsed).unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }
}
