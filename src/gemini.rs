//! Gemini API client
//!
//! Implements [`GenerativeProvider`] over the `generateContent` endpoint.
//! Uses a long-lived reqwest::Client for connection pooling.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::error::OrchestrationError;
use crate::generation::GenerativeProvider;
use crate::Result;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: format!("{}/{}:generateContent", BASE_URL, model),
        })
    }

    fn build_request(prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
        }
    }
}

#[async_trait::async_trait]
impl GenerativeProvider for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::fatal_provider("GEMINI_API_KEY not configured"));
        }

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let request = Self::build_request(prompt);

        info!("Calling Gemini API");

        let response = self.client.post(&url).json(&request).send().await.map_err(|e| {
            error!("Gemini API request failed: {}", e);
            OrchestrationError::Provider {
                retriable: e.is_timeout() || e.is_connect() || e.is_request(),
                message: format!("Gemini API error: {}", e),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::Provider {
                retriable: is_retriable_status(status),
                message: format!("Gemini API returned {}: {}", status, error_text),
            });
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::fatal_provider(format!("Gemini parse error: {}", e))
        })?;

        extract_text(gemini_response)
    }
}

fn is_retriable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn extract_text(response: GeminiResponse) -> Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| OrchestrationError::retriable_provider("No response from Gemini API"))?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(OrchestrationError::fatal_provider("Gemini blocked the response for safety"));
    }

    let text: String = candidate
        .content
        .parts
        .into_iter()
        .map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(OrchestrationError::retriable_provider("Empty response from Gemini"));
    }

    info!(chars = text.len(), "Gemini response received");
    Ok(text)
}

const SYSTEM_PROMPT: &str = r#"You are a financial education assistant.

Guidelines:
- Summarize and paraphrase the analysis you are given; never add new figures
- Do not give advice, recommendations, or prescriptions
- Never tell the user what to buy, sell, or invest in
- Prefer reflective questions over directives
- Keep answers short and neutral

When asked for JSON, reply with a single JSON object and nothing else."#;

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GeminiClient::build_request("Summarize my savings findings");
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("Summarize my savings findings"));
        assert!(json.contains("Do not give advice"));
    }

    #[test]
    fn test_endpoint_uses_model() {
        let client = GeminiClient::new("key", "gemini-2.0-flash").unwrap();
        assert!(client.endpoint.ends_with("/gemini-2.0-flash:generateContent"));
    }

    #[test]
    fn test_status_classification() {
        assert!(is_retriable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retriable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retriable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retriable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "Hello "}, {"text": "there"}]}, "finishReason": "STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Hello there");
    }

    #[test]
    fn test_safety_block_is_fatal() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]}"#,
        )
        .unwrap();
        let err = extract_text(response).unwrap_err();
        assert!(!err.is_retriable());
    }
}
