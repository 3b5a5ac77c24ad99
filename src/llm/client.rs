use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::llm::prompt::{ChatMessage, ModelParams, Prompt};

const PROMPT_ABI_VERSION: &str = "v1-testforge";

/// Outcome of a single generation call. Failures are values, not errors:
/// the orchestrator decides what a failed call means for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    pub success: bool,
    pub content: String,
    pub error_message: String,
}

impl LlmResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error_message: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error_message: error.into(),
        }
    }
}

/// Text-generation capability consumed by the orchestrator.
pub trait GenerationService: Send + Sync {
    fn get_response(&self, prompt: &Prompt, params: &ModelParams) -> LlmResponse;
}

/* ============================================================
   OpenAI-compatible chat completions
   ============================================================ */

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct RestClient {
    url: String,
    api_key: String,
    http: reqwest::blocking::Client,
}

impl RestClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, String> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            url: url.into(),
            api_key: api_key.into(),
            http,
        })
    }

    fn send(&self, prompt: &Prompt, params: &ModelParams) -> Result<String, String> {
        let body = ChatRequest {
            model: &params.model,
            messages: &prompt.messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        tracing::debug!(url = %self.url, prompt = %hash_prompt(prompt), "chat completion request");

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        let raw = resp.text().map_err(|e| e.to_string())?;

        if !status.is_success() {
            tracing::error!(%status, body = %raw, "LLM request failed");
            return Err(format!(
                "API error: {}",
                status.canonical_reason().unwrap_or(status.as_str())
            ));
        }

        extract_content(&raw)
    }
}

impl GenerationService for RestClient {
    fn get_response(&self, prompt: &Prompt, params: &ModelParams) -> LlmResponse {
        match self.send(prompt, params) {
            Ok(text) => LlmResponse::ok(text),
            Err(e) => LlmResponse::failed(e),
        }
    }
}

fn extract_content(raw: &str) -> Result<String, String> {
    let parsed: ChatResponse =
        serde_json::from_str(raw).map_err(|e| format!("response parse failure: {e}"))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| "response contained no choices".to_string())
}

/// Stable fingerprint of a prompt, for correlating log lines.
pub fn hash_prompt(prompt: &Prompt) -> String {
    let mut h = Sha256::new();
    h.update(PROMPT_ABI_VERSION.as_bytes());
    for m in &prompt.messages {
        h.update(m.content.as_bytes());
    }
    hex::encode(&h.finalize()[..8])
}
