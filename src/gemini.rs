//! Gemini `generateContent` client.
//!
//! Requests are made with a blocking HTTP client; callers on an async runtime must run
//! [`GeminiModel::generate`] on a blocking worker.

use crate::{
    config::{DEFAULT_BASE_URL, GenerationConfig, ModelConfig, SafetySetting},
    error::RemoteError,
    model::{Credential, ModelFactory, MultimodalPrompt, PromptPart, ReceiptModel},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Builds [`GeminiModel`] handles against a configurable endpoint.
#[derive(Clone, Debug)]
pub struct GeminiFactory {
    base_url: String,
    timeout: Duration,
}

impl Default for GeminiFactory {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GeminiFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ModelFactory for GeminiFactory {
    type Model = GeminiModel;

    fn create(
        &self,
        credential: &Credential,
        config: &ModelConfig,
    ) -> Result<Self::Model, RemoteError> {
        // The key is only checked by the service on the first request.
        let http = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;

        Ok(GeminiModel {
            http,
            url: generate_url(&self.base_url, &config.model),
            api_key: credential.clone(),
            generation_config: config.generation_config.clone(),
            safety_settings: config.safety_settings.clone(),
        })
    }
}

/// A model handle bound to one credential and one configuration.
pub struct GeminiModel {
    http: reqwest::blocking::Client,
    url: String,
    api_key: Credential,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

impl GeminiModel {
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_body<'a>(&'a self, prompt: &'a MultimodalPrompt) -> GenerateContentRequest<'a> {
        let parts = prompt
            .parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => Part::Text(text),
                PromptPart::Image(image) => Part::InlineData(Blob {
                    mime_type: image.mime_type,
                    data: BASE64.encode(&image.data),
                }),
            })
            .collect();

        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: &self.generation_config,
            safety_settings: &self.safety_settings,
        }
    }
}

impl ReceiptModel for GeminiModel {
    fn generate(&self, prompt: &MultimodalPrompt) -> Result<String, RemoteError> {
        let body = self.request_body(prompt);

        log::debug!("Gemini request: url={}, parts={}", self.url, prompt.parts.len());
        let start_time = Instant::now();

        let response = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body)
            .send()?;

        let status = response.status();
        log::info!(
            "Gemini response: status={}, elapsed={:.2}s",
            status,
            start_time.elapsed().as_secs_f64()
        );

        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(RemoteError::Api {
                status,
                message: api_error_message(&text),
            });
        }

        let parsed: GenerateContentResponse = response.json()?;
        parsed.into_text()
    }
}

fn generate_url(base_url: &str, model: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let model = model.trim();
    if model.starts_with("models/") {
        format!("{base}/{model}:generateContent")
    } else {
        format!("{base}/models/{model}:generateContent")
    }
}

/// Extracts `error.message` from a Gemini error body, falling back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: &'a GenerationConfig,
    safety_settings: &'a [SafetySetting],
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    Text(&'a str),
    InlineData(Blob),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String, RemoteError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(RemoteError::Blocked(format!("prompt blocked ({reason})")));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or(RemoteError::EmptyResponse)?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if !text.is_empty() {
            return Ok(text);
        }

        match candidate.finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => Err(
                RemoteError::Blocked(format!("finish reason {reason}")),
            ),
            Some(reason) => Err(RemoteError::InvalidResponse(format!(
                "candidate has no text (finish reason {reason})"
            ))),
            None => Err(RemoteError::InvalidResponse(
                "candidate has no text".to_string(),
            )),
        }
    }
}
