//! Model adapter: one capability trait, one implementation per backend.
//!
//! The orchestrator only ever sees [`ModelBackend`]; which implementation
//! sits behind it is decided once, from [`ProviderConfig`], in
//! [`create_backend`]:
//!
//! | `provider`          | Backend                | Transport                      |
//! |---------------------|------------------------|--------------------------------|
//! | `vertex`            | [`VertexBackend`]      | Vertex AI `generateContent`    |
//! | anything else       | [`LlmProviderBackend`] | edgequake-llm `ProviderFactory`|
//!
//! No retries happen here. A failed call is reported as
//! [`BackendError::Unavailable`] or [`BackendError::Timeout`] and the
//! orchestrator turns it into a fatal error carrying the document id.

use crate::error::Rx2JsonError;
use crate::pipeline::encode;
use crate::pipeline::request::ModelRequest;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Default model when a provider is named without one.
pub fn default_model(provider: &str) -> &'static str {
    match provider {
        "vertex" => "gemini-1.5-pro",
        "anthropic" => "claude-sonnet-4-20250514",
        "gemini" => "gemini-2.0-flash",
        _ => "gpt-4o-mini",
    }
}

/// Which backend to talk to, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// `openai`, `vertex`, `anthropic`, `gemini`, `ollama`, …
    pub provider: String,
    pub model: String,
    /// Region for cloud-hosted variants (Vertex). Default: `us-central1`.
    pub location: Option<String>,
}

impl ProviderConfig {
    /// Provider with its default model.
    pub fn new(provider: impl Into<String>) -> Self {
        let provider = provider.into().trim().to_lowercase();
        let model = default_model(&provider).to_string();
        Self {
            provider,
            model,
            location: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_vertex(&self) -> bool {
        self.provider == "vertex"
    }

    /// Region, falling back to `us-central1`.
    pub fn location_or_default(&self) -> &str {
        self.location.as_deref().unwrap_or("us-central1")
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new("openai")
    }
}

impl fmt::Display for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Sampling and transport settings shared by all backends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

/// Unvalidated model output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawModelResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl RawModelResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Failure of a single backend call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Transport, HTTP or authentication failure.
    #[error("{0}")]
    Unavailable(String),

    /// No answer within the deadline.
    #[error("no response within {secs}s")]
    Timeout { secs: u64 },
}

/// "Accepts text + ordered image parts, returns text."
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Provider name used in logs and errors.
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    async fn invoke(&self, request: &ModelRequest) -> Result<RawModelResponse, BackendError>;
}

/// Call `backend` and give up after `deadline`.
pub async fn invoke_with_deadline(
    backend: &dyn ModelBackend,
    request: &ModelRequest,
    deadline: Duration,
) -> Result<RawModelResponse, BackendError> {
    let start = Instant::now();
    match tokio::time::timeout(deadline, backend.invoke(request)).await {
        Ok(Ok(response)) => {
            debug!(
                "{}/{}: {} input tokens, {} output tokens, {:?}",
                backend.provider(),
                backend.model(),
                response.input_tokens,
                response.output_tokens,
                start.elapsed()
            );
            Ok(response)
        }
        Ok(Err(e)) => {
            warn!("{}/{} failed: {}", backend.provider(), backend.model(), e);
            Err(e)
        }
        Err(_) => {
            warn!(
                "{}/{} exceeded the {}s deadline",
                backend.provider(),
                backend.model(),
                deadline.as_secs()
            );
            Err(BackendError::Timeout {
                secs: deadline.as_secs(),
            })
        }
    }
}

/// Construct the backend named by `config`.
pub fn create_backend(
    config: &ProviderConfig,
    options: GenerationOptions,
) -> Result<Arc<dyn ModelBackend>, Rx2JsonError> {
    if config.is_vertex() {
        Ok(Arc::new(VertexBackend::from_env(config, options)?))
    } else {
        Ok(Arc::new(LlmProviderBackend::from_config(config, options)?))
    }
}

// ── edgequake-llm ────────────────────────────────────────────────────────

/// Any provider edgequake-llm knows (openai, anthropic, gemini, azure,
/// ollama, lmstudio, …). API keys come from the provider's usual env var.
pub struct LlmProviderBackend {
    provider_name: String,
    model: String,
    inner: Arc<dyn LLMProvider>,
    options: GenerationOptions,
}

impl LlmProviderBackend {
    /// Wrap an already-built provider.
    pub fn new(
        provider_name: impl Into<String>,
        model: impl Into<String>,
        inner: Arc<dyn LLMProvider>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            model: model.into(),
            inner,
            options,
        }
    }

    pub fn from_config(
        config: &ProviderConfig,
        options: GenerationOptions,
    ) -> Result<Self, Rx2JsonError> {
        let inner = ProviderFactory::create_llm_provider(&config.provider, &config.model)
            .map_err(|e| Rx2JsonError::ProviderNotConfigured {
                provider: config.provider.clone(),
                hint: format!(
                    "{e}\nSet the provider's API key (e.g. OPENAI_API_KEY) or choose another --provider."
                ),
            })?;
        Ok(Self::new(&config.provider, &config.model, inner, options))
    }

    fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.options.temperature),
            max_tokens: Some(self.options.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ModelBackend for LlmProviderBackend {
    fn provider(&self) -> &str {
        &self.provider_name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<RawModelResponse, BackendError> {
        let images = request.images.iter().map(encode::to_image_data).collect();
        let messages = vec![
            ChatMessage::system(request.system.as_str()),
            ChatMessage::user_with_images(request.user_text.as_str(), images),
        ];

        let response = self
            .inner
            .chat(&messages, Some(&self.completion_options()))
            .await
            .map_err(|e| classify_error(&e.to_string(), self.options.timeout_secs))?;

        Ok(RawModelResponse {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Map a provider error message onto the two failure kinds.
fn classify_error(message: &str, timeout_secs: u64) -> BackendError {
    let lower = message.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        BackendError::Timeout { secs: timeout_secs }
    } else {
        BackendError::Unavailable(message.to_string())
    }
}

// ── Vertex AI ────────────────────────────────────────────────────────────

/// Gemini models on Vertex AI via the `generateContent` REST endpoint.
///
/// Needs `GOOGLE_CLOUD_PROJECT` (or `VERTEX_PROJECT`) and a bearer token in
/// `VERTEX_ACCESS_TOKEN` (or `GOOGLE_CLOUD_ACCESS_TOKEN`), e.g. from
/// `gcloud auth print-access-token`.
pub struct VertexBackend {
    model: String,
    location: String,
    project: String,
    access_token: String,
    client: reqwest::Client,
    options: GenerationOptions,
}

impl VertexBackend {
    pub fn new(
        config: &ProviderConfig,
        project: impl Into<String>,
        access_token: impl Into<String>,
        options: GenerationOptions,
    ) -> Result<Self, Rx2JsonError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| Rx2JsonError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            model: config.model.clone(),
            location: config.location_or_default().to_string(),
            project: project.into(),
            access_token: access_token.into(),
            client,
            options,
        })
    }

    pub fn from_env(config: &ProviderConfig, options: GenerationOptions) -> Result<Self, Rx2JsonError> {
        let not_configured = |hint: &str| Rx2JsonError::ProviderNotConfigured {
            provider: "vertex".to_string(),
            hint: hint.to_string(),
        };
        let project = first_env(&["GOOGLE_CLOUD_PROJECT", "VERTEX_PROJECT"])
            .ok_or_else(|| not_configured("Set GOOGLE_CLOUD_PROJECT to your GCP project id."))?;
        let token = first_env(&["VERTEX_ACCESS_TOKEN", "GOOGLE_CLOUD_ACCESS_TOKEN"]).ok_or_else(|| {
            not_configured("Set VERTEX_ACCESS_TOKEN, e.g. VERTEX_ACCESS_TOKEN=$(gcloud auth print-access-token).")
        })?;
        Self::new(config, project, token, options)
    }

    /// `generateContent` URL for this model and region.
    pub fn endpoint(&self) -> String {
        let host = if self.location == "global" {
            "aiplatform.googleapis.com".to_string()
        } else {
            format!("{}-aiplatform.googleapis.com", self.location)
        };
        format!(
            "https://{host}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.project, self.location, self.model
        )
    }

    fn build_body(&self, request: &ModelRequest) -> VertexRequest {
        let mut parts = vec![VertexPart::Text {
            text: request.user_text.clone(),
        }];
        parts.extend(request.images.iter().map(|page| VertexPart::InlineData {
            inline_data: VertexInlineData {
                mime_type: encode::PNG_MIME.to_string(),
                data: encode::to_base64(page),
            },
        }));

        VertexRequest {
            contents: vec![VertexContent {
                role: Some("user"),
                parts,
            }],
            system_instruction: VertexContent {
                role: None,
                parts: vec![VertexPart::Text {
                    text: request.system.clone(),
                }],
            },
            generation_config: VertexGenerationConfig {
                temperature: self.options.temperature,
                max_output_tokens: self.options.max_tokens,
                response_mime_type: "application/json",
            },
        }
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|n| std::env::var(n).ok())
        .find(|v| !v.trim().is_empty())
}

#[async_trait]
impl ModelBackend for VertexBackend {
    fn provider(&self) -> &str {
        "vertex"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<RawModelResponse, BackendError> {
        let body = self.build_body(request);
        let secs = self.options.timeout_secs;
        let transport_err = |e: reqwest::Error| {
            if e.is_timeout() {
                BackendError::Timeout { secs }
            } else {
                BackendError::Unavailable(format!("HTTP request failed: {e}"))
            }
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_err)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                408 | 504 => BackendError::Timeout { secs },
                401 | 403 => BackendError::Unavailable(format!(
                    "authentication failed (HTTP {status}): {}",
                    truncate(&detail, 300)
                )),
                _ => BackendError::Unavailable(format!(
                    "Vertex API error (HTTP {status}): {}",
                    truncate(&detail, 300)
                )),
            });
        }

        let parsed: VertexResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Unavailable(format!("Failed to parse Vertex response: {e}")))?;
        Ok(parsed.into_raw())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexRequest {
    contents: Vec<VertexContent>,
    system_instruction: VertexContent,
    generation_config: VertexGenerationConfig,
}

#[derive(Debug, Serialize)]
struct VertexContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<VertexPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum VertexPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: VertexInlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexGenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
    response_mime_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VertexResponse {
    #[serde(default)]
    candidates: Vec<VertexCandidate>,
    usage_metadata: Option<VertexUsage>,
}

#[derive(Debug, Deserialize)]
struct VertexCandidate {
    content: Option<VertexResponseContent>,
}

#[derive(Debug, Deserialize)]
struct VertexResponseContent {
    #[serde(default)]
    parts: Vec<VertexResponsePart>,
}

#[derive(Debug, Deserialize)]
struct VertexResponsePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VertexUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl VertexResponse {
    /// Concatenate the text parts of the first candidate.
    fn into_raw(self) -> RawModelResponse {
        let text = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .unwrap_or_default();
        let usage = self.usage_metadata.unwrap_or_default();
        RawModelResponse {
            text,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        }
    }
}
