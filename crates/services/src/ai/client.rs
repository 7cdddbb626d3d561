use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use review_core::model::{QuestionDraft, ResponseType};

use crate::error::GenerationError;

use super::repair::{diagnostic_drafts, parse_with_repair};

//
// ─── REQUEST / RESPONSE TYPES ──────────────────────────────────────────────────
//

/// How the collaborator should spread question kinds across the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    /// Mix of response types across the batch.
    Balanced,
    /// Every item uses the requested response type.
    SingleType,
}

/// Request sent to the question-generation collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub source_text: String,
    pub count: usize,
    pub title: String,
    pub related_context: Option<String>,
    pub distribution_mode: DistributionMode,
    /// Recent question texts the collaborator must not repeat as angles.
    pub exclusion_list: Vec<String>,
    pub language: String,
    pub response_type: ResponseType,
}

/// Response payload, tolerant of missing optional fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationResponse {
    #[serde(default)]
    pub questions: Vec<QuestionDraft>,
    #[serde(default)]
    pub subject_emoji: Option<String>,
    #[serde(default)]
    pub suggested_title: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// The question-generation collaborator.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    /// Produce question drafts for the given request.
    ///
    /// # Errors
    ///
    /// Returns `GenerationError` when the collaborator is unavailable after
    /// retries. Malformed output that survives the repair pass and a single
    /// regeneration is replaced by a diagnostic set, not an error.
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError>;
}

//
// ─── HTTP CLIENT ───────────────────────────────────────────────────────────────
//

#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl GeneratorConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("REVIEW_AI_API_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let base_url =
            env::var("REVIEW_AI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
        let model = env::var("REVIEW_AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
        Some(Self {
            base_url,
            api_key,
            model,
        })
    }
}

const MAX_TRANSIENT_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct HttpQuestionGenerator {
    client: Client,
    config: Option<GeneratorConfig>,
}

impl HttpQuestionGenerator {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(GeneratorConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<GeneratorConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }

    async fn generate_once(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let config = self.config.as_ref().ok_or(GenerationError::Disabled)?;

        let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        let body = serde_json::to_string(request)
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        let payload = ChatRequest {
            model: config.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: body,
            }],
            temperature: 0.7,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&config.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenerationError::HttpStatus(response.status()));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(GenerationError::Empty)?;

        parse_with_repair(&content)
    }
}

#[async_trait]
impl QuestionGenerator for HttpQuestionGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let mut transient_attempts = 0;
        let mut malformed_retried = false;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match self.generate_once(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() => {
                    transient_attempts += 1;
                    if transient_attempts >= MAX_TRANSIENT_ATTEMPTS {
                        return Err(err);
                    }
                    debug!(attempt = transient_attempts, error = %err, "transient generation failure, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(GenerationError::Malformed(reason)) => {
                    // One full regeneration after a failed repair, then the
                    // fixed diagnostic set so the session always has content.
                    if malformed_retried {
                        warn!(%reason, "generation output unrecoverable, serving diagnostic set");
                        return Ok(GenerationResponse {
                            questions: diagnostic_drafts(request.count),
                            ..GenerationResponse::default()
                        });
                    }
                    debug!(%reason, "generation output malformed, regenerating once");
                    malformed_retried = true;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

//
// ─── WIRE TYPES ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}
