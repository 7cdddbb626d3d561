use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use review_core::model::Question;

use crate::error::ImageError;

//
// ─── REQUEST / RESPONSE TYPES ──────────────────────────────────────────────────
//

/// Opaque request to the image-rendering collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IllustrationRequest {
    pub prompt: String,
    pub style: Option<String>,
    pub size: Option<String>,
}

impl IllustrationRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            style: None,
            size: None,
        }
    }

    /// Request for a question's illustration, falling back to the question
    /// text when no explicit illustration prompt was generated.
    #[must_use]
    pub fn for_question(question: &Question) -> Self {
        let prompt = if question.illustration_prompt().trim().is_empty() {
            question.text()
        } else {
            question.illustration_prompt()
        };
        Self::new(prompt)
    }

    /// Content hash of the request parameters; the persisted cache key.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prompt.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.style.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.size.as_deref().unwrap_or_default().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A rendered illustration: where it lives and how large it came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub url: Url,
    pub byte_len: u64,
}

/// The image-rendering collaborator, treated as a black box.
#[async_trait]
pub trait ImageRenderer: Send + Sync {
    /// Render one illustration.
    ///
    /// # Errors
    ///
    /// Returns `ImageError` when the collaborator is unavailable or returns an
    /// unusable result. Failures are not retried here; callers buffer the item
    /// unready and retry on a later refill.
    async fn render(&self, request: &IllustrationRequest) -> Result<RenderedImage, ImageError>;
}

//
// ─── HTTP CLIENT ───────────────────────────────────────────────────────────────
//

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub base_url: String,
    pub api_key: String,
}

impl RendererConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("REVIEW_IMAGE_API_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let base_url = env::var("REVIEW_IMAGE_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());
        Some(Self { base_url, api_key })
    }
}

#[derive(Clone)]
pub struct HttpImageRenderer {
    client: Client,
    config: Option<RendererConfig>,
}

impl HttpImageRenderer {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(RendererConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<RendererConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }
}

#[async_trait]
impl ImageRenderer for HttpImageRenderer {
    async fn render(&self, request: &IllustrationRequest) -> Result<RenderedImage, ImageError> {
        let config = self.config.as_ref().ok_or(ImageError::Disabled)?;

        let url = format!("{}/images/generations", config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&config.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ImageError::HttpStatus(response.status()));
        }

        let body: RenderResponse = response.json().await?;
        let image = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ImageError::Malformed("empty data array".into()))?;
        let url = Url::parse(&image.url).map_err(|e| ImageError::Malformed(e.to_string()))?;
        Ok(RenderedImage {
            url,
            byte_len: image.byte_len.unwrap_or(0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    data: Vec<RenderResult>,
}

#[derive(Debug, Deserialize)]
struct RenderResult {
    url: String,
    #[serde(default)]
    byte_len: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_and_parameter_sensitive() {
        let a = IllustrationRequest::new("a fox");
        let b = IllustrationRequest::new("a fox");
        assert_eq!(a.cache_key(), b.cache_key());

        let styled = IllustrationRequest {
            style: Some("ink".into()),
            ..IllustrationRequest::new("a fox")
        };
        assert_ne!(a.cache_key(), styled.cache_key());
    }

    #[test]
    fn renderer_disabled_without_credentials() {
        assert!(!HttpImageRenderer::new(None).enabled());
    }
}
