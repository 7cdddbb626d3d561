use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::ids::MaterialId;
use crate::model::question::{Fingerprint, Question};

//
// ─── BUFFER ENTRY ──────────────────────────────────────────────────────────────
//

/// One pre-generated quiz item in a user's persisted buffer.
///
/// `ready` is false when the illustration could not be rendered; the entry is
/// still served and the image is retried opportunistically on a later refill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferEntry {
    pub question: Question,
    pub image_url: Option<Url>,
    pub ready: bool,
    pub origin_id: MaterialId,
    pub created_at: DateTime<Utc>,
}

impl BufferEntry {
    /// Builds an entry from a question and an optional rendered illustration.
    #[must_use]
    pub fn new(question: Question, image_url: Option<Url>, created_at: DateTime<Utc>) -> Self {
        let origin_id = question.origin_id().clone();
        let ready = image_url.is_some();
        Self {
            question,
            image_url,
            ready,
            origin_id,
            created_at,
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.question.fingerprint()
    }
}

//
// ─── CONFIGURATION ─────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferConfigError {
    #[error("buffer target must be at least 1")]
    ZeroTarget,

    #[error("low watermark must not exceed the target")]
    WatermarkAboveTarget,

    #[error("render batch must be at least 1")]
    ZeroRenderBatch,
}

/// Tuning knobs for buffer maintenance and session growth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    target: usize,
    low_watermark: usize,
    mirror_cap: usize,
    exclusion_cap: usize,
    render_batch: usize,
    lookahead: usize,
}

impl BufferConfig {
    /// Builds a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `BufferConfigError` for a zero target, a watermark above the
    /// target, or a zero render batch.
    pub fn new(
        target: usize,
        low_watermark: usize,
        mirror_cap: usize,
        exclusion_cap: usize,
        render_batch: usize,
        lookahead: usize,
    ) -> Result<Self, BufferConfigError> {
        if target == 0 {
            return Err(BufferConfigError::ZeroTarget);
        }
        if low_watermark > target {
            return Err(BufferConfigError::WatermarkAboveTarget);
        }
        if render_batch == 0 {
            return Err(BufferConfigError::ZeroRenderBatch);
        }
        Ok(Self {
            target,
            low_watermark,
            mirror_cap,
            exclusion_cap,
            render_batch,
            lookahead,
        })
    }

    /// Buffer size the background refill works toward.
    #[must_use]
    pub fn target(&self) -> usize {
        self.target
    }

    /// Buffer length at or below which `fetch` triggers a background refill.
    #[must_use]
    pub fn low_watermark(&self) -> usize {
        self.low_watermark
    }

    /// Maximum entries folded back into the durable client mirror on exit.
    #[must_use]
    pub fn mirror_cap(&self) -> usize {
        self.mirror_cap
    }

    /// Maximum recent same-origin texts passed to spawn as do-not-repeat angles.
    #[must_use]
    pub fn exclusion_cap(&self) -> usize {
        self.exclusion_cap
    }

    /// Number of items assembled per render batch.
    #[must_use]
    pub fn render_batch(&self) -> usize {
        self.render_batch
    }

    /// Distance from the tail at which rendering triggers a refill.
    #[must_use]
    pub fn lookahead(&self) -> usize {
        self.lookahead
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            target: 10,
            low_watermark: 5,
            mirror_cap: 20,
            exclusion_cap: 30,
            render_batch: 10,
            lookahead: 3,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::question::{Origin, QuestionDraft};
    use crate::time::fixed_now;

    fn build_question(text: &str) -> Question {
        let origin = Origin::new(MaterialId::new("mat-1").unwrap(), "Notes");
        QuestionDraft::open_response(text, "answer")
            .validate(origin, fixed_now())
            .unwrap()
    }

    #[test]
    fn entry_with_image_is_ready() {
        let url = Url::parse("https://img.example/q1.png").unwrap();
        let entry = BufferEntry::new(build_question("Q1"), Some(url), fixed_now());
        assert!(entry.ready);
        assert_eq!(entry.origin_id.as_str(), "mat-1");
    }

    #[test]
    fn entry_without_image_is_not_ready() {
        let entry = BufferEntry::new(build_question("Q1"), None, fixed_now());
        assert!(!entry.ready);
    }

    #[test]
    fn default_config_is_valid() {
        let config = BufferConfig::default();
        assert_eq!(config.target(), 10);
        assert!(config.low_watermark() <= config.target());
    }

    #[test]
    fn config_rejects_zero_target() {
        let err = BufferConfig::new(0, 0, 20, 30, 10, 3).unwrap_err();
        assert_eq!(err, BufferConfigError::ZeroTarget);
    }

    #[test]
    fn config_rejects_watermark_above_target() {
        let err = BufferConfig::new(5, 6, 20, 30, 10, 3).unwrap_err();
        assert_eq!(err, BufferConfigError::WatermarkAboveTarget);
    }
}
