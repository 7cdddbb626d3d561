use std::sync::Arc;

use tracing::{debug, warn};

use review_core::Clock;
use review_core::model::{
    BufferConfig, BufferEntry, Fingerprint, MaterialId, Origin, Question, ResponseType, UserId,
};
use storage::repository::{BufferRepository, MaterialRepository};

use crate::ai::{DistributionMode, GenerationRequest, QuestionGenerator};
use crate::error::SpawnError;

/// Inputs for spawning one related question from a just-answered seed.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub user: UserId,
    pub seed_text: String,
    pub response_type: ResponseType,
    pub origin_id: MaterialId,
    /// Free-text material context; when absent the material's own fallback
    /// chain resolves one.
    pub context: Option<String>,
}

/// Result of a spawn call. Empty on any collaborator failure: callers treat
/// that as a silent no-op, never a hard error surfaced mid-quiz.
#[derive(Debug, Clone, Default)]
pub struct SpawnOutcome {
    pub questions: Vec<Question>,
}

impl SpawnOutcome {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Produces exactly one new question of the seed's response type, tied to the
/// seed's source material, and persists it beyond the current session.
///
/// Spawn calls are deliberately not serialized against each other: rapid
/// successive correct answers may race and both succeed.
#[derive(Clone)]
pub struct SpawnEngine {
    clock: Clock,
    config: BufferConfig,
    generator: Arc<dyn QuestionGenerator>,
    materials: Arc<dyn MaterialRepository>,
    buffers: Arc<dyn BufferRepository>,
}

impl SpawnEngine {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: BufferConfig,
        generator: Arc<dyn QuestionGenerator>,
        materials: Arc<dyn MaterialRepository>,
        buffers: Arc<dyn BufferRepository>,
    ) -> Self {
        Self {
            clock,
            config,
            generator,
            materials,
            buffers,
        }
    }

    /// Spawn one related question for the seed.
    ///
    /// On success the result carries lineage back to the seed and is durably
    /// appended to both the origin material's question list and the user's
    /// buffer. Generation failures and empty batches produce an empty outcome.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError::Storage` only when reading the origin material
    /// fails; collaborator errors never propagate.
    pub async fn spawn(&self, request: &SpawnRequest) -> Result<SpawnOutcome, SpawnError> {
        let material = self.materials.get_material(&request.origin_id).await?;

        let (context, title, language, mut exclusion_list) = match &material {
            Some(material) => (
                request
                    .context
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| material.resolve_context(&request.seed_text).text),
                material.title.clone(),
                material.language.clone(),
                material.recent_question_texts(self.config.exclusion_cap()),
            ),
            None => (
                request
                    .context
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| {
                        format!(
                            "Follow-up practice on the question: {}",
                            request.seed_text.trim()
                        )
                    }),
                String::new(),
                String::new(),
                Vec::new(),
            ),
        };

        let seed_fp = Fingerprint::of(&request.seed_text);
        if !exclusion_list.iter().any(|t| Fingerprint::of(t) == seed_fp) {
            exclusion_list.push(request.seed_text.clone());
        }
        let overflow = exclusion_list
            .len()
            .saturating_sub(self.config.exclusion_cap());
        exclusion_list.drain(..overflow);

        let generation = GenerationRequest {
            source_text: context,
            count: 1,
            title: title.clone(),
            related_context: Some(request.seed_text.clone()),
            distribution_mode: DistributionMode::SingleType,
            exclusion_list,
            language,
            response_type: request.response_type,
        };

        let response = match self.generator.generate(&generation).await {
            Ok(response) => response,
            Err(err) => {
                warn!(origin = %request.origin_id, error = %err, "spawn generation failed");
                return Ok(SpawnOutcome::empty());
            }
        };

        let Some(draft) = response.questions.into_iter().next() else {
            debug!(origin = %request.origin_id, "spawn returned no questions");
            return Ok(SpawnOutcome::empty());
        };

        let origin = Origin::new(request.origin_id.clone(), title);
        let now = self.clock.now();
        let question = match draft
            .validate(origin, now)
            .and_then(|question| question.into_spawned(&request.seed_text))
        {
            Ok(question) => question,
            Err(err) => {
                warn!(origin = %request.origin_id, error = %err, "spawned draft failed validation");
                return Ok(SpawnOutcome::empty());
            }
        };

        // Never hand the seed back verbatim.
        if question.fingerprint() == seed_fp {
            debug!(origin = %request.origin_id, "spawn echoed the seed, dropping");
            return Ok(SpawnOutcome::empty());
        }

        // Durable appends are best-effort: a persistence failure never voids
        // the in-memory result already produced.
        if material.is_some() {
            if let Err(err) = self
                .materials
                .append_question(&request.origin_id, &question)
                .await
            {
                warn!(origin = %request.origin_id, error = %err, "failed to persist spawned question to material");
            }
        }
        let entry = BufferEntry::new(question.clone(), None, now);
        if let Err(err) = self.buffers.append_entry(&request.user, &entry).await {
            warn!(user = %request.user, error = %err, "failed to persist spawned question to buffer");
        }

        Ok(SpawnOutcome {
            questions: vec![question],
        })
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
