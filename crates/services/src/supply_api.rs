use serde::{Deserialize, Serialize};

use review_core::model::{MaterialId, ResponseType, UserId};
use storage::repository::{BufferEntryRecord, QuestionRecord};

use crate::buffer_manager::BufferManager;
use crate::error::{BufferError, SpawnError};
use crate::spawn_engine::{SpawnEngine, SpawnRequest};

/// The exposed buffer API, in service form. The transport layer (HTTP
/// routing, authentication) is an external collaborator calling into this.
#[derive(Clone)]
pub struct SupplyService {
    buffer_manager: BufferManager,
    spawn_engine: SpawnEngine,
}

/// `GET pregenerated` — the current buffer; side-effects a background refill
/// trigger when the buffer runs low.
#[derive(Debug, Clone, Serialize)]
pub struct PregeneratedResponse {
    pub entries: Vec<BufferEntryRecord>,
}

/// `POST consume` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub question_texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumeResponse {
    pub removed: usize,
}

/// `POST spawn` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnApiRequest {
    pub question: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub origin_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpawnResponse {
    pub success: bool,
    pub questions: Vec<SpawnedQuestion>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnedQuestion {
    #[serde(flatten)]
    pub question: QuestionRecord,
    pub source_title: String,
}

impl SupplyService {
    #[must_use]
    pub fn new(buffer_manager: BufferManager, spawn_engine: SpawnEngine) -> Self {
        Self {
            buffer_manager,
            spawn_engine,
        }
    }

    /// Current buffer contents for the user, triggering a background refill
    /// when the buffer is below its low watermark.
    ///
    /// # Errors
    ///
    /// Returns `BufferError::Storage` when the buffer cannot be loaded.
    pub async fn pregenerated(&self, user: &UserId) -> Result<PregeneratedResponse, BufferError> {
        let entries = self.buffer_manager.fetch(user).await?;
        Ok(PregeneratedResponse {
            entries: entries.iter().map(BufferEntryRecord::from_entry).collect(),
        })
    }

    /// Remove served entries and refill in the background.
    ///
    /// # Errors
    ///
    /// Returns `BufferError::Storage` when removal fails.
    pub async fn consume(
        &self,
        user: &UserId,
        request: ConsumeRequest,
    ) -> Result<ConsumeResponse, BufferError> {
        let removed = self
            .buffer_manager
            .consume(user, &request.question_texts)
            .await?;
        Ok(ConsumeResponse { removed })
    }

    /// Spawn one related question for an answered seed.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` for an invalid origin id or a storage failure;
    /// collaborator failures surface as `success: false` with no questions.
    pub async fn spawn(
        &self,
        user: &UserId,
        request: SpawnApiRequest,
    ) -> Result<SpawnResponse, SpawnError> {
        let origin_id = MaterialId::new(request.origin_id)?;
        let outcome = self
            .spawn_engine
            .spawn(&SpawnRequest {
                user: user.clone(),
                seed_text: request.question,
                response_type: request.response_type,
                origin_id,
                context: request.context,
            })
            .await?;

        let questions: Vec<SpawnedQuestion> = outcome
            .questions
            .iter()
            .map(|question| SpawnedQuestion {
                question: QuestionRecord::from_question(question),
                source_title: question.origin_title().to_owned(),
            })
            .collect();

        Ok(SpawnResponse {
            success: !questions.is_empty(),
            questions,
        })
    }
}
