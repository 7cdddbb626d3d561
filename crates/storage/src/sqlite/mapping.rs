use sqlx::Row;
use uuid::Uuid;

use review_core::model::{BufferEntry, Question};

use crate::repository::{BufferEntryRecord, QuestionRecord, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn bool_from_i64(field: &'static str, v: i64) -> Result<bool, StorageError> {
    match v {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StorageError::Serialization(format!(
            "{field} must be 0 or 1, got {other}"
        ))),
    }
}

/// Maps a `material_questions` row back into a domain `Question`.
///
/// The origin id is the owning material's id, passed in by the caller.
pub(crate) fn map_question_row(
    row: &sqlx::sqlite::SqliteRow,
    material_id: &str,
) -> Result<Question, StorageError> {
    let id: String = row.try_get("id").map_err(ser)?;
    let options_json: String = row.try_get("options").map_err(ser)?;
    let answer_json: String = row.try_get("answer").map_err(ser)?;

    let record = QuestionRecord {
        id: Uuid::parse_str(&id).map_err(ser)?,
        text: row.try_get("text").map_err(ser)?,
        response_type: row.try_get("response_type").map_err(ser)?,
        options: serde_json::from_str(&options_json).map_err(ser)?,
        answer: serde_json::from_str(&answer_json).map_err(ser)?,
        explanation: row.try_get("explanation").map_err(ser)?,
        illustration_prompt: row.try_get("illustration_prompt").map_err(ser)?,
        language: row.try_get("language").map_err(ser)?,
        origin_id: material_id.to_owned(),
        origin_title: row.try_get("origin_title").map_err(ser)?,
        liked: bool_from_i64("liked", row.try_get("liked").map_err(ser)?)?,
        spawned: bool_from_i64("spawned", row.try_get("spawned").map_err(ser)?)?,
        spawned_from: row.try_get("spawned_from").map_err(ser)?,
        created_at: row.try_get("created_at").map_err(ser)?,
    };
    record.into_question()
}

/// Maps a `buffer_entries` row back into a domain `BufferEntry`.
pub(crate) fn map_buffer_row(row: &sqlx::sqlite::SqliteRow) -> Result<BufferEntry, StorageError> {
    let question_json: String = row.try_get("question").map_err(ser)?;
    let question: QuestionRecord = serde_json::from_str(&question_json).map_err(ser)?;

    let record = BufferEntryRecord {
        question,
        image_url: row.try_get("image_url").map_err(ser)?,
        ready: bool_from_i64("ready", row.try_get("ready").map_err(ser)?)?,
        origin_id: row.try_get("origin_id").map_err(ser)?,
        created_at: row.try_get("created_at").map_err(ser)?,
    };
    record.into_entry()
}
