use sqlx::Row;

use review_core::model::{Material, MaterialId, Question, UserId};

use super::{SqliteRepository, mapping::map_question_row, mapping::ser};
use crate::repository::{MaterialRepository, StorageError};

impl SqliteRepository {
    async fn load_questions(&self, material_id: &MaterialId) -> Result<Vec<Question>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                id, text, response_type, options, answer, explanation,
                illustration_prompt, language, origin_title, liked, spawned,
                spawned_from, created_at
            FROM material_questions
            WHERE material_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(material_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut questions = Vec::with_capacity(rows.len());
        for row in rows {
            questions.push(map_question_row(&row, material_id.as_str())?);
        }
        Ok(questions)
    }

    async fn map_material_row(
        &self,
        row: &sqlx::sqlite::SqliteRow,
    ) -> Result<Material, StorageError> {
        let id: String = row.try_get("id").map_err(ser)?;
        let id = MaterialId::new(id).map_err(ser)?;
        let questions = self.load_questions(&id).await?;

        Ok(Material {
            id,
            title: row.try_get("title").map_err(ser)?,
            language: row.try_get("language").map_err(ser)?,
            transcript: row.try_get("transcript").map_err(ser)?,
            description: row.try_get("description").map_err(ser)?,
            summary: row.try_get("summary").map_err(ser)?,
            questions,
        })
    }
}

#[async_trait::async_trait]
impl MaterialRepository for SqliteRepository {
    async fn list_materials(&self, user: &UserId) -> Result<Vec<Material>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, title, language, transcript, description, summary
            FROM materials
            WHERE user_id = ?1
            ORDER BY id ASC
            ",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut materials = Vec::with_capacity(rows.len());
        for row in rows {
            materials.push(self.map_material_row(&row).await?);
        }
        Ok(materials)
    }

    async fn get_material(&self, id: &MaterialId) -> Result<Option<Material>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, title, language, transcript, description, summary
            FROM materials
            WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(self.map_material_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn upsert_material(
        &self,
        user: &UserId,
        material: &Material,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO materials (id, user_id, title, language, transcript, description, summary)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                title = excluded.title,
                language = excluded.language,
                transcript = excluded.transcript,
                description = excluded.description,
                summary = excluded.summary
            ",
        )
        .bind(material.id.as_str())
        .bind(user.as_str())
        .bind(&material.title)
        .bind(&material.language)
        .bind(&material.transcript)
        .bind(&material.description)
        .bind(&material.summary)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        for question in &material.questions {
            self.append_question(&material.id, question).await?;
        }
        Ok(())
    }

    async fn append_question(
        &self,
        id: &MaterialId,
        question: &Question,
    ) -> Result<(), StorageError> {
        let exists = sqlx::query("SELECT 1 FROM materials WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        let options_json = serde_json::to_string(question.options()).map_err(ser)?;
        let answer_json = serde_json::to_string(question.answer()).map_err(ser)?;

        sqlx::query(
            r"
            INSERT INTO material_questions (
                id, material_id, position, text, response_type, options, answer,
                explanation, illustration_prompt, language, origin_title, liked,
                spawned, spawned_from, created_at
            )
            VALUES (
                ?1, ?2,
                (SELECT COALESCE(MAX(position) + 1, 0)
                   FROM material_questions WHERE material_id = ?2),
                ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14
            )
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(question.id().as_uuid().to_string())
        .bind(id.as_str())
        .bind(question.text())
        .bind(question.response_type().as_str())
        .bind(options_json)
        .bind(answer_json)
        .bind(question.explanation())
        .bind(question.illustration_prompt())
        .bind(question.language())
        .bind(question.origin_title())
        .bind(i64::from(question.liked()))
        .bind(i64::from(question.spawned()))
        .bind(question.spawned_from())
        .bind(question.created_at())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }
}
