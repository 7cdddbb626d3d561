use url::Url;

use review_core::model::{BufferEntry, Fingerprint, UserId};

use super::{SqliteRepository, mapping::map_buffer_row, mapping::ser};
use crate::repository::{BufferRepository, QuestionRecord, StorageError};

#[async_trait::async_trait]
impl BufferRepository for SqliteRepository {
    async fn load_buffer(&self, user: &UserId) -> Result<Vec<BufferEntry>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT question, image_url, ready, origin_id, created_at
            FROM buffer_entries
            WHERE user_id = ?1
            ORDER BY rowid ASC
            ",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(map_buffer_row(&row)?);
        }
        Ok(entries)
    }

    async fn append_entry(&self, user: &UserId, entry: &BufferEntry) -> Result<(), StorageError> {
        let question_json =
            serde_json::to_string(&QuestionRecord::from_question(&entry.question)).map_err(ser)?;

        sqlx::query(
            r"
            INSERT INTO buffer_entries (
                user_id, fingerprint, question, image_url, ready, origin_id, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id, fingerprint) DO NOTHING
            ",
        )
        .bind(user.as_str())
        .bind(entry.fingerprint().as_str().to_owned())
        .bind(question_json)
        .bind(entry.image_url.as_ref().map(Url::to_string))
        .bind(i64::from(entry.ready))
        .bind(entry.origin_id.as_str())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn remove_by_fingerprints(
        &self,
        user: &UserId,
        fingerprints: &[Fingerprint],
    ) -> Result<usize, StorageError> {
        if fingerprints.is_empty() {
            return Ok(0);
        }

        let mut sql =
            String::from("DELETE FROM buffer_entries WHERE user_id = ?1 AND fingerprint IN (");
        for i in 0..fingerprints.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            sql.push_str(&(i + 2).to_string());
        }
        sql.push(')');

        let mut q = sqlx::query(&sql).bind(user.as_str());
        for fp in fingerprints {
            q = q.bind(fp.as_str().to_owned());
        }

        let result = q
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn mark_ready(
        &self,
        user: &UserId,
        fingerprint: &Fingerprint,
        image_url: &Url,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r"
            UPDATE buffer_entries
            SET image_url = ?3, ready = 1
            WHERE user_id = ?1 AND fingerprint = ?2
            ",
        )
        .bind(user.as_str())
        .bind(fingerprint.as_str().to_owned())
        .bind(image_url.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn drain_buffer(&self, user: &UserId) -> Result<Vec<BufferEntry>, StorageError> {
        let entries = self.load_buffer(user).await?;

        sqlx::query("DELETE FROM buffer_entries WHERE user_id = ?1")
            .bind(user.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(entries)
    }
}
