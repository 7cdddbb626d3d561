use chrono::Utc;
use sqlx::Row;

use review_core::model::{Fingerprint, SolvedSet, UserId};

use super::{SqliteRepository, mapping::ser};
use crate::repository::{SolvedSetRepository, StorageError};

#[async_trait::async_trait]
impl SolvedSetRepository for SqliteRepository {
    async fn load_solved(&self, user: &UserId) -> Result<SolvedSet, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT fingerprint
            FROM solved_fingerprints
            WHERE user_id = ?1
            ",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut solved = SolvedSet::new();
        for row in rows {
            let raw: String = row.try_get("fingerprint").map_err(ser)?;
            solved.insert(Fingerprint::of(&raw));
        }
        Ok(solved)
    }

    async fn add_solved(
        &self,
        user: &UserId,
        fingerprint: &Fingerprint,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO solved_fingerprints (user_id, fingerprint, solved_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id, fingerprint) DO NOTHING
            ",
        )
        .bind(user.as_str())
        .bind(fingerprint.as_str().to_owned())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }
}
