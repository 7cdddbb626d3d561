use sqlx::Row;

use review_core::model::{BufferEntry, UserId};

use super::{SqliteRepository, mapping::ser};
use crate::repository::{
    BufferEntryRecord, MirrorRepository, StorageError, prune_orphaned,
};

#[async_trait::async_trait]
impl MirrorRepository for SqliteRepository {
    async fn load_mirror(&self, user: &UserId) -> Result<Vec<BufferEntry>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT payload
            FROM mirror_entries
            WHERE user_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload").map_err(ser)?;
            // A payload that no longer parses is treated like an orphan: pruned,
            // forcing a fresh server refill.
            if let Ok(record) = serde_json::from_str::<BufferEntryRecord>(&payload) {
                records.push(record);
            }
        }
        Ok(prune_orphaned(records))
    }

    async fn replace_mirror(
        &self,
        user: &UserId,
        entries: &[BufferEntry],
    ) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        sqlx::query("DELETE FROM mirror_entries WHERE user_id = ?1")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        for (position, entry) in entries.iter().enumerate() {
            let payload =
                serde_json::to_string(&BufferEntryRecord::from_entry(entry)).map_err(ser)?;
            sqlx::query(
                r"
                INSERT INTO mirror_entries (user_id, position, payload)
                VALUES (?1, ?2, ?3)
                ",
            )
            .bind(user.as_str())
            .bind(i64::try_from(position).map_err(ser)?)
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}
