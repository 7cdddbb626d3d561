use sqlx::Row;
use url::Url;

use super::{SqliteRepository, mapping::ser};
use crate::repository::{CachedImage, ImageCacheRepository, StorageError};

#[async_trait::async_trait]
impl ImageCacheRepository for SqliteRepository {
    async fn get_image(&self, key: &str) -> Result<Option<CachedImage>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT url, byte_len, created_at
            FROM image_cache
            WHERE key = ?1
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw_url: String = row.try_get("url").map_err(ser)?;
        let byte_len: i64 = row.try_get("byte_len").map_err(ser)?;
        Ok(Some(CachedImage {
            url: Url::parse(&raw_url).map_err(ser)?,
            byte_len: u64::try_from(byte_len).map_err(ser)?,
            created_at: row.try_get("created_at").map_err(ser)?,
        }))
    }

    async fn put_image(&self, key: &str, image: &CachedImage) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO image_cache (key, url, byte_len, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                url = excluded.url,
                byte_len = excluded.byte_len,
                created_at = excluded.created_at
            ",
        )
        .bind(key)
        .bind(image.url.to_string())
        .bind(i64::try_from(image.byte_len).map_err(ser)?)
        .bind(image.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn delete_image(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM image_cache WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}
