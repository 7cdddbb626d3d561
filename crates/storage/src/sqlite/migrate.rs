use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates the full schema (materials with nested question lists, per-user
/// buffers, mirrors, solved fingerprints, the image cache, and indexes).
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS materials (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    language TEXT NOT NULL,
                    transcript TEXT,
                    description TEXT,
                    summary TEXT
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS material_questions (
                    id TEXT PRIMARY KEY,
                    material_id TEXT NOT NULL,
                    position INTEGER NOT NULL CHECK (position >= 0),
                    text TEXT NOT NULL,
                    response_type TEXT NOT NULL,
                    options TEXT NOT NULL,
                    answer TEXT NOT NULL,
                    explanation TEXT NOT NULL,
                    illustration_prompt TEXT NOT NULL,
                    language TEXT NOT NULL,
                    origin_title TEXT NOT NULL,
                    liked INTEGER NOT NULL CHECK (liked IN (0, 1)),
                    spawned INTEGER NOT NULL CHECK (spawned IN (0, 1)),
                    spawned_from TEXT,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (material_id) REFERENCES materials(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS buffer_entries (
                    user_id TEXT NOT NULL,
                    fingerprint TEXT NOT NULL,
                    question TEXT NOT NULL,
                    image_url TEXT,
                    ready INTEGER NOT NULL CHECK (ready IN (0, 1)),
                    origin_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, fingerprint)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS mirror_entries (
                    user_id TEXT NOT NULL,
                    position INTEGER NOT NULL CHECK (position >= 0),
                    payload TEXT NOT NULL,
                    PRIMARY KEY (user_id, position)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS solved_fingerprints (
                    user_id TEXT NOT NULL,
                    fingerprint TEXT NOT NULL,
                    solved_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, fingerprint)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS image_cache (
                    key TEXT PRIMARY KEY,
                    url TEXT NOT NULL,
                    byte_len INTEGER NOT NULL CHECK (byte_len >= 0),
                    created_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_materials_user
                    ON materials (user_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_material_questions_material_position
                    ON material_questions (material_id, position);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
