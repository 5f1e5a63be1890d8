//! Idempotent schema migration for the shared store.
//!
//! The database file is shared with a sibling reader service that owns the
//! rest of the schema (`writings`, `tags`, FTS tables). Everything here is
//! guarded — `CREATE TABLE IF NOT EXISTS`, column-presence probes before
//! `ALTER TABLE` — so the migration can run on every startup against a store
//! in any state, including one the sibling service created first.

use super::DbPool;
use crate::error::StorageError;

/// Run all migration steps. Safe to call repeatedly.
pub async fn migrate(pool: &DbPool) -> Result<(), StorageError> {
    create_prompts_table(pool).await?;
    create_prompt_writings_table(pool).await?;
    add_prompt_artifact_columns(pool).await?;
    create_prompt_artifacts_table(pool).await?;
    create_writings_table(pool).await?;
    backfill_prompt_writings(pool).await?;
    Ok(())
}

async fn exec(pool: &DbPool, sql: &str) -> Result<(), StorageError> {
    sqlx::query(sql)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Migration { source: e })?;
    Ok(())
}

async fn create_prompts_table(pool: &DbPool) -> Result<(), StorageError> {
    exec(
        pool,
        "CREATE TABLE IF NOT EXISTS prompts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt_text TEXT NOT NULL,
            prompt_type TEXT DEFAULT 'text',
            status TEXT DEFAULT 'unprocessed',
            priority INTEGER DEFAULT 5,
            config_name TEXT,
            metadata TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            processed_at TIMESTAMP,
            completed_at TIMESTAMP,
            output_reference INTEGER,
            error_message TEXT,
            processing_duration INTEGER
        )",
    )
    .await
}

async fn create_prompt_writings_table(pool: &DbPool) -> Result<(), StorageError> {
    exec(
        pool,
        "CREATE TABLE IF NOT EXISTS prompt_writings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt_id INTEGER NOT NULL,
            writing_id INTEGER NOT NULL,
            writing_order INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(prompt_id, writing_id),
            FOREIGN KEY(prompt_id) REFERENCES prompts(id) ON DELETE CASCADE
        )",
    )
    .await?;
    exec(
        pool,
        "CREATE INDEX IF NOT EXISTS idx_prompt_writings_prompt_id
         ON prompt_writings(prompt_id)",
    )
    .await?;
    exec(
        pool,
        "CREATE INDEX IF NOT EXISTS idx_prompt_writings_writing_id
         ON prompt_writings(writing_id)",
    )
    .await
}

/// Add `artifact_status` / `artifact_metadata` to `prompts` if absent.
async fn add_prompt_artifact_columns(pool: &DbPool) -> Result<(), StorageError> {
    if !column_exists(pool, "prompts", "artifact_status").await? {
        exec(
            pool,
            "ALTER TABLE prompts ADD COLUMN artifact_status TEXT DEFAULT 'pending'",
        )
        .await?;
    }
    if !column_exists(pool, "prompts", "artifact_metadata").await? {
        exec(pool, "ALTER TABLE prompts ADD COLUMN artifact_metadata TEXT").await?;
    }
    Ok(())
}

async fn create_prompt_artifacts_table(pool: &DbPool) -> Result<(), StorageError> {
    exec(
        pool,
        "CREATE TABLE IF NOT EXISTS prompt_artifacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt_id INTEGER NOT NULL,
            artifact_type TEXT NOT NULL,
            file_path TEXT NOT NULL,
            preview_path TEXT,
            metadata TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY(prompt_id) REFERENCES prompts(id) ON DELETE CASCADE
        )",
    )
    .await
}

/// Ensure a minimal `writings` table exists.
///
/// The sibling reader service owns the full table. This creates a compatible
/// subset only when no table exists at all, so a fresh store is usable
/// before the sibling service first runs. An existing table is never
/// altered.
async fn create_writings_table(pool: &DbPool) -> Result<(), StorageError> {
    exec(
        pool,
        "CREATE TABLE IF NOT EXISTS writings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT,
            content_type TEXT,
            content TEXT NOT NULL,
            word_count INTEGER,
            character_count INTEGER,
            line_count INTEGER,
            publication_status TEXT DEFAULT 'draft',
            notes TEXT,
            source_prompt_id INTEGER,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .await
}

/// Back-fill `prompt_writings` from legacy `output_reference` values.
///
/// Older stores recorded only the primary writing id on the prompt row.
/// Every such prompt with no link rows gets one with `writing_order = 0`.
async fn backfill_prompt_writings(pool: &DbPool) -> Result<(), StorageError> {
    exec(
        pool,
        "INSERT OR IGNORE INTO prompt_writings (prompt_id, writing_id, writing_order)
         SELECT p.id, p.output_reference, 0
         FROM prompts p
         WHERE p.output_reference IS NOT NULL
           AND NOT EXISTS (
               SELECT 1 FROM prompt_writings pw WHERE pw.prompt_id = p.id
           )",
    )
    .await
}

async fn column_exists(pool: &DbPool, table: &str, column: &str) -> Result<bool, StorageError> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await
            .map_err(|e| StorageError::Migration { source: e })?;
    Ok(row.0 > 0)
}
