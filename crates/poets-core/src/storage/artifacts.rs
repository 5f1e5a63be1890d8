//! Persistence for generated media artifacts.

use super::DbPool;
use crate::error::StorageError;

/// A produced media artifact, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptArtifact {
    /// `image` or `audio`.
    pub artifact_type: String,
    /// POSIX path relative to the media output root.
    pub file_path: String,
    /// Equal to `file_path` for images, `None` for audio.
    pub preview_path: Option<String>,
    /// Script name, duration, and caller-supplied fields.
    pub metadata: serde_json::Value,
}

/// Insert a batch of artifacts for a prompt in a single transaction.
pub async fn insert_artifacts(
    pool: &DbPool,
    prompt_id: i64,
    artifacts: &[PromptArtifact],
) -> Result<(), StorageError> {
    if artifacts.is_empty() {
        return Ok(());
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    for artifact in artifacts {
        sqlx::query(
            "INSERT INTO prompt_artifacts (prompt_id, artifact_type, file_path, preview_path, metadata)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(prompt_id)
        .bind(&artifact.artifact_type)
        .bind(&artifact.file_path)
        .bind(&artifact.preview_path)
        .bind(artifact.metadata.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    }

    tx.commit()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Count the artifacts recorded for a prompt.
pub async fn artifact_count(pool: &DbPool, prompt_id: i64) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM prompt_artifacts WHERE prompt_id = ?")
        .bind(prompt_id)
        .fetch_one(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}
