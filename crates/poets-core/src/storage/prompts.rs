//! Queue queries and status transitions for the `prompts` table.

use std::collections::HashMap;

use super::DbPool;
use crate::error::StorageError;

/// Processing state of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStatus {
    /// Waiting in the queue.
    Unprocessed,
    /// Currently being worked on by a tick.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error; retryable via operator tooling.
    Failed,
}

impl PromptStatus {
    /// The string stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptStatus::Unprocessed => "unprocessed",
            PromptStatus::Processing => "processing",
            PromptStatus::Completed => "completed",
            PromptStatus::Failed => "failed",
        }
    }
}

/// Media-generation state of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// Media generation has not started.
    Pending,
    /// A pipeline run is in flight.
    Processing,
    /// Artifacts were produced and recorded.
    Ready,
    /// The pipeline run failed.
    Error,
    /// No pipeline exists for this prompt type.
    Unsupported,
}

impl ArtifactStatus {
    /// The string stored in the `artifact_status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Pending => "pending",
            ArtifactStatus::Processing => "processing",
            ArtifactStatus::Ready => "ready",
            ArtifactStatus::Error => "error",
            ArtifactStatus::Unsupported => "unsupported",
        }
    }
}

/// Routing classification of a prompt type string.
///
/// String-keyed dispatch happens once, at the system boundary; everything
/// downstream matches on this variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Free-text generation through the full agent group chat.
    Text,
    /// Structured image-prompt JSON, generated first and rendered later.
    ImagePromptJson,
    /// Structured lyrics JSON, generated first and rendered later.
    LyricsPromptJson,
    /// Direct image synthesis.
    MediaImage,
    /// Direct audio synthesis.
    MediaAudio,
    /// Voice synthesis, served by the audio pipeline.
    MediaVoice,
    /// A type the media map routes to a pipeline that does not exist.
    Unsupported,
}

impl PromptKind {
    /// Classify a raw `prompt_type` against the effective media map.
    ///
    /// Types absent from the map fall back to the text session, matching
    /// the queue processor's catch-all route.
    pub fn classify(prompt_type: &str, media_map: &HashMap<String, String>) -> PromptKind {
        let normalized = prompt_type.trim().to_lowercase();
        match normalized.as_str() {
            "image_prompt" => PromptKind::ImagePromptJson,
            "lyrics_prompt" => PromptKind::LyricsPromptJson,
            other => match media_map.get(other).map(String::as_str) {
                Some("image") => PromptKind::MediaImage,
                Some("audio") if other == "voice" => PromptKind::MediaVoice,
                Some("audio") => PromptKind::MediaAudio,
                Some(_) => PromptKind::Unsupported,
                None => PromptKind::Text,
            },
        }
    }

    /// The pipeline key this kind is (eventually) served by, if any.
    /// Structured kinds map to the pipeline that renders their JSON in the
    /// media pass.
    pub fn pipeline_key(&self) -> Option<&'static str> {
        match self {
            PromptKind::MediaImage | PromptKind::ImagePromptJson => Some("image"),
            PromptKind::MediaAudio | PromptKind::MediaVoice | PromptKind::LyricsPromptJson => {
                Some("audio")
            }
            _ => None,
        }
    }

    /// Whether this kind produces structured JSON for a later media pass.
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            PromptKind::ImagePromptJson | PromptKind::LyricsPromptJson
        )
    }

    /// The `content_type` / artifact directory tag for structured kinds.
    pub fn type_tag(&self) -> Option<&'static str> {
        match self {
            PromptKind::ImagePromptJson => Some("image_prompt"),
            PromptKind::LyricsPromptJson => Some("lyrics_prompt"),
            _ => None,
        }
    }
}

/// A queued unit of work from the `prompts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PromptRow {
    /// Stable identifier.
    pub id: i64,
    /// Free prompt text supplied by the author.
    pub prompt_text: String,
    /// Type tag from an open set.
    pub prompt_type: String,
    /// Current status string.
    pub status: String,
    /// Lower sorts first.
    pub priority: i64,
    /// Opaque JSON blob of hints (style, tone, length, collaboration mode).
    pub metadata: Option<String>,
    /// ISO timestamp of queue insertion.
    pub created_at: Option<String>,
    /// Media-generation state, when meaningful for this type.
    pub artifact_status: Option<String>,
}

impl PromptRow {
    /// Parse the metadata blob, returning an empty object on absence or
    /// malformed JSON.
    pub fn metadata_value(&self) -> serde_json::Value {
        self.metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| serde_json::json!({}))
    }
}

/// A writing linked to a prompt, as returned by [`next_media_prompts`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LinkedWriting {
    /// Writing id.
    pub id: i64,
    /// Position within the prompt's writings.
    pub writing_order: i64,
    /// Writing title.
    pub title: Option<String>,
    /// Writing content type.
    pub content_type: Option<String>,
    /// Full writing body.
    pub content: String,
}

/// A completed structured prompt awaiting media, with its writings.
#[derive(Debug, Clone)]
pub struct MediaPrompt {
    /// The prompt row.
    pub prompt: PromptRow,
    /// Linked writings in `writing_order`.
    pub writings: Vec<LinkedWriting>,
}

const PROMPT_COLUMNS: &str =
    "id, prompt_text, prompt_type, status, priority, metadata, created_at, artifact_status";

/// Fetch up to `limit` unprocessed prompts, highest priority first.
pub async fn next_text_prompts(pool: &DbPool, limit: u32) -> Result<Vec<PromptRow>, StorageError> {
    sqlx::query_as::<_, PromptRow>(&format!(
        "SELECT {PROMPT_COLUMNS} FROM prompts
         WHERE status = 'unprocessed'
         ORDER BY priority ASC, created_at ASC
         LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Fetch up to `limit` completed structured prompts awaiting media, each
/// with its full list of linked writings.
pub async fn next_media_prompts(
    pool: &DbPool,
    limit: u32,
) -> Result<Vec<MediaPrompt>, StorageError> {
    let rows = sqlx::query_as::<_, PromptRow>(&format!(
        "SELECT {PROMPT_COLUMNS} FROM prompts
         WHERE status = 'completed'
           AND artifact_status = 'pending'
           AND prompt_type IN ('image_prompt', 'lyrics_prompt')
         ORDER BY priority ASC, created_at ASC
         LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    let mut result = Vec::with_capacity(rows.len());
    for prompt in rows {
        let writings = sqlx::query_as::<_, LinkedWriting>(
            "SELECT w.id, pw.writing_order, w.title, w.content_type, w.content
             FROM prompt_writings pw
             JOIN writings w ON w.id = pw.writing_id
             WHERE pw.prompt_id = ?
             ORDER BY pw.writing_order ASC",
        )
        .bind(prompt.id)
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

        result.push(MediaPrompt { prompt, writings });
    }

    Ok(result)
}

/// A partial status update; only supplied fields reach the SET clause.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate<'a> {
    /// New error message. `None` clears a stale message unless the new
    /// status is `failed`.
    pub error_message: Option<&'a str>,
    /// New media-generation state, if any.
    pub artifact_status: Option<ArtifactStatus>,
    /// New artifact metadata blob, if any. Never cleared implicitly.
    pub artifact_metadata: Option<&'a serde_json::Value>,
}

/// Transition a prompt to `status`, stamping `processed_at` on entry to
/// `processing` and `completed_at` on entry to `completed` or `failed`.
pub async fn update_status(
    pool: &DbPool,
    prompt_id: i64,
    status: PromptStatus,
    update: StatusUpdate<'_>,
) -> Result<(), StorageError> {
    let now = now_timestamp();

    let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new("UPDATE prompts SET status = ");
    qb.push_bind(status.as_str());

    match status {
        PromptStatus::Processing => {
            qb.push(", processed_at = ").push_bind(now.clone());
        }
        PromptStatus::Completed | PromptStatus::Failed => {
            qb.push(", completed_at = ").push_bind(now.clone());
        }
        PromptStatus::Unprocessed => {}
    }

    if let Some(message) = update.error_message {
        qb.push(", error_message = ").push_bind(message.to_string());
    } else if status != PromptStatus::Failed {
        // Clear a stale message when transitioning out of failure.
        qb.push(", error_message = NULL");
    }

    if let Some(artifact_status) = update.artifact_status {
        qb.push(", artifact_status = ")
            .push_bind(artifact_status.as_str());
    }

    if let Some(metadata) = update.artifact_metadata {
        qb.push(", artifact_metadata = ")
            .push_bind(metadata.to_string());
    }

    qb.push(" WHERE id = ").push_bind(prompt_id);

    qb.build()
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Current UTC time in the store's `YYYY-MM-DD HH:MM:SS` format.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
