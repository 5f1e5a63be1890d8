//! Writing insertion and prompt↔writing linking.
//!
//! The `writings` table is owned by the sibling reader service; the core
//! only inserts rows and maintains the `prompt_writings` relationship plus
//! the legacy `output_reference` pointer on the prompt.

use super::prompts::now_timestamp;
use super::DbPool;
use crate::error::StorageError;

/// A new text artifact to persist.
#[derive(Debug, Clone)]
pub struct NewWriting<'a> {
    /// Title shown by the reader service.
    pub title: &'a str,
    /// Content type tag (`image_prompt`, `lyrics_prompt`, `prose`, ...).
    pub content_type: &'a str,
    /// Full body: JSON for structured prompts, free text otherwise.
    pub content: &'a str,
    /// Publication workflow state.
    pub publication_status: &'a str,
    /// Provenance notes; must reference the source prompt id so the
    /// harvester's fallback query can find tool-saved writings.
    pub notes: &'a str,
    /// The prompt this writing came from.
    pub source_prompt_id: Option<i64>,
}

/// Insert a writing, computing word/character/line metrics from the body.
/// Returns the new writing id.
pub async fn insert_writing(pool: &DbPool, writing: &NewWriting<'_>) -> Result<i64, StorageError> {
    let word_count = writing.content.split_whitespace().count() as i64;
    let char_count = writing.content.chars().count() as i64;
    let line_count = writing
        .content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count() as i64;

    let result = sqlx::query(
        "INSERT INTO writings (
            title, content_type, content, word_count, character_count,
            line_count, publication_status, notes, source_prompt_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(writing.title)
    .bind(writing.content_type)
    .bind(writing.content)
    .bind(word_count)
    .bind(char_count)
    .bind(line_count)
    .bind(writing.publication_status)
    .bind(writing.notes)
    .bind(writing.source_prompt_id)
    .bind(now_timestamp())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(result.last_insert_rowid())
}

/// Link writings to a prompt with monotonically increasing `writing_order`
/// and point `output_reference` at the last linked writing.
///
/// Already-linked pairs are ignored; ordering continues from the highest
/// existing order. Each writing's `source_prompt_id` is stamped as well.
pub async fn link_writings(
    pool: &DbPool,
    prompt_id: i64,
    writing_ids: &[i64],
) -> Result<(), StorageError> {
    if writing_ids.is_empty() {
        return Ok(());
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let max_order: (Option<i64>,) =
        sqlx::query_as("SELECT MAX(writing_order) FROM prompt_writings WHERE prompt_id = ?")
            .bind(prompt_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StorageError::Query { source: e })?;

    let mut next_order = max_order.0.map_or(0, |m| m + 1);
    for writing_id in writing_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO prompt_writings (prompt_id, writing_id, writing_order)
             VALUES (?, ?, ?)",
        )
        .bind(prompt_id)
        .bind(writing_id)
        .bind(next_order)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

        sqlx::query("UPDATE writings SET source_prompt_id = ? WHERE id = ?")
            .bind(prompt_id)
            .bind(writing_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Query { source: e })?;

        next_order += 1;
    }

    let last_id = writing_ids[writing_ids.len() - 1];
    sqlx::query("UPDATE prompts SET output_reference = ? WHERE id = ?")
        .bind(last_id)
        .bind(prompt_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    tx.commit()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Find writings saved directly by tool calls during a recent session.
///
/// Matches rows newer than `cutoff` whose notes reference `#<prompt_id>`,
/// optionally restricted to one `content_type`. Returned in insertion
/// order.
pub async fn recent_writings_for_prompt(
    pool: &DbPool,
    prompt_id: i64,
    content_type: Option<&str>,
    cutoff: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<i64>, StorageError> {
    let cutoff_str = cutoff.format("%Y-%m-%d %H:%M:%S").to_string();

    let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
        "SELECT id, COALESCE(notes, '') FROM writings WHERE notes LIKE '%#' || ",
    );
    qb.push_bind(prompt_id);
    qb.push(" || '%' AND datetime(created_at) >= datetime(");
    qb.push_bind(cutoff_str);
    qb.push(")");
    if let Some(content_type) = content_type {
        qb.push(" AND content_type = ").push_bind(content_type.to_string());
    }
    qb.push(" ORDER BY id ASC");

    let rows: Vec<(i64, String)> = qb
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    // The LIKE filter is coarse: '#12' also matches '#123'. Require the id
    // to be followed by a non-digit (or end of string).
    let needle = format!("#{prompt_id}");
    let ids = rows
        .into_iter()
        .filter(|(_, notes)| {
            notes.match_indices(&needle).any(|(pos, _)| {
                notes[pos + needle.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| !c.is_ascii_digit())
            })
        })
        .map(|(id, _)| id)
        .collect();

    Ok(ids)
}
