//! Structured-JSON harvesting from agent sessions.
//!
//! After a structured session, the JSON may live in two places: writings
//! saved directly by `generate_*_json` tool calls, or raw JSON embedded in
//! the transcript. The fallback store query runs first; transcript
//! extraction only happens when no tool-saved writings exist.

use std::sync::OnceLock;

use regex::Regex;

use crate::agents::Transcript;
use crate::error::HarvestError;
use crate::storage::prompts::{PromptKind, PromptRow};
use crate::storage::writings::{insert_writing, link_writings, recent_writings_for_prompt, NewWriting};
use crate::storage::DbPool;

/// Slack added to the lookback window beyond the configured per-prompt
/// processing budget.
const LOOKBACK_SLACK_MINUTES: i64 = 5;

/// Result of a successful harvest.
#[derive(Debug)]
pub struct HarvestOutcome {
    /// Writings linked to the prompt, in link order.
    pub writing_ids: Vec<i64>,
    /// `false` when tool-saved writings were found and transcript parsing
    /// was skipped.
    pub via_transcript: bool,
}

/// Harvest the structured JSON for `prompt` and link it as writings.
///
/// Tool-saved writings from the last `max_processing_minutes + 5` minutes
/// win; otherwise the transcript is scanned newest-first for a payload that
/// validates against the expected schema. Both paths failing is a
/// [`HarvestError::NoJson`].
pub async fn harvest_structured_output(
    pool: &DbPool,
    prompt: &PromptRow,
    kind: PromptKind,
    transcript: &Transcript,
    max_processing_minutes: u64,
) -> Result<HarvestOutcome, HarvestError> {
    let expected = kind.type_tag().unwrap_or("structured");

    let cutoff = chrono::Utc::now()
        - chrono::Duration::minutes(max_processing_minutes as i64 + LOOKBACK_SLACK_MINUTES);
    let tool_saved = recent_writings_for_prompt(pool, prompt.id, Some(expected), cutoff).await?;

    if !tool_saved.is_empty() {
        tracing::info!(
            prompt_id = prompt.id,
            writings = tool_saved.len(),
            "linking tool-saved writings, skipping transcript extraction"
        );
        link_writings(pool, prompt.id, &tool_saved).await?;
        return Ok(HarvestOutcome {
            writing_ids: tool_saved,
            via_transcript: false,
        });
    }

    let Some(document) = extract_from_transcript(transcript, kind) else {
        return Err(HarvestError::NoJson {
            prompt_id: prompt.id,
            expected: expected.to_string(),
        });
    };

    let title = derive_title(&document, kind, &prompt.prompt_text);
    let content = serde_json::to_string_pretty(&document).expect("document serializes");
    let notes = format!(
        "Structured JSON prompt for offline media generation (Prompt #{})",
        prompt.id
    );

    let writing_id = insert_writing(
        pool,
        &NewWriting {
            title: &title,
            content_type: expected,
            content: &content,
            publication_status: "draft",
            notes: &notes,
            source_prompt_id: Some(prompt.id),
        },
    )
    .await?;
    link_writings(pool, prompt.id, &[writing_id]).await?;

    tracing::info!(prompt_id = prompt.id, writing_id, "harvested JSON from transcript");
    Ok(HarvestOutcome {
        writing_ids: vec![writing_id],
        via_transcript: true,
    })
}

/// Scan the transcript newest-first for the first schema-valid payload.
fn extract_from_transcript(transcript: &Transcript, kind: PromptKind) -> Option<serde_json::Value> {
    for message in transcript.iter().rev() {
        if message.agent_name == "user" {
            continue;
        }
        for candidate in extract_candidates(&message.content) {
            if validates(&candidate, kind) {
                return Some(candidate);
            }
        }
    }
    None
}

/// All parseable JSON candidates from one message, in strategy order:
/// fenced ```json blocks, the whole trimmed message, then any balanced
/// `{ ... }` substring.
fn extract_candidates(content: &str) -> Vec<serde_json::Value> {
    let mut candidates = Vec::new();

    static FENCED: OnceLock<Regex> = OnceLock::new();
    let fenced = FENCED.get_or_init(|| {
        Regex::new(r"(?s)```json\s*(.*?)```").expect("fenced-block pattern compiles")
    });
    for capture in fenced.captures_iter(content) {
        if let Ok(value) = serde_json::from_str(capture[1].trim()) {
            candidates.push(value);
        }
    }

    let trimmed = content.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str(trimmed) {
            candidates.push(value);
        }
    }

    for slice in balanced_objects(content) {
        if let Ok(value) = serde_json::from_str(slice) {
            candidates.push(value);
        }
    }

    candidates
}

/// Top-level balanced `{ ... }` substrings, respecting JSON strings.
fn balanced_objects(content: &str) -> Vec<&str> {
    let bytes = content.as_bytes();
    let mut objects = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }

        let start = i;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (offset, &byte) in bytes[start..].iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            match byte {
                b'\\' if in_string => escaped = true,
                b'"' => in_string = !in_string,
                b'{' if !in_string => depth += 1,
                b'}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(start + offset + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(end) => {
                objects.push(&content[start..end]);
                i = end;
            }
            None => break,
        }
    }

    objects
}

/// Schema validation: the required keys for the expected prompt type.
fn validates(value: &serde_json::Value, kind: PromptKind) -> bool {
    if !value.is_object() {
        return false;
    }
    match kind {
        PromptKind::ImagePromptJson => value.get("prompt").is_some(),
        PromptKind::LyricsPromptJson => ["title", "genre", "mood", "tempo", "structure"]
            .iter()
            .all(|key| value.get(key).is_some()),
        _ => false,
    }
}

/// The JSON's natural title when it has one, else a labeled excerpt of the
/// prompt text.
fn derive_title(document: &serde_json::Value, kind: PromptKind, prompt_text: &str) -> String {
    if let Some(natural) = document["title"].as_str().filter(|t| !t.is_empty()) {
        return natural.to_string();
    }

    let label = match kind {
        PromptKind::ImagePromptJson => "Image Prompt",
        _ => "Lyrics Prompt",
    };
    let excerpt: String = prompt_text.chars().take(50).collect();
    format!("{label}: {excerpt}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::TranscriptMessage;
    use crate::storage::init_test_db;

    fn prompt_row(pool_id: i64, prompt_type: &str) -> PromptRow {
        PromptRow {
            id: pool_id,
            prompt_text: "cyberpunk alley".to_string(),
            prompt_type: prompt_type.to_string(),
            status: "processing".to_string(),
            priority: 5,
            metadata: None,
            created_at: None,
            artifact_status: Some("pending".to_string()),
        }
    }

    async fn seed_prompt(pool: &DbPool, prompt_type: &str) -> i64 {
        sqlx::query("INSERT INTO prompts (prompt_text, prompt_type, status) VALUES ('cyberpunk alley', ?, 'processing')")
            .bind(prompt_type)
            .execute(pool)
            .await
            .expect("insert")
            .last_insert_rowid()
    }

    fn message(agent: &str, content: &str) -> TranscriptMessage {
        TranscriptMessage {
            agent_name: agent.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn extracts_fenced_json() {
        let candidates =
            extract_candidates("Here you go:\n```json\n{\"prompt\": \"alley\"}\n```\nDone.");
        assert!(candidates.iter().any(|c| c["prompt"] == "alley"));
    }

    #[test]
    fn extracts_whole_message_object() {
        let candidates = extract_candidates("  {\"prompt\": \"alley\"}  ");
        assert!(candidates.iter().any(|c| c["prompt"] == "alley"));
    }

    #[test]
    fn extracts_embedded_balanced_object() {
        let candidates =
            extract_candidates("The final JSON is {\"prompt\": \"alley\", \"mood\": \"tense\"} as requested.");
        assert!(candidates.iter().any(|c| c["prompt"] == "alley"));
    }

    #[test]
    fn balanced_scanner_handles_nested_and_strings() {
        let content = r#"prefix {"a": {"b": "closing brace in string }"}, "c": 1} suffix {"d": 2}"#;
        let objects = balanced_objects(content);
        assert_eq!(objects.len(), 2);
        let first: serde_json::Value = serde_json::from_str(objects[0]).expect("parse");
        assert_eq!(first["c"], 1);
        let second: serde_json::Value = serde_json::from_str(objects[1]).expect("parse");
        assert_eq!(second["d"], 2);
    }

    #[test]
    fn unterminated_object_is_ignored() {
        assert!(balanced_objects("{\"never\": \"closes\"").is_empty());
    }

    #[test]
    fn image_schema_requires_prompt_key() {
        assert!(validates(
            &serde_json::json!({"prompt": "alley"}),
            PromptKind::ImagePromptJson
        ));
        assert!(!validates(
            &serde_json::json!({"description": "alley"}),
            PromptKind::ImagePromptJson
        ));
        assert!(!validates(&serde_json::json!("alley"), PromptKind::ImagePromptJson));
    }

    #[test]
    fn lyrics_schema_requires_all_keys() {
        let full = serde_json::json!({
            "title": "t", "genre": "g", "mood": "m", "tempo": "fast", "structure": []
        });
        assert!(validates(&full, PromptKind::LyricsPromptJson));

        let partial = serde_json::json!({"title": "t", "genre": "g"});
        assert!(!validates(&partial, PromptKind::LyricsPromptJson));
    }

    #[tokio::test]
    async fn transcript_harvest_saves_and_links() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_prompt(&pool, "image_prompt").await;
        let mut prompt = prompt_row(id, "image_prompt");
        prompt.id = id;

        let transcript = vec![
            message("user", "Create a structured image_prompt based on: cyberpunk alley"),
            message("Poet", "How about this?\n```json\n{\"prompt\": \"neon rain over the alley\"}\n```"),
        ];

        let outcome = harvest_structured_output(&pool, &prompt, PromptKind::ImagePromptJson, &transcript, 30)
            .await
            .expect("harvest");
        assert!(outcome.via_transcript);
        assert_eq!(outcome.writing_ids.len(), 1);

        let row: (String, Option<String>, Option<i64>) = sqlx::query_as(
            "SELECT content, content_type, source_prompt_id FROM writings WHERE id = ?",
        )
        .bind(outcome.writing_ids[0])
        .fetch_one(&pool)
        .await
        .expect("fetch");
        let document: serde_json::Value = serde_json::from_str(&row.0).expect("json");
        assert_eq!(document["prompt"], "neon rain over the alley");
        assert_eq!(row.1.as_deref(), Some("image_prompt"));
        assert_eq!(row.2, Some(id));

        let output_ref: (Option<i64>,) =
            sqlx::query_as("SELECT output_reference FROM prompts WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .expect("fetch");
        assert_eq!(output_ref.0, Some(outcome.writing_ids[0]));
    }

    #[tokio::test]
    async fn newest_valid_candidate_wins() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_prompt(&pool, "image_prompt").await;
        let mut prompt = prompt_row(id, "image_prompt");
        prompt.id = id;

        let transcript = vec![
            message("Poet", "{\"prompt\": \"older draft\"}"),
            message("Editor", "{\"prompt\": \"final version\"}"),
        ];

        let outcome = harvest_structured_output(&pool, &prompt, PromptKind::ImagePromptJson, &transcript, 30)
            .await
            .expect("harvest");

        let row: (String,) = sqlx::query_as("SELECT content FROM writings WHERE id = ?")
            .bind(outcome.writing_ids[0])
            .fetch_one(&pool)
            .await
            .expect("fetch");
        assert!(row.0.contains("final version"));
    }

    #[tokio::test]
    async fn tool_saved_writings_skip_transcript() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_prompt(&pool, "lyrics_prompt").await;
        let mut prompt = prompt_row(id, "lyrics_prompt");
        prompt.id = id;

        // Two writings saved by generate_lyrics_json during the session.
        for n in 1..=2 {
            insert_writing(
                &pool,
                &NewWriting {
                    title: &format!("Lyrics {n}"),
                    content_type: "lyrics_prompt",
                    content: "{\"title\": \"x\"}",
                    publication_status: "draft",
                    notes: &format!("Structured JSON prompt for offline media generation (Prompt #{id})"),
                    source_prompt_id: Some(id),
                },
            )
            .await
            .expect("seed writing");
        }

        // Transcript contains JSON that must NOT be used.
        let transcript = vec![message(
            "Poet",
            "{\"title\": \"t\", \"genre\": \"g\", \"mood\": \"m\", \"tempo\": \"slow\", \"structure\": []}",
        )];

        let outcome = harvest_structured_output(&pool, &prompt, PromptKind::LyricsPromptJson, &transcript, 30)
            .await
            .expect("harvest");
        assert!(!outcome.via_transcript);
        assert_eq!(outcome.writing_ids.len(), 2);

        // No third writing was created from the transcript.
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM writings")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count.0, 2);

        // output_reference is the last linked writing.
        let output_ref: (Option<i64>,) =
            sqlx::query_as("SELECT output_reference FROM prompts WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .expect("fetch");
        assert_eq!(output_ref.0, Some(outcome.writing_ids[1]));
    }

    #[tokio::test]
    async fn empty_transcript_is_no_json() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_prompt(&pool, "image_prompt").await;
        let mut prompt = prompt_row(id, "image_prompt");
        prompt.id = id;

        let transcript = vec![message("Poet", "I could not produce anything useful.")];
        let err = harvest_structured_output(&pool, &prompt, PromptKind::ImagePromptJson, &transcript, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::NoJson { .. }));
        assert!(err.to_string().contains("JSON extraction failed"));
    }

    #[tokio::test]
    async fn wrong_schema_in_transcript_is_no_json() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_prompt(&pool, "lyrics_prompt").await;
        let mut prompt = prompt_row(id, "lyrics_prompt");
        prompt.id = id;

        // Valid JSON, but an image schema when lyrics were expected.
        let transcript = vec![message("Poet", "{\"prompt\": \"an image instead\"}")];
        let err = harvest_structured_output(&pool, &prompt, PromptKind::LyricsPromptJson, &transcript, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::NoJson { .. }));
    }

    #[test]
    fn derive_title_prefers_natural_title() {
        let document = serde_json::json!({"title": "Static Skies"});
        assert_eq!(
            derive_title(&document, PromptKind::LyricsPromptJson, "a song"),
            "Static Skies"
        );
    }

    #[test]
    fn derive_title_falls_back_to_excerpt() {
        let document = serde_json::json!({"prompt": "alley"});
        let title = derive_title(&document, PromptKind::ImagePromptJson, "cyberpunk alley");
        assert_eq!(title, "Image Prompt: cyberpunk alley...");
    }
}
