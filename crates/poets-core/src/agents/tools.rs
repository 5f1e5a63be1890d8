//! The core toolset registered on agents.
//!
//! Tools carry their own database/filesystem context so sessions stay
//! stateless. `save_to_database` and the `generate_*_json` tools embed a
//! `Prompt #<id>` reference in their provenance notes; the harvester's
//! fallback query depends on that marker.

use std::path::PathBuf;
use std::sync::Arc;

use super::group_chat::TERMINATE;
use super::Tool;
use crate::error::SessionError;
use crate::research::WebResearcher;
use crate::storage::writings::{insert_writing, NewWriting};
use crate::storage::DbPool;

/// Content types the sibling reader service renders natively. Anything else
/// saved without an explicit type falls back to `prose`.
const NATIVE_CONTENT_TYPES: [&str; 7] = [
    "poetry",
    "prose",
    "dialogue",
    "erotica",
    "satire",
    "political",
    "fragment",
];

/// The prompt a session is working on, shared by its tools.
#[derive(Debug, Clone)]
pub struct PromptContext {
    /// Prompt id, embedded in provenance notes.
    pub id: i64,
    /// Prompt type tag.
    pub prompt_type: String,
    /// Style/tone/length hints from the prompt's metadata blob.
    pub metadata: serde_json::Value,
}

impl PromptContext {
    fn provenance_note(&self) -> String {
        let mut note = format!("Generated from prompt #{}.", self.id);
        let style = self.metadata["style"].as_str().unwrap_or("auto");
        let tone = self.metadata["tone"].as_str().unwrap_or("natural");
        note.push_str(&format!(" Style: {style}, Tone: {tone}."));
        note
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn require_str(tool: &str, args: &serde_json::Value, key: &str) -> Result<String, SessionError> {
    args[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| SessionError::InvalidArguments {
            tool: tool.to_string(),
            message: format!("'{key}' is required"),
        })
}

fn optional_str(args: &serde_json::Value, key: &str) -> Option<String> {
    args[key].as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

// ---------------------------------------------------------------------------
// save_file
// ---------------------------------------------------------------------------

/// Save text to a timestamped file under the session output directory.
pub struct SaveFileTool {
    output_directory: PathBuf,
}

impl SaveFileTool {
    /// Create the tool rooted at `output_directory`.
    pub fn new(output_directory: PathBuf) -> Self {
        Self { output_directory }
    }
}

#[async_trait::async_trait]
impl Tool for SaveFileTool {
    fn name(&self) -> &str {
        "save_file"
    }

    fn description(&self) -> &str {
        "Save text content to a timestamped file"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "Text content to save"},
                "folder": {"type": "string", "description": "Optional subfolder"}
            },
            "required": ["content"]
        })
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String, SessionError> {
        let content = require_str(self.name(), &args, "content")?;
        let folder = optional_str(&args, "folder");

        let mut dir = self.output_directory.clone();
        if let Some(folder) = folder {
            dir = dir.join(folder);
        }
        std::fs::create_dir_all(&dir).map_err(|e| SessionError::ToolFailed {
            tool: self.name().to_string(),
            message: format!("could not create {}: {e}", dir.display()),
        })?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f");
        let filename = format!("ai_generated_{timestamp}.txt");
        let full_path = dir.join(&filename);
        std::fs::write(&full_path, &content).map_err(|e| SessionError::ToolFailed {
            tool: self.name().to_string(),
            message: format!("could not write {}: {e}", full_path.display()),
        })?;

        Ok(format!("Saved file: {filename} at {}", full_path.display()))
    }
}

// ---------------------------------------------------------------------------
// save_to_database
// ---------------------------------------------------------------------------

/// Persist content as a writing row with provenance notes.
pub struct SaveToDatabaseTool {
    pool: DbPool,
    prompt: PromptContext,
}

impl SaveToDatabaseTool {
    /// Create the tool for one prompt's session.
    pub fn new(pool: DbPool, prompt: PromptContext) -> Self {
        Self { pool, prompt }
    }
}

#[async_trait::async_trait]
impl Tool for SaveToDatabaseTool {
    fn name(&self) -> &str {
        "save_to_database"
    }

    fn description(&self) -> &str {
        "Save content to the writings database"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "The text content to save"},
                "title": {"type": "string"},
                "content_type": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "publication_status": {"type": "string", "default": "ready"},
                "notes": {"type": "string"}
            },
            "required": ["content"]
        })
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String, SessionError> {
        let content = require_str(self.name(), &args, "content")?;

        let content_type = optional_str(&args, "content_type").unwrap_or_else(|| {
            let from_prompt = self.prompt.prompt_type.as_str();
            if NATIVE_CONTENT_TYPES.contains(&from_prompt) {
                from_prompt.to_string()
            } else {
                "prose".to_string()
            }
        });

        let title = optional_str(&args, "title").unwrap_or_else(|| excerpt(&content, 50));
        let publication_status =
            optional_str(&args, "publication_status").unwrap_or_else(|| "ready".to_string());

        if let Some(tags) = args["tags"].as_array() {
            // Tag taxonomy is owned by the reader service; record for
            // operators but don't write sibling tables.
            tracing::debug!(tags = tags.len(), "tags supplied to save_to_database, not persisted");
        }

        let mut notes = self.prompt.provenance_note();
        notes.push_str(" Saved by agent session (automated).");
        if let Some(extra) = optional_str(&args, "notes") {
            notes.push(' ');
            notes.push_str(&extra);
        }

        let word_count = content.split_whitespace().count();
        let writing_id = insert_writing(
            &self.pool,
            &NewWriting {
                title: &title,
                content_type: &content_type,
                content: &content,
                publication_status: &publication_status,
                notes: &notes,
                source_prompt_id: Some(self.prompt.id),
            },
        )
        .await?;

        tracing::info!(writing_id, content_type = %content_type, "writing saved by agent");
        Ok(format!(
            "Saved writing #{writing_id}: '{title}' (type={content_type}, status={publication_status}, words={word_count})"
        ))
    }
}

// ---------------------------------------------------------------------------
// query_database
// ---------------------------------------------------------------------------

/// Search existing writings.
pub struct QueryDatabaseTool {
    pool: DbPool,
}

impl QueryDatabaseTool {
    /// Create the tool over the shared store.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Tool for QueryDatabaseTool {
    fn name(&self) -> &str {
        "query_database"
    }

    fn description(&self) -> &str {
        "Query the writings database for existing content"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "search": {"type": "string", "description": "Substring to search for"},
                "content_type": {"type": "string"},
                "limit": {"type": "integer", "default": 5}
            }
        })
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String, SessionError> {
        let search = optional_str(&args, "search");
        let content_type = optional_str(&args, "content_type");
        let limit = args["limit"].as_u64().unwrap_or(5).clamp(1, 25) as i64;

        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT id, COALESCE(title, '(untitled)'), COALESCE(content_type, '?'), substr(content, 1, 200)
             FROM writings WHERE 1 = 1",
        );
        if let Some(search) = &search {
            qb.push(" AND (content LIKE ").push_bind(format!("%{search}%"));
            qb.push(" OR title LIKE ").push_bind(format!("%{search}%"));
            qb.push(")");
        }
        if let Some(content_type) = &content_type {
            qb.push(" AND content_type = ").push_bind(content_type.clone());
        }
        qb.push(" ORDER BY id DESC LIMIT ").push_bind(limit);

        let rows: Vec<(i64, String, String, String)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(crate::error::StorageError::Query { source: e }))?;

        if rows.is_empty() {
            return Ok("No writings matched the query.".to_string());
        }

        let lines: Vec<String> = rows
            .iter()
            .map(|(id, title, content_type, snippet)| {
                format!("#{id} [{content_type}] {title}: {snippet}")
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// get_stats
// ---------------------------------------------------------------------------

/// Summarize the writings database.
pub struct GetStatsTool {
    pool: DbPool,
}

impl GetStatsTool {
    /// Create the tool over the shared store.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Tool for GetStatsTool {
    fn name(&self) -> &str {
        "get_stats"
    }

    fn description(&self) -> &str {
        "Get statistics about the writings database"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn invoke(&self, _args: serde_json::Value) -> Result<String, SessionError> {
        let totals: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(word_count), 0) FROM writings",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(crate::error::StorageError::Query { source: e }))?;

        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT COALESCE(content_type, '?'), COUNT(*) FROM writings
             GROUP BY content_type ORDER BY COUNT(*) DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(crate::error::StorageError::Query { source: e }))?;

        let mut report = format!("{} writings, {} words total", totals.0, totals.1);
        for (content_type, count) in by_type {
            report.push_str(&format!("\n  {content_type}: {count}"));
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// web_research
// ---------------------------------------------------------------------------

/// Research current information through the configured provider.
pub struct WebResearchTool {
    researcher: Arc<dyn WebResearcher>,
}

impl WebResearchTool {
    /// Create the tool over a research provider.
    pub fn new(researcher: Arc<dyn WebResearcher>) -> Self {
        Self { researcher }
    }
}

#[async_trait::async_trait]
impl Tool for WebResearchTool {
    fn name(&self) -> &str {
        "web_research"
    }

    fn description(&self) -> &str {
        "Research current information and events using web search. \
         search_type must be one of: web_search, qna_search, context_search."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to research"},
                "search_type": {
                    "type": "string",
                    "enum": crate::research::SEARCH_TYPES,
                    "default": "web_search"
                },
                "search_depth": {"type": "string", "enum": ["basic", "advanced"], "default": "advanced"},
                "max_results": {"type": "integer", "default": 3}
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String, SessionError> {
        let query = require_str(self.name(), &args, "query")?;
        let search_type =
            optional_str(&args, "search_type").unwrap_or_else(|| "web_search".to_string());
        let search_depth =
            optional_str(&args, "search_depth").unwrap_or_else(|| "advanced".to_string());
        let max_results = args["max_results"].as_u64().unwrap_or(3) as u32;

        tracing::info!(query = %query, search_type = %search_type, "web research requested");

        match self
            .researcher
            .research(&query, &search_type, &search_depth, max_results)
            .await
        {
            Ok((status, content)) => Ok(format!("{status}\n\n{content}")),
            // The chat should continue even when research is down.
            Err(e) => Ok(format!("Error: research failed: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// generate_image_json
// ---------------------------------------------------------------------------

/// Build and persist a structured image-prompt JSON document.
pub struct GenerateImageJsonTool {
    pool: DbPool,
    prompt: PromptContext,
}

impl GenerateImageJsonTool {
    /// Create the tool for one prompt's session.
    pub fn new(pool: DbPool, prompt: PromptContext) -> Self {
        Self { pool, prompt }
    }
}

#[async_trait::async_trait]
impl Tool for GenerateImageJsonTool {
    fn name(&self) -> &str {
        "generate_image_json"
    }

    fn description(&self) -> &str {
        "Save a structured image prompt as JSON for offline media generation"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string", "description": "Detailed image description"},
                "negative_prompt": {"type": "string"},
                "style_tags": {"type": "array", "items": {"type": "string"}},
                "aspect_ratio": {"type": "string", "default": "16:9"},
                "quality": {"type": "string", "default": "high"},
                "mood": {"type": "string"},
                "subject": {"type": "string"},
                "background": {"type": "string"},
                "lighting": {"type": "string"}
            },
            "required": ["prompt"]
        })
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String, SessionError> {
        let prompt = require_str(self.name(), &args, "prompt")?;

        let document = serde_json::json!({
            "prompt": prompt,
            "negative_prompt": optional_str(&args, "negative_prompt").unwrap_or_default(),
            "style_tags": args["style_tags"].as_array().cloned().unwrap_or_default(),
            "technical_params": {
                "aspect_ratio": optional_str(&args, "aspect_ratio")
                    .unwrap_or_else(|| "16:9".to_string()),
                "quality": optional_str(&args, "quality").unwrap_or_else(|| "high".to_string()),
                "mood": optional_str(&args, "mood").unwrap_or_default(),
            },
            "composition": {
                "subject": optional_str(&args, "subject").unwrap_or_default(),
                "background": optional_str(&args, "background").unwrap_or_default(),
                "lighting": optional_str(&args, "lighting").unwrap_or_default(),
            }
        });

        let title = format!("Image Prompt: {}", excerpt(&prompt, 50));
        let notes = format!(
            "Structured JSON prompt for offline media generation (Prompt #{})",
            self.prompt.id
        );
        let content = serde_json::to_string_pretty(&document).expect("document serializes");

        let writing_id = insert_writing(
            &self.pool,
            &NewWriting {
                title: &title,
                content_type: "image_prompt",
                content: &content,
                publication_status: "draft",
                notes: &notes,
                source_prompt_id: Some(self.prompt.id),
            },
        )
        .await?;

        tracing::info!(writing_id, prompt_id = self.prompt.id, "image prompt JSON saved");
        Ok(format!(
            "Saved image prompt JSON as writing #{writing_id}. {TERMINATE}"
        ))
    }
}

// ---------------------------------------------------------------------------
// generate_lyrics_json
// ---------------------------------------------------------------------------

/// Build and persist a structured lyrics JSON document.
pub struct GenerateLyricsJsonTool {
    pool: DbPool,
    prompt: PromptContext,
}

impl GenerateLyricsJsonTool {
    /// Create the tool for one prompt's session.
    pub fn new(pool: DbPool, prompt: PromptContext) -> Self {
        Self { pool, prompt }
    }
}

#[async_trait::async_trait]
impl Tool for GenerateLyricsJsonTool {
    fn name(&self) -> &str {
        "generate_lyrics_json"
    }

    fn description(&self) -> &str {
        "Save complete structured song lyrics as JSON for offline media generation"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "genre": {"type": "string"},
                "mood": {"type": "string"},
                "tempo": {"type": "string", "description": "slow, medium, or fast"},
                "structure": {
                    "type": "array",
                    "description": "Ordered song sections with lyrics",
                    "items": {"type": "object"}
                },
                "key": {"type": "string"},
                "time_signature": {"type": "string", "default": "4/4"},
                "vocal_style": {"type": "string"},
                "instrumentation": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["title", "genre", "mood", "tempo", "structure"]
        })
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String, SessionError> {
        let title = require_str(self.name(), &args, "title")?;
        let genre = require_str(self.name(), &args, "genre")?;
        let mood = require_str(self.name(), &args, "mood")?;
        let tempo = require_str(self.name(), &args, "tempo")?;
        let structure = args["structure"]
            .as_array()
            .filter(|s| !s.is_empty())
            .cloned()
            .ok_or_else(|| SessionError::InvalidArguments {
                tool: self.name().to_string(),
                message: "'structure' must be a non-empty array".to_string(),
            })?;

        let document = serde_json::json!({
            "title": title,
            "genre": genre,
            "mood": mood,
            "tempo": tempo,
            "structure": structure,
            "metadata": {
                "key": optional_str(&args, "key").unwrap_or_default(),
                "time_signature": optional_str(&args, "time_signature")
                    .unwrap_or_else(|| "4/4".to_string()),
                "vocal_style": optional_str(&args, "vocal_style").unwrap_or_default(),
                "instrumentation": args["instrumentation"].as_array().cloned().unwrap_or_default(),
            }
        });

        let writing_title = format!("Lyrics Prompt: {}", excerpt(&title, 50));
        let notes = format!(
            "Structured JSON prompt for offline media generation (Prompt #{})",
            self.prompt.id
        );
        let content = serde_json::to_string_pretty(&document).expect("document serializes");

        let writing_id = insert_writing(
            &self.pool,
            &NewWriting {
                title: &writing_title,
                content_type: "lyrics_prompt",
                content: &content,
                publication_status: "draft",
                notes: &notes,
                source_prompt_id: Some(self.prompt.id),
            },
        )
        .await?;

        tracing::info!(writing_id, prompt_id = self.prompt.id, "lyrics JSON saved");
        Ok(format!(
            "Saved lyrics JSON as writing #{writing_id}. {TERMINATE}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResearchError;
    use crate::storage::init_test_db;

    fn prompt_context() -> PromptContext {
        PromptContext {
            id: 12,
            prompt_type: "text".to_string(),
            metadata: serde_json::json!({"style": "noir", "tone": "wistful"}),
        }
    }

    #[tokio::test]
    async fn save_file_writes_timestamped_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = SaveFileTool::new(dir.path().to_path_buf());

        let result = tool
            .invoke(serde_json::json!({"content": "a poem about wind"}))
            .await
            .expect("invoke");
        assert!(result.contains("ai_generated_"));

        let entries: Vec<_> = std::fs::read_dir(dir.path()).expect("read dir").collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn save_file_honors_subfolder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = SaveFileTool::new(dir.path().to_path_buf());

        tool.invoke(serde_json::json!({"content": "x", "folder": "drafts"}))
            .await
            .expect("invoke");
        assert!(dir.path().join("drafts").is_dir());
    }

    #[tokio::test]
    async fn save_file_requires_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = SaveFileTool::new(dir.path().to_path_buf());
        let err = tool.invoke(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn save_to_database_embeds_prompt_reference() {
        let pool = init_test_db().await.expect("init db");
        let tool = SaveToDatabaseTool::new(pool.clone(), prompt_context());

        let result = tool
            .invoke(serde_json::json!({"content": "the rain came sideways"}))
            .await
            .expect("invoke");
        assert!(result.contains("Saved writing #"));

        let row: (String, Option<String>, Option<i64>) = sqlx::query_as(
            "SELECT COALESCE(notes, ''), content_type, source_prompt_id FROM writings",
        )
        .fetch_one(&pool)
        .await
        .expect("fetch");
        assert!(row.0.contains("prompt #12"));
        assert!(row.0.contains("Style: noir"));
        assert_eq!(row.1.as_deref(), Some("prose"));
        assert_eq!(row.2, Some(12));
    }

    #[tokio::test]
    async fn save_to_database_uses_native_prompt_type() {
        let pool = init_test_db().await.expect("init db");
        let mut context = prompt_context();
        context.prompt_type = "poetry".to_string();
        let tool = SaveToDatabaseTool::new(pool.clone(), context);

        tool.invoke(serde_json::json!({"content": "verse"}))
            .await
            .expect("invoke");

        let row: (Option<String>,) = sqlx::query_as("SELECT content_type FROM writings")
            .fetch_one(&pool)
            .await
            .expect("fetch");
        assert_eq!(row.0.as_deref(), Some("poetry"));
    }

    #[tokio::test]
    async fn query_database_filters_and_formats() {
        let pool = init_test_db().await.expect("init db");
        sqlx::query(
            "INSERT INTO writings (title, content_type, content) VALUES
             ('Wind Poem', 'poetry', 'the wind howls'),
             ('Rain Story', 'prose', 'the rain fell')",
        )
        .execute(&pool)
        .await
        .expect("seed");

        let tool = QueryDatabaseTool::new(pool);
        let result = tool
            .invoke(serde_json::json!({"search": "wind"}))
            .await
            .expect("invoke");
        assert!(result.contains("Wind Poem"));
        assert!(!result.contains("Rain Story"));

        let empty = tool
            .invoke(serde_json::json!({"search": "nothing matches this"}))
            .await
            .expect("invoke");
        assert_eq!(empty, "No writings matched the query.");
    }

    #[tokio::test]
    async fn get_stats_reports_counts() {
        let pool = init_test_db().await.expect("init db");
        sqlx::query(
            "INSERT INTO writings (content_type, content, word_count) VALUES
             ('poetry', 'a b c', 3), ('poetry', 'd e', 2), ('prose', 'f', 1)",
        )
        .execute(&pool)
        .await
        .expect("seed");

        let tool = GetStatsTool::new(pool);
        let result = tool.invoke(serde_json::json!({})).await.expect("invoke");
        assert!(result.contains("3 writings, 6 words total"));
        assert!(result.contains("poetry: 2"));
        assert!(result.contains("prose: 1"));
    }

    struct StubResearcher {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl WebResearcher for StubResearcher {
        async fn research(
            &self,
            query: &str,
            _search_type: &str,
            _search_depth: &str,
            _max_results: u32,
        ) -> Result<(String, String), ResearchError> {
            if self.fail {
                Err(ResearchError::MissingApiKey)
            } else {
                Ok((format!("ok: {query}"), "research body".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn web_research_formats_status_and_content() {
        let tool = WebResearchTool::new(Arc::new(StubResearcher { fail: false }));
        let result = tool
            .invoke(serde_json::json!({"query": "wind patterns"}))
            .await
            .expect("invoke");
        assert!(result.starts_with("ok: wind patterns"));
        assert!(result.contains("research body"));
    }

    #[tokio::test]
    async fn web_research_failure_is_reported_not_raised() {
        let tool = WebResearchTool::new(Arc::new(StubResearcher { fail: true }));
        let result = tool
            .invoke(serde_json::json!({"query": "anything"}))
            .await
            .expect("invoke");
        assert!(result.starts_with("Error: research failed"));
    }

    #[tokio::test]
    async fn generate_image_json_saves_draft_and_terminates() {
        let pool = init_test_db().await.expect("init db");
        let tool = GenerateImageJsonTool::new(pool.clone(), prompt_context());

        let result = tool
            .invoke(serde_json::json!({
                "prompt": "cyberpunk alley at night, neon, rain",
                "style_tags": ["cinematic"],
                "mood": "tense"
            }))
            .await
            .expect("invoke");
        assert!(result.ends_with(TERMINATE));

        let row: (String, Option<String>, Option<String>, Option<String>) = sqlx::query_as(
            "SELECT content, content_type, publication_status, notes FROM writings",
        )
        .fetch_one(&pool)
        .await
        .expect("fetch");

        let document: serde_json::Value = serde_json::from_str(&row.0).expect("valid json");
        assert_eq!(document["prompt"], "cyberpunk alley at night, neon, rain");
        assert_eq!(document["style_tags"][0], "cinematic");
        assert_eq!(document["technical_params"]["aspect_ratio"], "16:9");
        assert_eq!(document["technical_params"]["mood"], "tense");
        assert_eq!(row.1.as_deref(), Some("image_prompt"));
        assert_eq!(row.2.as_deref(), Some("draft"));
        assert!(row.3.expect("notes").contains("Prompt #12"));
    }

    #[tokio::test]
    async fn generate_image_json_requires_prompt() {
        let pool = init_test_db().await.expect("init db");
        let tool = GenerateImageJsonTool::new(pool, prompt_context());
        let err = tool
            .invoke(serde_json::json!({"mood": "tense"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn generate_lyrics_json_saves_full_schema() {
        let pool = init_test_db().await.expect("init db");
        let tool = GenerateLyricsJsonTool::new(pool.clone(), prompt_context());

        let result = tool
            .invoke(serde_json::json!({
                "title": "Static Skies",
                "genre": "synthwave",
                "mood": "melancholy",
                "tempo": "medium",
                "structure": [
                    {"type": "verse", "number": 1, "lyrics": "signals fade..."},
                    {"type": "chorus", "lyrics": "under static skies..."}
                ],
                "instrumentation": ["synth", "drum machine"]
            }))
            .await
            .expect("invoke");
        assert!(result.ends_with(TERMINATE));

        let row: (String, Option<String>) =
            sqlx::query_as("SELECT content, content_type FROM writings")
                .fetch_one(&pool)
                .await
                .expect("fetch");
        let document: serde_json::Value = serde_json::from_str(&row.0).expect("valid json");
        assert_eq!(document["title"], "Static Skies");
        assert_eq!(document["structure"].as_array().expect("array").len(), 2);
        assert_eq!(document["metadata"]["time_signature"], "4/4");
        assert_eq!(row.1.as_deref(), Some("lyrics_prompt"));
    }

    #[tokio::test]
    async fn generate_lyrics_json_rejects_empty_structure() {
        let pool = init_test_db().await.expect("init db");
        let tool = GenerateLyricsJsonTool::new(pool, prompt_context());
        let err = tool
            .invoke(serde_json::json!({
                "title": "t", "genre": "g", "mood": "m", "tempo": "fast", "structure": []
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArguments { .. }));
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("short", 50), "short");
        let long = "x".repeat(60);
        let cut = excerpt(&long, 50);
        assert_eq!(cut.len(), 53);
        assert!(cut.ends_with("..."));
    }
}
