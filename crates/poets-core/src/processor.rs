//! The queue processor: the top-level state machine behind `--queue`.
//!
//! One invocation is a tick. A tick acquires the process lock, drains up to
//! a batch of text/structured prompts and a batch of media-ready prompts,
//! routes each through the right generator, and forces a WAL checkpoint so
//! the reader service observes the updates immediately. Per-prompt failures
//! never abort the tick.
//!
//! Ordering guarantee: the text pass always runs before the media pass, so
//! media for a structured prompt never runs in the tick that produced its
//! JSON — the reader sees a consistent `completed/pending` intermediate
//! state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::session::{run_structured_session, run_text_session, SessionContext};
use crate::agents::Transcript;
use crate::config::Config;
use crate::error::{LockError, ProcessorError};
use crate::harvest::harvest_structured_output;
use crate::health;
use crate::llm::OpenAiCompatClient;
use crate::lock::{self, ProcessLock};
use crate::media::{ArtifactKind, MediaPipeline};
use crate::research::{TavilyClient, UnconfiguredResearcher, WebResearcher};
use crate::storage::artifacts::insert_artifacts;
use crate::storage::prompts::{
    next_media_prompts, next_text_prompts, update_status, ArtifactStatus, MediaPrompt, PromptKind,
    PromptRow, PromptStatus, StatusUpdate,
};
use crate::storage::writings::{link_writings, recent_writings_for_prompt};
use crate::storage::{checkpoint, with_retry, DbPool};

/// How many prompts each pass drains per tick.
const QUEUE_BATCH: u32 = 5;

/// Cooperative load shedding between items; not a correctness requirement.
const ITEM_DELAY: Duration = Duration::from_secs(2);

/// Outcome of one tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// Another instance holds the lock; nothing was done.
    Busy,
    /// Both queues were empty; no LLM or media endpoint was contacted.
    Idle,
    /// The tick was abandoned before processing (environment or model
    /// validation failed).
    Aborted {
        /// Why the tick was abandoned.
        reason: String,
    },
    /// The tick ran to completion.
    Completed(TickReport),
}

/// Per-pass accounting for a completed tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Text/structured prompts that finished successfully.
    pub text_processed: usize,
    /// Text/structured prompts marked failed.
    pub text_failed: usize,
    /// Media prompts that produced artifacts.
    pub media_processed: usize,
    /// Media prompts marked failed.
    pub media_failed: usize,
    /// Media-ready prompts left in `pending` because the host was down.
    pub media_deferred: usize,
}

/// Media pipelines and host state for one tick.
struct MediaSupport {
    pipelines: HashMap<&'static str, MediaPipeline>,
    prompt_type_map: HashMap<String, String>,
    host: Option<String>,
    available: Option<bool>,
}

impl MediaSupport {
    /// Build pipelines from configuration. Returns `None` when media is
    /// disabled. Missing scripts are logged and skipped; the prompts they
    /// would serve fail as unsupported.
    fn initialize(config: &Config) -> Option<Self> {
        if !config.media.enabled {
            return None;
        }

        let comfy = &config.media.comfyui;
        let output_root = config.media_output_root();
        for subdir in ["image", "audio"] {
            if let Err(e) = std::fs::create_dir_all(output_root.join(subdir)) {
                tracing::error!(error = %e, "failed to create media output tree");
                return None;
            }
        }

        let timeout = Duration::from_secs(comfy.timeout_seconds);
        let mut pipelines = HashMap::new();

        let script_entries: [(&str, ArtifactKind, Option<&String>); 3] = [
            ("image", ArtifactKind::Image, config.media.scripts.image.as_ref()),
            ("music", ArtifactKind::Audio, config.media.scripts.music.as_ref()),
            ("audio", ArtifactKind::Audio, config.media.scripts.audio.as_ref()),
        ];

        for (script_key, kind, script_rel_path) in script_entries {
            let Some(script_rel_path) = script_rel_path else {
                continue;
            };
            if pipelines.contains_key(kind.as_str()) {
                // Already configured (e.g. both 'music' and 'audio' entries).
                continue;
            }

            let script_path = config.config_dir.join(script_rel_path);
            if !script_path.exists() {
                tracing::error!(
                    script = %script_path.display(),
                    key = script_key,
                    "media script not found"
                );
                continue;
            }

            let extra_args = config
                .media
                .script_args
                .get(script_key)
                .cloned()
                .unwrap_or_default();

            pipelines.insert(
                kind.as_str(),
                MediaPipeline::new(
                    kind,
                    script_path,
                    comfy.python.clone(),
                    output_root.clone(),
                    comfy.queue_size,
                    timeout,
                    comfy.comfyui_directory.clone(),
                    extra_args,
                ),
            );
        }

        if pipelines.is_empty() {
            tracing::warn!("media processing is enabled but no pipelines were initialised");
        }

        Some(Self {
            pipelines,
            prompt_type_map: config.media.effective_prompt_type_map(),
            host: comfy.host.clone(),
            available: None,
        })
    }

    /// Probe the media host on first use; re-probe while it stays down so a
    /// recovered host is picked up within the same tick.
    async fn ensure_available(&mut self) -> bool {
        if self.available == Some(true) {
            return true;
        }
        let healthy = health::check_media_host(self.host.as_deref()).await;
        self.available = Some(healthy);
        healthy
    }
}

/// The orchestration state machine invoked once per scheduled tick.
pub struct QueueProcessor {
    config: Config,
    pool: DbPool,
    item_delay: Duration,
}

impl QueueProcessor {
    /// Create a processor over a loaded config and an initialized store.
    pub fn new(config: Config, pool: DbPool) -> Self {
        Self {
            config,
            pool,
            item_delay: ITEM_DELAY,
        }
    }

    /// Override the inter-item delay (used by tests).
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    /// Run one tick.
    pub async fn run_tick(&self) -> Result<TickOutcome, ProcessorError> {
        let mut process_lock = ProcessLock::new(self.config.lock_path(), lock::DEFAULT_TIMEOUT);
        match process_lock.acquire() {
            Ok(()) => {}
            Err(LockError::Busy { .. }) => {
                tracing::info!("another tick holds the process lock, skipping execution");
                return Ok(TickOutcome::Busy);
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!("acquired process lock, checking for queued prompts");

        let prompts = with_retry(|| next_text_prompts(&self.pool, QUEUE_BATCH)).await?;
        let media_ready = if self.config.media.enabled {
            with_retry(|| next_media_prompts(&self.pool, QUEUE_BATCH)).await?
        } else {
            Vec::new()
        };

        if prompts.is_empty() && media_ready.is_empty() {
            tracing::info!("no queued prompts, exiting without touching any endpoint");
            process_lock.release();
            return Ok(TickOutcome::Idle);
        }

        // Environment and model validation run only when text work exists;
        // media-only ticks skip both.
        let session_ctx = if prompts.is_empty() {
            None
        } else {
            match self.build_session_context().await {
                Ok(ctx) => Some(ctx),
                Err(reason) => {
                    tracing::error!(reason = %reason, "abandoning tick before processing");
                    process_lock.release();
                    return Ok(TickOutcome::Aborted { reason });
                }
            }
        };

        let mut media = MediaSupport::initialize(&self.config);
        let mut report = TickReport::default();

        tracing::info!(
            text_prompts = prompts.len(),
            media_prompts = media_ready.len(),
            "processing queue"
        );

        for prompt in &prompts {
            let kind = match &media {
                Some(media) => PromptKind::classify(&prompt.prompt_type, &media.prompt_type_map),
                None => PromptKind::classify(&prompt.prompt_type, &HashMap::new()),
            };
            tracing::info!(
                prompt_id = prompt.id,
                prompt_type = %prompt.prompt_type,
                kind = ?kind,
                "processing prompt"
            );

            let succeeded = match kind {
                PromptKind::ImagePromptJson | PromptKind::LyricsPromptJson => {
                    let ctx = session_ctx
                        .as_ref()
                        .expect("session context exists when text prompts are queued");
                    self.process_structured_prompt(ctx, prompt, kind).await
                }
                PromptKind::MediaImage
                | PromptKind::MediaAudio
                | PromptKind::MediaVoice
                | PromptKind::Unsupported => {
                    self.process_media_prompt(
                        media.as_mut(),
                        prompt.id,
                        &prompt.prompt_type,
                        &prompt.prompt_text,
                        &prompt.metadata_value(),
                        kind,
                    )
                    .await
                }
                PromptKind::Text => {
                    let ctx = session_ctx
                        .as_ref()
                        .expect("session context exists when text prompts are queued");
                    self.process_text_prompt(ctx, prompt).await
                }
            };

            if succeeded {
                report.text_processed += 1;
            } else {
                report.text_failed += 1;
            }
            tokio::time::sleep(self.item_delay).await;
        }

        for media_prompt in &media_ready {
            match self.process_media_ready(media.as_mut(), media_prompt).await {
                Some(true) => report.media_processed += 1,
                Some(false) => report.media_failed += 1,
                None => report.media_deferred += 1,
            }
            tokio::time::sleep(self.item_delay).await;
        }

        checkpoint(&self.pool).await?;
        process_lock.release();
        tracing::info!(
            text_processed = report.text_processed,
            text_failed = report.text_failed,
            media_processed = report.media_processed,
            media_failed = report.media_failed,
            media_deferred = report.media_deferred,
            "queue processing completed"
        );
        Ok(TickOutcome::Completed(report))
    }

    /// Validate environment + models and assemble the session dependencies.
    /// Returns a human-readable reason on failure.
    async fn build_session_context(&self) -> Result<SessionContext, String> {
        self.config
            .check_environment()
            .map_err(|e| e.to_string())?;

        let base_url = self.config.resolve_base_url().map_err(|e| e.to_string())?;

        if self.config.processing.validate_models_on_startup {
            health::validate_models(&base_url, &self.config.models.all())
                .await
                .map_err(|e| format!("model validation failed: {e}"))?;
        }

        let researcher: Arc<dyn WebResearcher> = match TavilyClient::from_env() {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::warn!(error = %e, "web research unavailable for this tick");
                Arc::new(UnconfiguredResearcher)
            }
        };

        Ok(SessionContext {
            pool: self.pool.clone(),
            backend: Arc::new(OpenAiCompatClient::new(base_url, self.config.llm_api_key())),
            researcher,
        })
    }

    /// Text path: run the group chat, then link any writings the agents
    /// saved during the session.
    async fn process_text_prompt(&self, ctx: &SessionContext, prompt: &PromptRow) -> bool {
        if !self
            .mark(prompt.id, PromptStatus::Processing, StatusUpdate::default())
            .await
        {
            return false;
        }

        match run_text_session(ctx, &self.config, prompt).await {
            Ok(_transcript) => {
                self.link_session_writings(prompt).await;
                self.mark(prompt.id, PromptStatus::Completed, StatusUpdate::default())
                    .await
            }
            Err(e) => {
                tracing::error!(prompt_id = prompt.id, error = %e, "text session failed");
                self.mark(
                    prompt.id,
                    PromptStatus::Failed,
                    StatusUpdate {
                        error_message: Some(&e.to_string()),
                        ..Default::default()
                    },
                )
                .await;
                false
            }
        }
    }

    /// Link writings saved by tool calls during a text session and update
    /// `output_reference`. Sessions without saved writings are still valid.
    async fn link_session_writings(&self, prompt: &PromptRow) {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::minutes(
                self.config.processing.max_processing_time_minutes as i64 + 5,
            );
        match recent_writings_for_prompt(&self.pool, prompt.id, None, cutoff).await {
            Ok(writing_ids) if !writing_ids.is_empty() => {
                if let Err(e) = link_writings(&self.pool, prompt.id, &writing_ids).await {
                    tracing::warn!(prompt_id = prompt.id, error = %e, "failed to link session writings");
                } else {
                    tracing::info!(
                        prompt_id = prompt.id,
                        writings = writing_ids.len(),
                        "linked session writings"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(prompt_id = prompt.id, error = %e, "failed to query session writings");
            }
        }
    }

    /// Structured path: JSON-mandated session, then harvest. Success leaves
    /// the prompt `completed / pending` for a later tick's media pass.
    async fn process_structured_prompt(
        &self,
        ctx: &SessionContext,
        prompt: &PromptRow,
        kind: PromptKind,
    ) -> bool {
        if !self
            .mark(prompt.id, PromptStatus::Processing, StatusUpdate::default())
            .await
        {
            return false;
        }

        let transcript = match run_structured_session(ctx, &self.config, prompt, kind).await {
            Ok(transcript) => transcript,
            Err(e) => {
                tracing::error!(prompt_id = prompt.id, error = %e, "structured session failed");
                self.mark(
                    prompt.id,
                    PromptStatus::Failed,
                    StatusUpdate {
                        error_message: Some(&e.to_string()),
                        ..Default::default()
                    },
                )
                .await;
                return false;
            }
        };

        match harvest_structured_output(
            &self.pool,
            prompt,
            kind,
            &transcript,
            self.config.processing.max_processing_time_minutes,
        )
        .await
        {
            Ok(outcome) => {
                tracing::info!(
                    prompt_id = prompt.id,
                    writings = outcome.writing_ids.len(),
                    via_transcript = outcome.via_transcript,
                    "structured generation completed, pending media"
                );
                self.mark(
                    prompt.id,
                    PromptStatus::Completed,
                    StatusUpdate {
                        artifact_status: Some(ArtifactStatus::Pending),
                        ..Default::default()
                    },
                )
                .await
            }
            Err(e) => {
                tracing::error!(prompt_id = prompt.id, error = %e, "harvest failed");
                self.mark(
                    prompt.id,
                    PromptStatus::Failed,
                    StatusUpdate {
                        error_message: Some(&e.to_string()),
                        ..Default::default()
                    },
                )
                .await;
                false
            }
        }
    }

    /// Media path for one prompt, shared by both passes.
    async fn process_media_prompt(
        &self,
        media: Option<&mut MediaSupport>,
        prompt_id: i64,
        prompt_type: &str,
        prompt_text: &str,
        metadata: &serde_json::Value,
        kind: PromptKind,
    ) -> bool {
        let (Some(media), Some(pipeline_key)) = (media, kind.pipeline_key()) else {
            self.mark(
                prompt_id,
                PromptStatus::Failed,
                StatusUpdate {
                    error_message: Some(&format!(
                        "No media pipeline for prompt type '{prompt_type}'"
                    )),
                    artifact_status: Some(ArtifactStatus::Unsupported),
                    ..Default::default()
                },
            )
            .await;
            return false;
        };

        if !media.pipelines.contains_key(pipeline_key) {
            self.mark(
                prompt_id,
                PromptStatus::Failed,
                StatusUpdate {
                    error_message: Some(&format!("Media pipeline '{pipeline_key}' is unavailable")),
                    artifact_status: Some(ArtifactStatus::Unsupported),
                    ..Default::default()
                },
            )
            .await;
            return false;
        }

        if !media.ensure_available().await {
            tracing::warn!(prompt_id, "media host is unavailable, failing prompt");
            self.mark(
                prompt_id,
                PromptStatus::Failed,
                StatusUpdate {
                    error_message: Some("media host is unavailable"),
                    artifact_status: Some(ArtifactStatus::Error),
                    ..Default::default()
                },
            )
            .await;
            return false;
        }

        let pipeline = &media.pipelines[pipeline_key];

        if !self
            .mark(
                prompt_id,
                PromptStatus::Processing,
                StatusUpdate {
                    artifact_status: Some(ArtifactStatus::Processing),
                    ..Default::default()
                },
            )
            .await
        {
            return false;
        }

        match pipeline.run(prompt_id, prompt_text, Some(metadata)).await {
            Ok(run) => {
                let recorded = with_retry(|| insert_artifacts(&self.pool, prompt_id, &run.artifacts))
                    .await;
                if let Err(e) = recorded {
                    tracing::error!(prompt_id, error = %e, "failed to record artifacts");
                    self.mark(
                        prompt_id,
                        PromptStatus::Failed,
                        StatusUpdate {
                            error_message: Some(&e.to_string()),
                            artifact_status: Some(ArtifactStatus::Error),
                            ..Default::default()
                        },
                    )
                    .await;
                    return false;
                }

                let summary = run.summary_metadata();
                tracing::info!(
                    prompt_id,
                    artifacts = run.artifacts.len(),
                    run_directory = %run.run_directory,
                    "media generation succeeded"
                );
                self.mark(
                    prompt_id,
                    PromptStatus::Completed,
                    StatusUpdate {
                        artifact_status: Some(ArtifactStatus::Ready),
                        artifact_metadata: Some(&summary),
                        ..Default::default()
                    },
                )
                .await
            }
            Err(e) => {
                tracing::error!(prompt_id, error = %e, "media pipeline error");
                self.mark(
                    prompt_id,
                    PromptStatus::Failed,
                    StatusUpdate {
                        error_message: Some(&e.to_string()),
                        artifact_status: Some(ArtifactStatus::Error),
                        ..Default::default()
                    },
                )
                .await;
                false
            }
        }
    }

    /// Second pass: render stored structured JSON into media.
    ///
    /// Returns `None` when the prompt was deferred: an unreachable media
    /// host leaves `completed/pending` prompts untouched so a later tick
    /// can pick them up.
    async fn process_media_ready(
        &self,
        mut media: Option<&mut MediaSupport>,
        media_prompt: &MediaPrompt,
    ) -> Option<bool> {
        let prompt = &media_prompt.prompt;
        let kind = PromptKind::classify(&prompt.prompt_type, &HashMap::new());

        // Defer (rather than fail) when the host is down and a pipeline
        // would otherwise serve this prompt.
        if let (Some(media), Some(pipeline_key)) = (media.as_deref_mut(), kind.pipeline_key()) {
            if media.pipelines.contains_key(pipeline_key) && !media.ensure_available().await {
                tracing::warn!(
                    prompt_id = prompt.id,
                    "media host unavailable, deferring pending prompt"
                );
                return None;
            }
        }

        let Some(prompt_text) = stored_prompt_text(media_prompt, kind) else {
            self.mark(
                prompt.id,
                PromptStatus::Failed,
                StatusUpdate {
                    error_message: Some("no stored JSON available for media generation"),
                    artifact_status: Some(ArtifactStatus::Error),
                    ..Default::default()
                },
            )
            .await;
            return Some(false);
        };

        Some(
            self.process_media_prompt(
                media,
                prompt.id,
                &prompt.prompt_type,
                &prompt_text,
                &prompt.metadata_value(),
                kind,
            )
            .await,
        )
    }

    /// Apply a status update through the retry wrapper, logging failures.
    async fn mark(&self, prompt_id: i64, status: PromptStatus, update: StatusUpdate<'_>) -> bool {
        let result = with_retry(|| update_status(&self.pool, prompt_id, status, update.clone())).await;
        if let Err(e) = result {
            tracing::error!(prompt_id, error = %e, "failed to update prompt status");
            false
        } else {
            true
        }
    }
}

/// The text handed to the pipeline for a stored structured prompt: the
/// image JSON's `prompt` field, or the full lyrics document. Uses the most
/// recently linked writing.
fn stored_prompt_text(media_prompt: &MediaPrompt, kind: PromptKind) -> Option<String> {
    let newest = media_prompt.writings.last()?;

    match kind {
        PromptKind::ImagePromptJson => {
            let document: serde_json::Value = serde_json::from_str(&newest.content).ok()?;
            document["prompt"]
                .as_str()
                .map(str::to_string)
                .or_else(|| Some(newest.content.clone()))
        }
        _ => Some(newest.content.clone()),
    }
}

/// Run one generation with a caller-supplied prompt outside the queue;
/// backs the CLI's default mode. Environment and model validation follow
/// the same rules as a text tick.
pub async fn run_single_generation(
    config: &Config,
    pool: &DbPool,
    prompt_text: &str,
) -> Result<Transcript, ProcessorError> {
    config.check_environment()?;
    let base_url = config.resolve_base_url()?;

    if config.processing.validate_models_on_startup {
        if let Err(e) = health::validate_models(&base_url, &config.models.all()).await {
            return Err(ProcessorError::Config(
                crate::error::ConfigError::InvalidValue {
                    field: "models".to_string(),
                    message: e.to_string(),
                },
            ));
        }
    }

    let researcher: Arc<dyn WebResearcher> = match TavilyClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(_) => Arc::new(UnconfiguredResearcher),
    };
    let ctx = SessionContext {
        pool: pool.clone(),
        backend: Arc::new(OpenAiCompatClient::new(base_url, config.llm_api_key())),
        researcher,
    };

    let prompt = PromptRow {
        id: 999,
        prompt_text: prompt_text.to_string(),
        prompt_type: "text".to_string(),
        status: "processing".to_string(),
        priority: 5,
        metadata: None,
        created_at: None,
        artifact_status: None,
    };

    let transcript = run_text_session(&ctx, config, &prompt).await?;
    Ok(transcript)
}
