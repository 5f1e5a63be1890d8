//! Media pipelines: one adapter per artifact type over the exported
//! workflow scripts.
//!
//! Each pipeline owns a fixed prompt-bearing argument name (`--text4` for
//! image, `--lyrics6` for audio) and a fixed set of invocation extras. The
//! run protocol is: create a timestamped run directory, snapshot it, invoke
//! the workflow, diff the directory, and assemble artifact rows whose paths
//! are stored relative to the media output root.

pub mod runner;
pub mod snapshot;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;
use crate::storage::artifacts::PromptArtifact;

use runner::{run_workflow, tail, TAIL_BYTES};
use snapshot::{detect_new_files, relative_posix, snapshot_files};

/// The artifact family a pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Still images; `preview_path` mirrors `file_path`.
    Image,
    /// Rendered audio; no preview.
    Audio,
}

impl ArtifactKind {
    /// Directory name and `artifact_type` column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Audio => "audio",
        }
    }

    /// The prompt-bearing argument the workflow script expects.
    fn prompt_arg(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "text4",
            ArtifactKind::Audio => "lyrics6",
        }
    }
}

/// Everything produced by one pipeline run.
#[derive(Debug)]
pub struct PipelineRun {
    /// Artifact rows ready for insertion.
    pub artifacts: Vec<PromptArtifact>,
    /// Captured stdout from the workflow.
    pub stdout: String,
    /// Captured stderr from the workflow.
    pub stderr: String,
    /// Wall-clock duration of the workflow run.
    pub duration_seconds: f64,
    /// Run directory, relative to the output root (POSIX form).
    pub run_directory: String,
}

impl PipelineRun {
    /// The summary blob stored in `prompts.artifact_metadata`.
    pub fn summary_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "duration_seconds": self.duration_seconds,
            "run_directory": self.run_directory,
            "stdout_tail": tail(&self.stdout, TAIL_BYTES),
            "stderr_tail": tail(&self.stderr, TAIL_BYTES),
            "artifact_count": self.artifacts.len(),
        })
    }
}

/// An adapter over one exported workflow script.
#[derive(Debug, Clone)]
pub struct MediaPipeline {
    kind: ArtifactKind,
    script_path: PathBuf,
    python_executable: String,
    output_root: PathBuf,
    queue_size: u32,
    timeout: Duration,
    comfyui_directory: Option<String>,
    extra_args: Vec<String>,
}

impl MediaPipeline {
    /// Create a pipeline for `kind` over `script_path`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: ArtifactKind,
        script_path: PathBuf,
        python_executable: String,
        output_root: PathBuf,
        queue_size: u32,
        timeout: Duration,
        comfyui_directory: Option<String>,
        extra_args: Vec<String>,
    ) -> Self {
        Self {
            kind,
            script_path,
            python_executable,
            output_root,
            queue_size,
            timeout,
            comfyui_directory,
            extra_args,
        }
    }

    /// The artifact family this pipeline produces.
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Path of the workflow script.
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Execute the workflow for one prompt and collect its artifacts.
    pub async fn run(
        &self,
        prompt_id: i64,
        prompt_text: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<PipelineRun, PipelineError> {
        let run_dir = self.create_run_directory(prompt_id)?;

        // Always empty on first use; a safety net for reruns into an
        // existing directory.
        let pre_snapshot = snapshot_files(&run_dir).map_err(|e| PipelineError::Io { source: e })?;

        let args = self.build_command_args(prompt_text, &run_dir);
        let result = run_workflow(
            &self.python_executable,
            &self.script_path,
            &args,
            self.timeout,
            &[],
        )
        .await?;

        let (new_files, _) =
            detect_new_files(&run_dir, &pre_snapshot).map_err(|e| PipelineError::Io { source: e })?;

        if new_files.is_empty() {
            return Err(PipelineError::NoArtifacts {
                prompt_id,
                script: self.script_name(),
            });
        }

        let mut artifact_metadata = serde_json::json!({
            "script": self.script_name(),
            "duration_seconds": result.duration_seconds,
        });
        if self.kind == ArtifactKind::Audio {
            artifact_metadata["prompt_text"] = serde_json::Value::String(prompt_text.to_string());
        }
        if let (Some(obj), Some(serde_json::Value::Object(extra))) =
            (artifact_metadata.as_object_mut(), metadata.cloned())
        {
            for (key, value) in extra {
                if !value.is_null() {
                    obj.insert(key, value);
                }
            }
        }

        let artifacts = new_files
            .iter()
            .map(|path| {
                let file_path = relative_posix(path, &self.output_root);
                PromptArtifact {
                    artifact_type: self.kind.as_str().to_string(),
                    file_path: file_path.clone(),
                    preview_path: match self.kind {
                        ArtifactKind::Image => Some(file_path),
                        ArtifactKind::Audio => None,
                    },
                    metadata: artifact_metadata.clone(),
                }
            })
            .collect();

        Ok(PipelineRun {
            artifacts,
            stdout: result.stdout,
            stderr: result.stderr,
            duration_seconds: result.duration_seconds,
            run_directory: relative_posix(&run_dir, &self.output_root),
        })
    }

    /// `<output_root>/<artifact_type>/<prompt_id>_<UTC timestamp>`.
    fn create_run_directory(&self, prompt_id: i64) -> Result<PathBuf, PipelineError> {
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let run_dir = self
            .output_root
            .join(self.kind.as_str())
            .join(format!("{prompt_id}_{timestamp}"));
        std::fs::create_dir_all(&run_dir).map_err(|e| PipelineError::Io { source: e })?;
        Ok(run_dir)
    }

    fn build_command_args(&self, prompt_text: &str, run_dir: &Path) -> Vec<String> {
        let mut args = vec![
            format!("--{}", self.kind.prompt_arg()),
            prompt_text.to_string(),
            "--queue-size".to_string(),
            self.queue_size.to_string(),
            "--output".to_string(),
            run_dir.to_string_lossy().to_string(),
        ];

        if let Some(comfyui_directory) = &self.comfyui_directory {
            args.push("--comfyui-directory".to_string());
            args.push(comfyui_directory.clone());
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn script_name(&self) -> String {
        self.script_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.script_path.display().to_string())
    }
}
