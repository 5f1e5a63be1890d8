//! Bounded subprocess execution for exported workflow scripts.
//!
//! Runs a workflow under the configured Python interpreter with captured
//! stdout/stderr and a hard wall-clock timeout. The child is spawned with
//! `kill_on_drop` so an elapsed timeout reliably terminates it.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::PipelineError;

/// How much of each captured stream is preserved in errors and metadata.
pub const TAIL_BYTES: usize = 2048;

/// Result information from executing a workflow script.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    /// Exit code of the subprocess (0 on success).
    pub returncode: i32,
    /// Full captured stdout.
    pub stdout: String,
    /// Full captured stderr.
    pub stderr: String,
    /// Wall-clock duration of the run.
    pub duration_seconds: f64,
}

/// Execute a workflow script and wait for completion.
///
/// The working directory is the script's parent so relative resources
/// resolve the same way they do when the script is run by hand. The
/// environment is inherited with `env_overrides` applied on top.
pub async fn run_workflow(
    python_executable: &str,
    script_path: &Path,
    workflow_args: &[String],
    timeout: Duration,
    env_overrides: &[(String, String)],
) -> Result<WorkflowResult, PipelineError> {
    if !script_path.exists() {
        return Err(PipelineError::ScriptNotFound {
            path: script_path.to_path_buf(),
        });
    }

    let script_name = script_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| script_path.display().to_string());

    tracing::debug!(
        python = python_executable,
        script = %script_name,
        args = ?workflow_args,
        "executing workflow"
    );

    let mut command = Command::new(python_executable);
    command
        .arg(script_path)
        .args(workflow_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(parent) = script_path.parent() {
        if !parent.as_os_str().is_empty() {
            command.current_dir(parent);
        }
    }
    for (key, value) in env_overrides {
        command.env(key, value);
    }

    let start = Instant::now();
    let child = command.spawn().map_err(|e| PipelineError::Io { source: e })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| PipelineError::Io { source: e })?,
        Err(_) => {
            // Dropping the in-flight future kills the child via kill_on_drop.
            tracing::error!(
                script = %script_name,
                timeout_secs = timeout.as_secs(),
                "workflow timed out"
            );
            return Err(PipelineError::Timeout {
                script: script_name,
                seconds: timeout.as_secs(),
            });
        }
    };

    let duration = start.elapsed().as_secs_f64();
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let returncode = output.status.code().unwrap_or(-1);

    if !output.status.success() {
        tracing::error!(
            script = %script_name,
            code = returncode,
            stderr_tail = %tail(&stderr, TAIL_BYTES),
            "workflow failed"
        );
        return Err(PipelineError::ScriptFailed {
            script: script_name,
            code: returncode,
            stdout_tail: tail(&stdout, TAIL_BYTES),
            stderr_tail: tail(&stderr, TAIL_BYTES),
        });
    }

    Ok(WorkflowResult {
        returncode,
        stdout,
        stderr,
        duration_seconds: duration,
    })
}

/// The last `max_bytes` of `s`, trimmed to a char boundary.
pub fn tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}
