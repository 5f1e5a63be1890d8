//! Error types for the poets-core library.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors.

use std::path::PathBuf;

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The path that was being read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// JSON deserialization failed.
    #[error("failed to parse config file: {source}")]
    ParseError {
        /// The underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// Required environment variables are not set.
    #[error("missing required environment variables: {}", vars.join(", "))]
    MissingEnv {
        /// The names of the missing variables.
        vars: Vec<String>,
    },

    /// No base URL could be resolved for the configured backend.
    #[error("no base URL available for backend type '{backend}'")]
    NoBackendUrl {
        /// The backend type that failed to resolve.
        backend: String,
    },
}

/// Errors from SQLite storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to the SQLite database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Schema migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },
}

impl StorageError {
    /// Returns `true` if this error is SQLite lock contention, which the
    /// retry wrapper in `storage` treats as transient.
    pub fn is_locked(&self) -> bool {
        let source = match self {
            StorageError::Connection { source }
            | StorageError::Migration { source }
            | StorageError::Query { source } => source,
        };
        source.to_string().to_lowercase().contains("locked")
    }
}

/// Errors from the single-instance process lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another orchestrator instance holds the lock.
    #[error("process lock is held by another instance: {}", path.display())]
    Busy {
        /// Path of the contended lock file.
        path: PathBuf,
    },

    /// The lock file could not be created, written, or removed.
    #[error("process lock I/O error at {}: {source}", path.display())]
    Io {
        /// Path of the lock file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors from talking to the LLM chat-completions endpoint.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP request to the LLM endpoint failed.
    #[error("LLM HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// LLM API returned an error response.
    #[error("LLM API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// LLM response could not be parsed.
    #[error("failed to parse LLM response: {0}")]
    Parse(String),
}

/// Errors from LLM and media host health probes.
#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    /// The endpoint could not be reached.
    #[error("endpoint unreachable: {url}: {source}")]
    Unreachable {
        /// The URL that was probed.
        url: String,
        /// The underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success status.
    #[error("endpoint {url} returned HTTP {status}")]
    BadStatus {
        /// The URL that was probed.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The model list is missing required entries.
    #[error("missing models: {}", models.join(", "))]
    MissingModels {
        /// The model names that were not found.
        models: Vec<String>,
    },
}

/// Errors from the web research provider.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    /// The `TVLY_API_KEY` environment variable is not set.
    #[error("TVLY_API_KEY is not set; web research is unavailable")]
    MissingApiKey,

    /// HTTP request to the search API failed.
    #[error("research request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The search API returned an error response.
    #[error("research API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },
}

/// Errors from running an agent group-chat session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The configuration defines no usable agents for this session kind.
    #[error("no agents available for session: {message}")]
    NoAgents {
        /// Details about why no agents qualified.
        message: String,
    },

    /// A registered tool failed while being invoked.
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed {
        /// Name of the failing tool.
        tool: String,
        /// A description of the failure.
        message: String,
    },

    /// Tool-call arguments did not match the tool's schema.
    #[error("invalid arguments for tool '{tool}': {message}")]
    InvalidArguments {
        /// Name of the tool.
        tool: String,
        /// A description of the mismatch.
        message: String,
    },

    /// An LLM call failed during the session.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// A storage operation performed by a tool failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from extracting structured JSON out of an agent transcript.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// No valid JSON payload was found in the transcript or the store.
    #[error("JSON extraction failed for prompt #{prompt_id}: no valid {expected} payload found")]
    NoJson {
        /// The prompt being harvested.
        prompt_id: i64,
        /// The expected prompt type.
        expected: String,
    },

    /// A storage operation failed during harvest.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the media pipeline and its workflow runner.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The workflow script does not exist on disk.
    #[error("workflow script not found: {}", path.display())]
    ScriptNotFound {
        /// The missing script path.
        path: PathBuf,
    },

    /// The workflow subprocess exited with a non-zero status.
    #[error("workflow {script} failed with code {code}")]
    ScriptFailed {
        /// File name of the workflow script.
        script: String,
        /// The exit code (-1 when terminated by a signal).
        code: i32,
        /// Last 2 KiB of captured stdout.
        stdout_tail: String,
        /// Last 2 KiB of captured stderr.
        stderr_tail: String,
    },

    /// The workflow subprocess exceeded its wall-clock budget.
    #[error("workflow {script} timed out after {seconds}s")]
    Timeout {
        /// File name of the workflow script.
        script: String,
        /// The configured timeout in seconds.
        seconds: u64,
    },

    /// The workflow exited successfully but produced no new files.
    #[error("No artifacts were produced for prompt {prompt_id} using script {script}")]
    NoArtifacts {
        /// The prompt being processed.
        prompt_id: i64,
        /// File name of the workflow script.
        script: String,
    },

    /// Filesystem or spawn failure around the subprocess.
    #[error("media pipeline I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort an entire queue-processor tick.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Configuration or environment validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A non-retryable storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The process lock could not be acquired or released.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// A single-shot generation session failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}
