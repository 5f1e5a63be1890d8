//! Configuration section structs and their serde default functions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Service info
// ---------------------------------------------------------------------------

/// Descriptive metadata logged at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceInfo {
    /// Human-readable service name.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Service version string.
    #[serde(default = "default_service_version")]
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_service_version(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging sink and level.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log file path, relative to the config directory. `None` logs to
    /// stderr only.
    #[serde(default)]
    pub file: Option<String>,

    /// Log level name (`ERROR`, `WARN`, `INFO`, `DEBUG`, `TRACE`).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Shared SQLite store location.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file shared with the reader service.
    pub path: String,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Which LLM endpoint family to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// LM Studio exposed through an ngrok tunnel (`NGROKURL`).
    Lms,
    /// Ollama on the local network (`WIFI_LLM_URL`).
    Oll,
    /// Explicit URL from `backend.manual_url`.
    Manual,
}

impl BackendType {
    /// Returns the lowercase tag used in config files and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Lms => "lms",
            BackendType::Oll => "oll",
            BackendType::Manual => "manual",
        }
    }
}

/// LLM backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend family.
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: BackendType,

    /// Base URL used when `backend_type` is `manual`.
    #[serde(default)]
    pub manual_url: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_type: default_backend_type(),
            manual_url: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// The three local model slots agents can be assigned to.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelsConfig {
    /// Model served for the `local1` assignment.
    #[serde(default)]
    pub local1: String,

    /// Model served for the `local2` assignment.
    #[serde(default)]
    pub local2: String,

    /// Model served for the `local3` assignment.
    #[serde(default)]
    pub local3: String,
}

impl ModelsConfig {
    /// Resolve a `config_assignment` tag to a model name.
    pub fn resolve(&self, assignment: &str) -> Option<&str> {
        match assignment {
            "local1" if !self.local1.is_empty() => Some(&self.local1),
            "local2" if !self.local2.is_empty() => Some(&self.local2),
            "local3" if !self.local3.is_empty() => Some(&self.local3),
            _ => None,
        }
    }

    /// All configured model names, in slot order.
    pub fn all(&self) -> Vec<String> {
        vec![self.local1.clone(), self.local2.clone(), self.local3.clone()]
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// The role an agent plays in the group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum AgentKind {
    /// An LLM-backed creative agent.
    AssistantAgent,
    /// The coordinating proxy that executes tools and relays prompts.
    UserProxyAgent,
}

/// One agent definition from the `agents` array.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Display name used in transcripts.
    pub name: String,

    /// Agent role.
    #[serde(rename = "type")]
    pub kind: AgentKind,

    /// Base system message.
    pub system_message: String,

    /// Which model slot drives this agent (assistants only).
    #[serde(default)]
    pub config_assignment: Option<String>,

    /// Whether the standard file/database toolset is registered on this agent.
    #[serde(default)]
    pub has_file_save_function: bool,
}

/// Group-chat manager settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupChatManagerConfig {
    /// Model slot used for speaker selection.
    #[serde(default = "default_manager_assignment")]
    pub config_assignment: String,
}

impl Default for GroupChatManagerConfig {
    fn default() -> Self {
        Self {
            config_assignment: default_manager_assignment(),
        }
    }
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

/// Generation-session tuning knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// Directory agents may write loose text files into.
    #[serde(default = "default_output_directory")]
    pub output_directory: String,

    /// Maximum group-chat rounds before a session is cut off.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Upper bound on how long one prompt is expected to take. Also widens
    /// the window the harvester searches for tool-saved writings.
    #[serde(default = "default_max_processing_minutes")]
    pub max_processing_time_minutes: u64,

    /// Whether to hit the `/models` endpoint before processing text prompts.
    #[serde(default = "default_true")]
    pub validate_models_on_startup: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            max_rounds: default_max_rounds(),
            max_processing_time_minutes: default_max_processing_minutes(),
            validate_models_on_startup: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Environment variables that must be present before text generation runs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    /// Names of required variables. `TVLY_API_KEY` is always appended.
    #[serde(default)]
    pub required_vars: Vec<String>,
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// ComfyUI host and workflow invocation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComfyUiConfig {
    /// Base URL of the ComfyUI server, used only for health probes.
    /// `None` skips the probe and assumes the workflow scripts are
    /// self-contained.
    #[serde(default)]
    pub host: Option<String>,

    /// Python interpreter used to run workflow scripts.
    #[serde(default = "default_python")]
    pub python: String,

    /// `--queue-size` passed to every workflow.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Wall-clock budget for one workflow run, in seconds.
    #[serde(default = "default_media_timeout")]
    pub timeout_seconds: u64,

    /// Optional `--comfyui-directory` passed to workflows.
    #[serde(default)]
    pub comfyui_directory: Option<String>,

    /// Root of the generated-media tree, relative to the config directory.
    #[serde(default = "default_media_output_directory")]
    pub output_directory: String,
}

impl Default for ComfyUiConfig {
    fn default() -> Self {
        Self {
            host: None,
            python: default_python(),
            queue_size: default_queue_size(),
            timeout_seconds: default_media_timeout(),
            comfyui_directory: None,
            output_directory: default_media_output_directory(),
        }
    }
}

/// Exported workflow script paths, relative to the config directory.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MediaScripts {
    /// Image workflow script.
    #[serde(default)]
    pub image: Option<String>,

    /// Audio workflow script (legacy key).
    #[serde(default)]
    pub music: Option<String>,

    /// Audio workflow script.
    #[serde(default)]
    pub audio: Option<String>,
}

/// Media subsystem configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MediaConfig {
    /// Master switch for the media pass.
    #[serde(default)]
    pub enabled: bool,

    /// ComfyUI invocation settings.
    #[serde(default)]
    pub comfyui: ComfyUiConfig,

    /// Workflow script locations.
    #[serde(default)]
    pub scripts: MediaScripts,

    /// Extra arguments appended per script key.
    #[serde(default)]
    pub script_args: HashMap<String, Vec<String>>,

    /// Overrides for the prompt-type → pipeline mapping.
    #[serde(default)]
    pub prompt_type_map: HashMap<String, String>,
}

impl MediaConfig {
    /// The effective prompt-type → pipeline-key map: built-in defaults
    /// overlaid with any configured entries (keys lowercased).
    pub fn effective_prompt_type_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::from([
            ("image".to_string(), "image".to_string()),
            ("music".to_string(), "audio".to_string()),
            ("audio".to_string(), "audio".to_string()),
            ("voice".to_string(), "audio".to_string()),
        ]);
        for (key, value) in &self.prompt_type_map {
            map.insert(key.to_lowercase(), value.clone());
        }
        map
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_service_name() -> String {
    "Poets Generator Service".to_string()
}

fn default_service_version() -> String {
    "3.1".to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_backend_type() -> BackendType {
    BackendType::Oll
}

fn default_manager_assignment() -> String {
    "local3".to_string()
}

fn default_output_directory() -> String {
    "generated".to_string()
}

fn default_max_rounds() -> u32 {
    20
}

fn default_max_processing_minutes() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_queue_size() -> u32 {
    1
}

fn default_media_timeout() -> u64 {
    600
}

fn default_media_output_directory() -> String {
    "GeneratedMedia".to_string()
}
