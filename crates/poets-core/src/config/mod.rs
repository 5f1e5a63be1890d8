//! Configuration loading and validation.
//!
//! Configuration is a single JSON document. Every section is optional except
//! `database`; absent sections fall back to the serde defaults declared in
//! [`types`]. The config directory anchors all relative paths (lock file,
//! media scripts, media output root, log file).

pub mod types;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use types::{
    AgentConfig, AgentKind, BackendConfig, BackendType, ComfyUiConfig, DatabaseConfig,
    EnvironmentConfig, GroupChatManagerConfig, LoggingConfig, MediaConfig, MediaScripts,
    ModelsConfig, ProcessingConfig, ServiceInfo,
};

/// File name of the single-instance lock, created next to the config file.
pub const LOCK_FILE_NAME: &str = "poets_generation.lock";

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Service metadata.
    #[serde(default)]
    pub service_info: ServiceInfo,

    /// Logging sink and level.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Shared SQLite store.
    pub database: DatabaseConfig,

    /// LLM backend selection.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Model slot assignments.
    #[serde(default)]
    pub models: ModelsConfig,

    /// Agent roster for group-chat sessions.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    /// Group-chat manager settings.
    #[serde(default)]
    pub group_chat_manager: GroupChatManagerConfig,

    /// Generation-session tuning.
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Required environment variables.
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Media pipeline configuration.
    #[serde(default)]
    pub media: MediaConfig,

    /// Directory containing the config file. Not part of the document;
    /// populated by [`Config::load`].
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let file_path = Path::new(path);
        if !file_path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string(),
            });
        }

        let raw = std::fs::read_to_string(file_path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            source: e,
        })?;

        let mut config: Config =
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError { source: e })?;

        config.config_dir = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        config.validate()?;
        Ok(config)
    }

    /// Structural checks that do not touch the network or filesystem.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "database.path".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.backend.backend_type == BackendType::Manual
            && self
                .backend
                .manual_url
                .as_deref()
                .map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "backend.manual_url".to_string(),
                message: "required when backend.type is 'manual'".to_string(),
            });
        }

        if self.processing.max_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "processing.max_rounds".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Path of the single-instance lock file, next to the config file.
    pub fn lock_path(&self) -> PathBuf {
        self.config_dir.join(LOCK_FILE_NAME)
    }

    /// Absolute root of the generated-media tree.
    pub fn media_output_root(&self) -> PathBuf {
        self.config_dir.join(&self.media.comfyui.output_directory)
    }

    /// Resolve the LLM base URL for the configured backend.
    ///
    /// `lms` reads `NGROKURL`, `oll` reads `WIFI_LLM_URL`, and `manual`
    /// uses `backend.manual_url` directly.
    pub fn resolve_base_url(&self) -> Result<String, ConfigError> {
        let url = match self.backend.backend_type {
            BackendType::Lms => std::env::var("NGROKURL").ok(),
            BackendType::Oll => std::env::var("WIFI_LLM_URL").ok(),
            BackendType::Manual => self.backend.manual_url.clone(),
        };

        url.filter(|u| !u.trim().is_empty())
            .map(|u| u.trim_end_matches('/').to_string())
            .ok_or_else(|| ConfigError::NoBackendUrl {
                backend: self.backend.backend_type.as_str().to_string(),
            })
    }

    /// Verify that every required environment variable is set.
    ///
    /// `TVLY_API_KEY` is always required because agents carry the web
    /// research tool.
    pub fn check_environment(&self) -> Result<(), ConfigError> {
        let mut required: Vec<String> = self.environment.required_vars.clone();
        if !required.iter().any(|v| v == "TVLY_API_KEY") {
            required.push("TVLY_API_KEY".to_string());
        }

        let missing: Vec<String> = required
            .into_iter()
            .filter(|var| std::env::var(var).map_or(true, |v| v.is_empty()))
            .collect();

        if missing.is_empty() {
            tracing::info!("environment check passed");
            Ok(())
        } else {
            Err(ConfigError::MissingEnv { vars: missing })
        }
    }

    /// The API key forwarded to the LLM client; `"dummy-key"` when unset.
    pub fn llm_api_key(&self) -> String {
        std::env::var("DEEPSEEK_API_KEY").unwrap_or_else(|_| "dummy-key".to_string())
    }
}
