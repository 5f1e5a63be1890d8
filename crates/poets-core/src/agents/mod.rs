//! Agent and tool abstractions for group-chat sessions.
//!
//! The LLM framework is consumed through a small surface: an [`Agent`] is a
//! named system message plus registered [`Tool`]s, and a
//! [`group_chat::GroupChat`] drives agents against a
//! [`crate::llm::ChatBackend`] until a terminal sentinel or a round cap.

pub mod group_chat;
pub mod session;
pub mod tools;

use std::sync::Arc;

use crate::error::SessionError;
use crate::llm::ToolSpec;

/// One entry of a session transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    /// Who produced the content: an agent name, or `user` for the opening
    /// turn.
    pub agent_name: String,
    /// Message body.
    pub content: String,
}

/// An ordered conversation record returned to the caller.
pub type Transcript = Vec<TranscriptMessage>;

/// A capability agents can invoke, described by a JSON schema.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the model.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn schema(&self) -> serde_json::Value;

    /// Invoke the tool with parsed arguments, returning its result string.
    async fn invoke(&self, args: serde_json::Value) -> Result<String, SessionError>;
}

/// A chat participant: a name, a system message, an optional model
/// assignment, and the tools it may call.
pub struct Agent {
    /// Display name used in transcripts and speaker attribution.
    pub name: String,
    /// Full system message for this agent's turns.
    pub system_message: String,
    /// Model driving this agent; the group chat's default when `None`.
    pub model: Option<String>,
    tools: Vec<Arc<dyn Tool>>,
}

impl Agent {
    /// Create an agent with no tools.
    pub fn new(
        name: impl Into<String>,
        system_message: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            system_message: system_message.into(),
            model,
            tools: Vec::new(),
        }
    }

    /// Register a tool under its own name.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Look up a registered tool by name.
    pub fn tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Wire-format specs for every registered tool.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
