//! LLM chat-completions abstraction.
//!
//! The orchestrator consumes whatever OpenAI-compatible endpoint the
//! configured backend resolves to. The [`ChatBackend`] trait is the seam the
//! agent layer talks through, so sessions can be driven by a mock in tests.

pub mod openai_compat;

use crate::error::LlmError;

pub use openai_compat::OpenAiCompatClient;

/// One message in a chat-completions request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// `system`, `user`, `assistant`, or `tool`.
    pub role: String,
    /// Message body.
    pub content: String,
    /// Speaker name, for multi-agent conversations.
    pub name: Option<String>,
    /// Links a `tool` role message to the call it answers.
    pub tool_call_id: Option<String>,
    /// Tool calls carried by an `assistant` message.
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    /// A plain message with no name or tool linkage.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    /// A named message (used to attribute other agents' turns).
    pub fn named(role: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(role, content)
        }
    }

    /// A `tool` role message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new("tool", content)
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// A tool made available to the model, described by a JSON schema.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// What the tool does, shown to the model.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// The model's reply for one completion turn.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    /// Assistant text, if any.
    pub content: Option<String>,
    /// Requested tool invocations, if any.
    pub tool_calls: Vec<ToolCall>,
}

/// One chat-completion turn against a model.
///
/// Implementations must be cheap to share; the group chat calls this once
/// per agent round.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Request a completion for `messages`, offering `tools`.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatTurn, LlmError>;
}
