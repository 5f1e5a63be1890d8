//! Round-robin group chat over a [`ChatBackend`].
//!
//! Agents take turns in roster order. Each turn the current agent sees the
//! whole conversation (its own past messages as `assistant`, everyone
//! else's as named `user` messages) and may request tool calls, which are
//! executed inline before the agent continues. The chat ends when any
//! message or tool result contains the `TERMINATE` sentinel, or when the
//! round cap is reached.

use super::{Agent, Transcript, TranscriptMessage};
use crate::error::SessionError;
use crate::llm::{ChatBackend, ChatMessage, ChatTurn};

/// The terminal sentinel. `generate_*_json` tools append this literal to
/// their return string; this is a contract with the chat loop and must not
/// change.
pub const TERMINATE: &str = "TERMINATE";

/// Upper bound on tool-call iterations within a single agent turn.
const MAX_TOOL_ITERATIONS: usize = 4;

/// An ordered roster of agents with a bounded round count.
#[derive(Debug)]
pub struct GroupChat {
    agents: Vec<Agent>,
    max_rounds: u32,
}

impl GroupChat {
    /// Create a group chat. The roster must not be empty.
    pub fn new(agents: Vec<Agent>, max_rounds: u32) -> Result<Self, SessionError> {
        if agents.is_empty() {
            return Err(SessionError::NoAgents {
                message: "group chat requires at least one agent".to_string(),
            });
        }
        Ok(Self { agents, max_rounds })
    }

    /// Drive the chat to completion and return the transcript.
    ///
    /// The opening message is attributed to `user` in the transcript.
    pub async fn run(
        &self,
        backend: &dyn ChatBackend,
        default_model: &str,
        opening_message: &str,
    ) -> Result<Transcript, SessionError> {
        let mut transcript: Transcript = vec![TranscriptMessage {
            agent_name: "user".to_string(),
            content: opening_message.to_string(),
        }];

        'rounds: for round in 0..self.max_rounds {
            let agent = &self.agents[(round as usize) % self.agents.len()];
            let model = agent.model.as_deref().unwrap_or(default_model);
            let specs = agent.tool_specs();

            let mut messages = wire_messages(agent, &transcript);
            let mut turn = backend.chat(model, &messages, &specs).await?;

            for _ in 0..MAX_TOOL_ITERATIONS {
                if turn.tool_calls.is_empty() {
                    break;
                }

                let calls = std::mem::take(&mut turn.tool_calls);
                let mut assistant = ChatMessage::new(
                    "assistant",
                    turn.content.clone().unwrap_or_default(),
                );
                assistant.tool_calls = calls.clone();
                messages.push(assistant);

                let mut terminated = false;
                for call in &calls {
                    let result = self.execute_tool(agent, &call.name, &call.arguments).await;
                    tracing::debug!(
                        agent = %agent.name,
                        tool = %call.name,
                        chars = result.len(),
                        "tool call executed"
                    );
                    if result.contains(TERMINATE) {
                        terminated = true;
                    }
                    transcript.push(TranscriptMessage {
                        agent_name: agent.name.clone(),
                        content: result.clone(),
                    });
                    messages.push(ChatMessage::tool_result(call.id.clone(), result));
                }

                if terminated {
                    tracing::debug!(agent = %agent.name, "chat terminated by tool result");
                    break 'rounds;
                }

                turn = backend.chat(model, &messages, &specs).await?;
            }

            if let Some(content) = turn.content.filter(|c| !c.trim().is_empty()) {
                let done = content.contains(TERMINATE);
                transcript.push(TranscriptMessage {
                    agent_name: agent.name.clone(),
                    content,
                });
                if done {
                    tracing::debug!(agent = %agent.name, "chat terminated by sentinel");
                    break;
                }
            }
        }

        Ok(transcript)
    }

    async fn execute_tool(&self, agent: &Agent, name: &str, arguments: &str) -> String {
        let Some(tool) = agent.tool(name) else {
            return format!("Error: unknown tool '{name}'");
        };

        let args: serde_json::Value = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(arguments) {
                Ok(value) => value,
                Err(e) => return format!("Error: tool '{name}' received invalid arguments: {e}"),
            }
        };

        match tool.invoke(args).await {
            Ok(result) => result,
            // The error is surfaced to the model so the chat can recover.
            Err(e) => format!("Error: {e}"),
        }
    }
}

/// Project the conversation into the current agent's point of view.
fn wire_messages(agent: &Agent, transcript: &Transcript) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::new("system", agent.system_message.clone())];
    for entry in transcript {
        if entry.agent_name == agent.name {
            messages.push(ChatMessage::new("assistant", entry.content.clone()));
        } else {
            messages.push(ChatMessage::named(
                "user",
                entry.agent_name.clone(),
                entry.content.clone(),
            ));
        }
    }
    messages
}
