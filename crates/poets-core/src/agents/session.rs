//! Session builders: from config roster to a running group chat.
//!
//! Two session shapes exist. Text sessions run the full configured roster
//! with the standard toolset; structured sessions run only the assistant
//! agents under a JSON mandate, with the matching `generate_*_json` tool
//! registered so the chat ends deterministically once the JSON is saved.

use std::sync::Arc;

use super::group_chat::GroupChat;
use super::tools::{
    GenerateImageJsonTool, GenerateLyricsJsonTool, GetStatsTool, PromptContext, QueryDatabaseTool,
    SaveFileTool, SaveToDatabaseTool, WebResearchTool,
};
use super::{Agent, Transcript};
use crate::config::{AgentKind, Config};
use crate::error::SessionError;
use crate::llm::ChatBackend;
use crate::research::WebResearcher;
use crate::storage::prompts::{PromptKind, PromptRow};
use crate::storage::DbPool;

/// Shared dependencies for running sessions.
pub struct SessionContext {
    /// The shared store, used by database tools.
    pub pool: DbPool,
    /// The chat backend driving every agent.
    pub backend: Arc<dyn ChatBackend>,
    /// The web research provider.
    pub researcher: Arc<dyn WebResearcher>,
}

/// Run a free-text generation session for a prompt.
///
/// Agents come from the configured roster; those flagged with
/// `has_file_save_function` carry the standard toolset. The prompt's
/// metadata hints (style, tone, length, collaboration mode) are appended to
/// the opening message.
pub async fn run_text_session(
    ctx: &SessionContext,
    config: &Config,
    prompt: &PromptRow,
) -> Result<Transcript, SessionError> {
    let agents = build_text_agents(ctx, config, prompt);
    if agents.len() < 2 {
        return Err(SessionError::NoAgents {
            message: format!(
                "text sessions need at least 2 agents, found {}",
                agents.len()
            ),
        });
    }

    let enhanced = enhance_prompt(prompt);
    let opening = format!(
        "Create {} content based on this prompt: {enhanced}",
        prompt.prompt_type
    );

    let chat = GroupChat::new(agents, config.processing.max_rounds)?;
    chat.run(ctx.backend.as_ref(), &default_model(config), &opening)
        .await
}

/// Run a structured-JSON generation session for a prompt.
///
/// Only assistant agents participate, each mandated to call the matching
/// `generate_*_json` tool. The tool's return string carries the terminal
/// sentinel, so a successful save ends the chat immediately.
pub async fn run_structured_session(
    ctx: &SessionContext,
    config: &Config,
    prompt: &PromptRow,
    kind: PromptKind,
) -> Result<Transcript, SessionError> {
    let tool_name = match kind {
        PromptKind::ImagePromptJson => "generate_image_json",
        PromptKind::LyricsPromptJson => "generate_lyrics_json",
        _ => {
            return Err(SessionError::NoAgents {
                message: format!("{kind:?} is not a structured prompt kind"),
            })
        }
    };

    let prompt_context = PromptContext {
        id: prompt.id,
        prompt_type: prompt.prompt_type.clone(),
        metadata: prompt.metadata_value(),
    };

    let mut agents = Vec::new();
    for agent_config in &config.agents {
        if agent_config.kind != AgentKind::AssistantAgent {
            continue;
        }

        let system_message = format!(
            "{}\n\n{}",
            agent_config.system_message,
            json_mandate(kind, tool_name)
        );
        let model = agent_config
            .config_assignment
            .as_deref()
            .and_then(|a| config.models.resolve(a))
            .map(str::to_string);

        let mut agent = Agent::new(agent_config.name.clone(), system_message, model);
        match kind {
            PromptKind::ImagePromptJson => agent.register_tool(Arc::new(
                GenerateImageJsonTool::new(ctx.pool.clone(), prompt_context.clone()),
            )),
            PromptKind::LyricsPromptJson => agent.register_tool(Arc::new(
                GenerateLyricsJsonTool::new(ctx.pool.clone(), prompt_context.clone()),
            )),
            _ => unreachable!("checked above"),
        }
        agent.register_tool(Arc::new(WebResearchTool::new(ctx.researcher.clone())));
        agents.push(agent);
    }

    if agents.is_empty() {
        return Err(SessionError::NoAgents {
            message: "no assistant agents configured for structured generation".to_string(),
        });
    }

    let opening = format!(
        "Create a structured {} based on: {}. You must save the final result \
         by calling the {tool_name} tool.",
        prompt.prompt_type, prompt.prompt_text
    );

    let chat = GroupChat::new(agents, config.processing.max_rounds)?;
    chat.run(ctx.backend.as_ref(), &default_model(config), &opening)
        .await
}

fn build_text_agents(ctx: &SessionContext, config: &Config, prompt: &PromptRow) -> Vec<Agent> {
    let prompt_context = PromptContext {
        id: prompt.id,
        prompt_type: prompt.prompt_type.clone(),
        metadata: prompt.metadata_value(),
    };
    let metadata = prompt.metadata_value();

    let mut agents = Vec::new();
    for agent_config in &config.agents {
        let mut system_message = agent_config.system_message.clone();

        match agent_config.kind {
            AgentKind::UserProxyAgent => {
                system_message.push_str(&format!(
                    " Focus on {} content generation.",
                    prompt.prompt_type
                ));
            }
            AgentKind::AssistantAgent => {
                let style = metadata["style"].as_str();
                let tone = metadata["tone"].as_str();
                if style.is_some() || tone.is_some() {
                    system_message.push_str(&format!(" Create {} content", prompt.prompt_type));
                    if let Some(style) = style {
                        system_message.push_str(&format!(" in {style} style"));
                    }
                    if let Some(tone) = tone {
                        system_message.push_str(&format!(" with a {tone} tone"));
                    }
                    system_message.push('.');
                }
            }
        }
        system_message
            .push_str(" You have access to web_research() for researching current information.");

        let model = agent_config
            .config_assignment
            .as_deref()
            .and_then(|a| config.models.resolve(a))
            .map(str::to_string);

        let mut agent = Agent::new(agent_config.name.clone(), system_message, model);
        if agent_config.has_file_save_function {
            agent.register_tool(Arc::new(SaveFileTool::new(
                config.config_dir.join(&config.processing.output_directory),
            )));
            agent.register_tool(Arc::new(SaveToDatabaseTool::new(
                ctx.pool.clone(),
                prompt_context.clone(),
            )));
            agent.register_tool(Arc::new(QueryDatabaseTool::new(ctx.pool.clone())));
            agent.register_tool(Arc::new(GetStatsTool::new(ctx.pool.clone())));
        }
        agent.register_tool(Arc::new(WebResearchTool::new(ctx.researcher.clone())));

        agents.push(agent);
    }

    agents
}

/// Append style/tone/length/mode hints from the metadata blob.
fn enhance_prompt(prompt: &PromptRow) -> String {
    let metadata = prompt.metadata_value();
    let mut hints = Vec::new();

    if let Some(style) = metadata["style"].as_str() {
        hints.push(format!("Style: {style}"));
    }
    if let Some(tone) = metadata["tone"].as_str() {
        hints.push(format!("Tone: {tone}"));
    }
    if let Some(length) = metadata["length"].as_str() {
        hints.push(format!("Length: {length}"));
    }
    if let Some(mode) = metadata["collaboration_mode"].as_str() {
        if mode != "standard" {
            hints.push(format!("Mode: {mode}"));
        }
    }

    if hints.is_empty() {
        prompt.prompt_text.clone()
    } else {
        format!("{} ({})", prompt.prompt_text, hints.join(", "))
    }
}

fn json_mandate(kind: PromptKind, tool_name: &str) -> String {
    let schema_description = match kind {
        PromptKind::ImagePromptJson => {
            "a vivid, detailed image prompt: the main description, things to \
             avoid, style tags, aspect ratio, quality, mood, and composition \
             (subject, background, lighting)"
        }
        _ => {
            "complete song lyrics: title, genre, mood, tempo, an ordered \
             structure of verses and choruses with full lyrics, and musical \
             metadata (key, time signature, vocal style, instrumentation)"
        }
    };

    format!(
        "You must produce {schema_description}. When the content is ready, \
         you MUST call the {tool_name} tool exactly once with the final \
         values. Do not output the JSON as plain text."
    )
}

fn default_model(config: &Config) -> String {
    config
        .models
        .resolve(&config.group_chat_manager.config_assignment)
        .map(str::to_string)
        .or_else(|| {
            config
                .models
                .all()
                .into_iter()
                .find(|m| !m.is_empty())
        })
        .unwrap_or_else(|| "local-model".to_string())
}
