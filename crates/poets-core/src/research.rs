//! Web research provider.
//!
//! Agents reach the web through the [`WebResearcher`] seam: a function from
//! a query to a `(status, content)` pair. The production implementation is
//! the Tavily search API, keyed by `TVLY_API_KEY`.

use serde::Deserialize;

use crate::error::ResearchError;

/// Search modes supported by the provider.
pub const SEARCH_TYPES: [&str; 3] = ["web_search", "qna_search", "context_search"];

/// A provider of current-events research for creative sessions.
#[async_trait::async_trait]
pub trait WebResearcher: Send + Sync {
    /// Run a search and return `(status_message, content)`.
    async fn research(
        &self,
        query: &str,
        search_type: &str,
        search_depth: &str,
        max_results: u32,
    ) -> Result<(String, String), ResearchError>;
}

/// Tavily search API client.
pub struct TavilyClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TavilyClient {
    /// Build a client from `TVLY_API_KEY`.
    pub fn from_env() -> Result<Self, ResearchError> {
        let api_key = std::env::var("TVLY_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(ResearchError::MissingApiKey)?;
        Ok(Self::new("https://api.tavily.com".to_string(), api_key))
    }

    /// Build a client against an explicit base URL (used by tests).
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait::async_trait]
impl WebResearcher for TavilyClient {
    async fn research(
        &self,
        query: &str,
        search_type: &str,
        search_depth: &str,
        max_results: u32,
    ) -> Result<(String, String), ResearchError> {
        let include_answer = search_type == "qna_search";
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": search_depth,
            "max_results": max_results.clamp(1, 10),
            "include_answer": include_answer,
        });

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ResearchError::Api { status, message });
        }

        let parsed: TavilyResponse = response.json().await?;

        let content = match search_type {
            // Direct answer when available, sources otherwise.
            "qna_search" => parsed
                .answer
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| format_results(&parsed.results)),
            // Raw source text for background context.
            "context_search" => parsed
                .results
                .iter()
                .map(|r| r.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            _ => format_results(&parsed.results),
        };

        let status = format!(
            "research ok: {} result(s) for '{query}'",
            parsed.results.len()
        );
        Ok((status, content))
    }
}

/// Placeholder used when no API key is configured. Every request fails
/// with [`ResearchError::MissingApiKey`]; the research tool surfaces that
/// to the agents as an error string, so sessions still run.
pub struct UnconfiguredResearcher;

#[async_trait::async_trait]
impl WebResearcher for UnconfiguredResearcher {
    async fn research(
        &self,
        _query: &str,
        _search_type: &str,
        _search_depth: &str,
        _max_results: u32,
    ) -> Result<(String, String), ResearchError> {
        Err(ResearchError::MissingApiKey)
    }
}

fn format_results(results: &[TavilyResult]) -> String {
    results
        .iter()
        .map(|r| format!("{}\n{}\n{}", r.title, r.url, r.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
