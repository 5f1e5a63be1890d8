//! Implementation of the default mode: one generation with a built-in
//! test prompt. Useful for smoke-testing a deployment without queueing
//! work.

use poets_core::config::Config;
use poets_core::processor::run_single_generation;
use poets_core::storage;

const TEST_PROMPTS: [&str; 3] = [
    "Write a short poem about the intersection of technology and human emotion",
    "Create a dialogue between two characters discussing the nature of creativity",
    "Write a brief prose piece about a moment of unexpected beauty",
];

/// Execute a single generation session with a canned prompt.
pub async fn execute(config: &Config) -> anyhow::Result<()> {
    let pool = storage::init_db(&config.database.path).await?;

    let prompt = TEST_PROMPTS[chrono::Utc::now().timestamp() as usize % TEST_PROMPTS.len()];
    tracing::info!(prompt, "running single generation");

    let result = run_single_generation(config, &pool, prompt).await;
    pool.close().await;

    let transcript = result?;
    eprintln!("Generation completed: {} transcript message(s)", transcript.len());
    for message in transcript.iter().filter(|m| m.agent_name != "user") {
        let preview: String = message.content.chars().take(120).collect();
        eprintln!("  [{}] {}", message.agent_name, preview);
    }

    Ok(())
}
