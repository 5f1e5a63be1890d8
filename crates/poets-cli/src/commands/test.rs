//! Implementation of `poets-orchestrator --test`.
//!
//! Validates the configuration without processing anything: environment
//! variables, backend URL resolution, model availability (when enabled),
//! database presence, and media script/host reachability. Media problems
//! are warnings — media prompts are deferred at runtime, not fatal.

use poets_core::config::Config;
use poets_core::health;

/// Validate configuration and connectivity. Errors make the process exit 1.
pub async fn execute(config: &Config) -> anyhow::Result<()> {
    tracing::info!("testing service configuration");

    config.check_environment()?;

    let base_url = config.resolve_base_url()?;
    tracing::info!(
        backend = config.backend.backend_type.as_str(),
        base_url = %base_url,
        "backend resolved"
    );

    if config.processing.validate_models_on_startup {
        health::validate_models(&base_url, &config.models.all()).await?;
    }

    let db_path = std::path::Path::new(&config.database.path);
    if !db_path.exists() {
        anyhow::bail!("database not found at: {}", config.database.path);
    }

    if config.media.enabled {
        check_media(config).await;
    }

    tracing::info!("configuration test passed");
    eprintln!("Configuration test passed");
    Ok(())
}

/// Media checks never fail the test; unreachable hosts or missing scripts
/// only defer media prompts at runtime.
async fn check_media(config: &Config) {
    let scripts = [
        ("image", config.media.scripts.image.as_ref()),
        ("music", config.media.scripts.music.as_ref()),
        ("audio", config.media.scripts.audio.as_ref()),
    ];

    let mut any_script = false;
    for (key, script) in scripts {
        if let Some(script) = script {
            let path = config.config_dir.join(script);
            if path.exists() {
                any_script = true;
            } else {
                tracing::warn!(key, script = %path.display(), "media script not found");
            }
        }
    }

    if !any_script {
        tracing::warn!("media is enabled but no workflow scripts are available");
        return;
    }

    if health::check_media_host(config.media.comfyui.host.as_deref()).await {
        tracing::info!("media host reachable");
    } else {
        tracing::warn!(
            "media host is unreachable; media prompts will be deferred until connectivity returns"
        );
    }
}
