/// Poets orchestrator CLI.
///
/// Entry point for the poets-orchestrator binary. Parses CLI arguments,
/// initializes logging, and dispatches to the command handlers. Designed
/// for invocation from an external scheduler (cron, systemd timer,
/// LaunchAgent).
mod commands;

use std::process::ExitCode;

use clap::Parser;
use poets_core::config::Config;
use tracing_subscriber::EnvFilter;

/// Multi-stage creative-content pipeline orchestrator
#[derive(Parser)]
#[command(name = "poets-orchestrator")]
#[command(version)]
#[command(about = "Multi-stage creative-content pipeline orchestrator")]
#[command(after_help = "\
Modes:
  poets-orchestrator                 — run one generation with a built-in test prompt
  poets-orchestrator --test          — validate configuration and exit
  poets-orchestrator --queue         — perform a full queue tick (the main entry point)")]
struct Cli {
    /// Configuration file path
    #[arg(default_value = "poets_cron_config.json")]
    config_file: String,

    /// Validate configuration and exit (0 ok, 1 fail)
    #[arg(long)]
    test: bool,

    /// Process the prompt queue (for scheduler integration)
    #[arg(long, conflicts_with = "test")]
    queue: bool,

    /// Enable verbose logging (debug level)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if !std::path::Path::new(&cli.config_file).exists() {
        eprintln!("ERROR: Configuration file not found: {}", cli.config_file);
        return ExitCode::from(1);
    }

    let config = match Config::load(&cli.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: Failed to load configuration: {e}");
            return ExitCode::from(1);
        }
    };

    // Initialize tracing.
    //
    // Priority: RUST_LOG env var > --verbose/--quiet flags > config level.
    // When logging.file is configured the log goes to that file; otherwise
    // to stderr.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("poets_core=debug,poets_cli=debug,info")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new(config.logging.level.to_lowercase())
    };

    let _appender_guard = match log_file_writer(&config) {
        Some((writer, guard)) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .compact()
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(cli.verbose)
                .compact()
                .init();
            None
        }
    };

    tracing::info!(
        service = %config.service_info.name,
        version = %config.service_info.version,
        "starting"
    );

    let result = if cli.test {
        commands::test::execute(&config).await
    } else if cli.queue {
        commands::queue::execute(&config).await
    } else {
        commands::run::execute(&config).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("ERROR: {e:#}");
            ExitCode::from(1)
        }
    }
}


/// Build the non-blocking file writer for `logging.file`, creating parent
/// directories. Returns `None` when no file is configured or it cannot be
/// created (stderr logging is the fallback).
fn log_file_writer(
    config: &Config,
) -> Option<(
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
)> {
    let file = config.logging.file.as_deref()?;
    let full_path = config.config_dir.join(file);
    let dir = full_path.parent()?.to_path_buf();
    let name = full_path.file_name()?.to_os_string();

    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("WARNING: could not create log directory {}: {e}", dir.display());
        return None;
    }

    let appender = tracing_appender::rolling::never(dir, name);
    Some(tracing_appender::non_blocking(appender))
}
