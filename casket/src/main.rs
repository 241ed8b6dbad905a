// casket/src/main.rs
use std::env;
use std::fs;
use std::process;

use casket_common::cache::Cache;
use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use clap::Parser;
use colored::Colorize;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::CliArgs;

const LOG_ENV_VAR: &str = "CASKET_LOG";
const NO_AUTO_UPDATE_VAR: &str = "HOMEBREW_NO_AUTO_UPDATE";

fn init_logging(config: &Config, verbose: u8) {
    let level_filter = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let log_dir = config.logs_dir();
    if verbose > 0 {
        if let Err(e) = fs::create_dir_all(&log_dir) {
            eprintln!(
                "{} Failed to create log directory {}: {}",
                "Error:".red().bold(),
                log_dir.display(),
                e
            );
        } else {
            let file_appender = tracing_appender::rolling::daily(&log_dir, "casket.log");
            let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
            let stderr_writer = std::io::stderr.with_max_level(max_log_level);
            let file_writer = non_blocking_appender.with_max_level(max_log_level);

            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(stderr_writer.and(file_writer))
                .with_ansi(true)
                .without_time()
                .try_init();

            // The guard flushes the file writer; it has to outlive every log call.
            Box::leak(Box::new(guard));
            debug!(
                "Verbose logging enabled. Writing logs to: {}/casket.log",
                log_dir.display()
            );
            return;
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .without_time()
        .try_init();
}

/// Refreshes stale definition listings before commands that read them.
async fn check_and_run_auto_update(config: &Config) -> Result<()> {
    if env::var(NO_AUTO_UPDATE_VAR).is_ok_and(|v| !v.is_empty()) {
        debug!("Auto-update disabled via {}.", NO_AUTO_UPDATE_VAR);
        return Ok(());
    }
    let cache = Cache::new(config)?;
    let refreshed = casket_net::api::refresh_api_cache(&cache, false).await?;
    if refreshed.is_empty() {
        debug!("Definition listings are fresh, skipping auto-update.");
    } else {
        println!(
            "{}{}",
            "==> ".bold().blue(),
            format!("Auto-updated {}", refreshed.join(", ")).bold()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let config = Config::load()
        .map_err(|e| CasketError::Config(format!("Could not load config: {e}")))?;
    init_logging(&config, cli_args.verbose);

    if cli_args.command.reads_definitions() {
        if let Err(e) = check_and_run_auto_update(&config).await {
            warn!("Auto-update failed: {}", e);
        }
    } else {
        debug!("Skipping auto-update check for command: {:?}", cli_args.command);
    }

    if let Err(e) = cli_args.command.run(&config).await {
        error!("Command failed: {:#}", e);
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        process::exit(1);
    }

    debug!("Command completed successfully.");
    Ok(())
}
