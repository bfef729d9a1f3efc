use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relaybird::app::Relay;
use relaybird::config::Config;
use relaybird::stream::StopHandle;

#[derive(Parser)]
#[command(name = "relaybird", version, about = "Relay a post stream to Misskey accounts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the stream and relay posts until interrupted
    Run {
        #[arg(short, long, default_value = "relaybird.yaml")]
        config: PathBuf,
    },
    /// Validate the config and probe every destination
    Check {
        #[arg(short, long, default_value = "relaybird.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { config } => run(config).await,
        Command::Check { config } => check(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Relaybird exited with error");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    let config = Config::load(path)
        .await
        .with_context(|| format!("failed to load {}", path.display()))?;
    init_tracing(&config.logging.level);
    Ok(config)
}

/// RUST_LOG wins over the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run(path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&path).await?;
    let relay = Relay::from_config(&config)?;

    for report in relay.health_check().await {
        if report.enabled && !report.healthy {
            warn!(
                source = %report.source_account_id,
                destination = %report.destination,
                "Continuing with unhealthy destination"
            );
        }
    }

    tokio::spawn(stop_on_signal(relay.stop_handle()));

    info!(config = %path.display(), "Relaybird started");
    relay.run().await.context("stream failed")?;
    info!("Relaybird stopped");
    Ok(())
}

async fn check(path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&path).await?;
    let relay = Relay::from_config(&config)?;

    let mut failed = 0usize;
    for report in relay.health_check().await {
        let status = if report.healthy { "ok" } else { "FAILED" };
        println!(
            "{status:6} {} -> {}{}",
            report.source_account_id,
            report.destination,
            if report.enabled { "" } else { " (disabled)" }
        );
        if !report.healthy {
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} destination(s) failed the health check");
    }
    println!("Config OK");
    Ok(())
}

async fn stop_on_signal(stop: StopHandle) {
    wait_for_signal().await;
    info!("Shutdown signal received");
    stop.stop();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
