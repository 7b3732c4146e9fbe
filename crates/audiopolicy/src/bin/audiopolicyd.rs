//! audiopolicyd - audio policy daemon
//!
//! Loads the layered config, restores persisted settings from the state
//! directory and runs the command consumer until interrupted. Without a
//! native backend attached, routing calls are logged.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use audiopolicy::{
    AudioPolicyService, Collaborators, FileSettings, LoggingRouting, MemorySettings,
    ServiceConfig, SettingsStore,
};
use clap::Parser;
use policyconf::PolicyConfig;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "audiopolicyd")]
#[command(about = "Audio policy daemon: volumes, ringer mode, safe volume and SCO")]
#[command(version)]
struct Cli {
    /// Config file layered over the system and user files
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective config as TOML and exit
    #[arg(long)]
    show_config: bool,
}

fn init_tracing(default_level: &str) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

fn open_settings(config: &PolicyConfig) -> Arc<dyn SettingsStore> {
    match FileSettings::open(&config.paths.state_dir) {
        Ok(store) => {
            info!(path = %store.path().display(), "settings store");
            Arc::new(store)
        }
        Err(e) => {
            warn!("settings unavailable, keeping them in memory: {}", e);
            Arc::new(MemorySettings::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PolicyConfig::load_from(cli.config.as_deref()).context("Failed to load config")?;

    if cli.show_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_tracing(&config.telemetry.log_level)?;
    info!("audiopolicyd {} starting", env!("CARGO_PKG_VERSION"));

    let settings = open_settings(&config);
    let collaborators = Collaborators::new(Arc::new(LoggingRouting), settings);
    let service = Arc::new(AudioPolicyService::new(
        ServiceConfig::from(&config),
        collaborators,
    ));

    let consumer = tokio::spawn(Arc::clone(&service).run());
    service.system_ready();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("shutting down");
    service.shutdown();
    consumer.await.context("Command consumer panicked")?;

    info!("audiopolicyd shutdown complete");
    Ok(())
}
