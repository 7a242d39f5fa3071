//! Dotland game server.
//!
//! Loads `config.ron` (created with defaults on first run), applies CLI
//! overrides, and serves one canonical world until Ctrl-C.
//!
//! Run with: `cargo run -p dotland-server -- --port 7777`

mod setup;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotland_config::{CliArgs, Config};
use dotland_net::GameServer;
use tracing::{error, info, warn};

/// How long connections get to flush their `Logout` after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = match args.config.clone().map_or_else(Config::default_dir, Ok) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Failed to resolve config directory: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    dotland_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let content = setup::load_content(config)?;
    let authority = setup::build_authority(config, content)?;
    let server_config = setup::server_config(config)?;

    info!(
        "World {}x{}, up to {} players, API {}",
        config.world.width,
        config.world.height,
        config.network.max_players,
        dotland_world::API_VERSION
    );

    let server = Arc::new(GameServer::new(authority, server_config));
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                signal_server.shutdown();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {e}"),
        }
    });

    server.run().await?;

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while server.player_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("{} connections still open at exit", server.player_count().await);
    }
    Ok(())
}
