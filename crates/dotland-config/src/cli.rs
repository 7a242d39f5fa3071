//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Dotland command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "dotland", about = "Dotland game server")]
pub struct CliArgs {
    /// Address to bind or connect to.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Maximum number of players.
    #[arg(long)]
    pub max_players: Option<u32>,

    /// Grid width in cells.
    #[arg(long)]
    pub width: Option<u32>,

    /// Grid height in cells.
    #[arg(long)]
    pub height: Option<u32>,

    /// RON content pack to load instead of the built-in one.
    #[arg(long)]
    pub content: Option<PathBuf>,

    /// Delta batching period in milliseconds (0 = immediate).
    #[arg(long)]
    pub broadcast_interval_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(max) = args.max_players {
            self.network.max_players = max;
        }
        if let Some(w) = args.width {
            self.world.width = w;
        }
        if let Some(h) = args.height {
            self.world.height = h;
        }
        if let Some(ref path) = args.content {
            self.world.content_path = Some(path.clone());
        }
        if let Some(ms) = args.broadcast_interval_ms {
            self.sync.broadcast_interval_ms = ms;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
