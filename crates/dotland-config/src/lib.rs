//! Runtime settings for the Dotland server and client.
//!
//! Settings persist as `config.ron`. Missing sections and fields fall back
//! to defaults, unknown fields are ignored, and CLI flags override whatever
//! was loaded.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CONFIG_FILE, Config, DebugConfig, NetworkConfig, SyncConfig, WorldConfig};
pub use error::ConfigError;
