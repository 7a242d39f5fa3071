//! Turns a loaded [`Config`] into the world, authority and server settings.

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dotland_config::Config;
use dotland_net::{CompressionConfig, ServerConfig, WireConfig};
use dotland_sync::{AuthorityConfig, BroadcastAuthority};
use dotland_world::{
    ContentError, ContentPack, ContentTables, EntityError, Grid, GridError, GridPos, ItemId,
    ItemInstance, WorldState,
};

/// Why the server could not be assembled from its configuration.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The content pack failed to load or validate.
    #[error(transparent)]
    Content(#[from] ContentError),

    /// The configured grid dimensions are invalid.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// `network.server_address` is not an IP address.
    #[error("invalid server address {address:?}: {source}")]
    Address {
        /// Configured value.
        address: String,
        /// Parse failure.
        #[source]
        source: AddrParseError,
    },

    /// A starting item is missing from the content pack.
    #[error("starting item {0:?} is not defined in the content pack")]
    UnknownStartingItem(ItemId),

    /// A starting item's count breaks its stacking rules.
    #[error("starting item {item:?}: {source}")]
    InvalidStartingItem {
        /// Offending item.
        item: ItemId,
        /// Rule violated.
        #[source]
        source: EntityError,
    },

    /// More starting items than inventory slots.
    #[error("{count} starting items do not fit in {capacity} inventory slots")]
    TooManyStartingItems {
        /// Configured starting items.
        count: usize,
        /// Configured inventory capacity.
        capacity: usize,
    },
}

/// Loads the configured content pack, or the built-in one.
pub fn load_content(config: &Config) -> Result<Arc<ContentTables>, SetupError> {
    let pack = match &config.world.content_path {
        Some(path) => ContentPack::load(path)?,
        None => ContentPack::builtin(),
    };
    Ok(Arc::new(pack.into_tables()?))
}

/// Builds the authority over an empty grid of the configured size.
pub fn build_authority(
    config: &Config,
    content: Arc<ContentTables>,
) -> Result<BroadcastAuthority, SetupError> {
    let starting_items: Vec<(ItemId, u32)> = config
        .world
        .starting_items
        .iter()
        .map(|&(id, count)| (ItemId(id), count))
        .collect();
    if starting_items.len() > config.world.inventory_capacity {
        return Err(SetupError::TooManyStartingItems {
            count: starting_items.len(),
            capacity: config.world.inventory_capacity,
        });
    }
    for &(id, count) in &starting_items {
        let def = content
            .items
            .lookup(id)
            .ok_or(SetupError::UnknownStartingItem(id))?;
        ItemInstance::new(def, count)
            .map_err(|source| SetupError::InvalidStartingItem { item: id, source })?;
    }

    let grid = Grid::new(config.world.width, config.world.height, content)?;
    let authority_config = AuthorityConfig {
        spawn: GridPos::new(config.world.spawn_x, config.world.spawn_y),
        inventory_capacity: config.world.inventory_capacity,
        starting_items,
        max_players: config.network.max_players as usize,
    };
    Ok(BroadcastAuthority::new(WorldState::new(grid), authority_config))
}

/// Server socket and timing settings.
pub fn server_config(config: &Config) -> Result<ServerConfig, SetupError> {
    let ip: IpAddr = config
        .network
        .server_address
        .parse()
        .map_err(|source| SetupError::Address {
            address: config.network.server_address.clone(),
            source,
        })?;
    let broadcast_interval = match config.sync.broadcast_interval_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };
    let compression = CompressionConfig {
        threshold: config.sync.compression_threshold,
        enabled: config.sync.compression_threshold > 0,
    };

    Ok(ServerConfig {
        bind_addr: SocketAddr::new(ip, config.network.server_port),
        idle_timeout: Duration::from_secs(u64::from(config.network.timeout_seconds)),
        broadcast_interval,
        wire: WireConfig {
            compression,
            ..WireConfig::default()
        },
        ..ServerConfig::default()
    })
}
