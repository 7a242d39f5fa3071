//! TCP game server: accepts connections, runs the version handshake, and
//! routes commands into a shared [`BroadcastAuthority`].
//!
//! Each connection gets a reader task (this module) and a writer task that
//! drains an unbounded outbound queue. Deltas are queued while the
//! authority lock is held, so every client sees them in canonical order;
//! socket writes happen on the writer tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, trace, warn};

use dotland_sync::BroadcastAuthority;
use dotland_world::{API_VERSION, PlayerId, check_compatibility};

use crate::messages::{Message, MessageError, WireConfig, read_message, write_message};

/// Identifier of a TCP connection, used in logs before a player exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Hands out increasing [`ConnectionId`]s.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Starts at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`GameServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind. Default: `0.0.0.0:7777`.
    pub bind_addr: SocketAddr,
    /// Time allowed between accepting a connection and its `Hello`.
    pub handshake_timeout: Duration,
    /// A connection silent for this long is dropped.
    pub idle_timeout: Duration,
    /// `None` broadcasts after every command; otherwise deltas are batched
    /// on this period.
    pub broadcast_interval: Option<Duration>,
    /// Framing and compression.
    pub wire: WireConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7777)),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            broadcast_interval: None,
            wire: WireConfig::default(),
        }
    }
}

type Outbound = mpsc::UnboundedSender<Message>;

/// Authority plus the outbound queue of every joined player, under one
/// lock.
struct Shared {
    authority: BroadcastAuthority,
    peers: FxHashMap<PlayerId, Outbound>,
}

impl Shared {
    /// Queues the pending deltas for their recipients.
    fn flush(&mut self) {
        for (player, delta) in self.authority.broadcast() {
            if let Some(peer) = self.peers.get(&player) {
                // A closed queue means the reader is already cleaning up.
                let _ = peer.send(Message::Delta(delta));
            }
        }
    }
}

/// TCP server around one canonical world.
pub struct GameServer {
    config: Arc<ServerConfig>,
    shared: Arc<Mutex<Shared>>,
    id_gen: IdGenerator,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GameServer {
    /// Creates a server owning `authority`.
    pub fn new(authority: BroadcastAuthority, config: ServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config: Arc::new(config),
            shared: Arc::new(Mutex::new(Shared {
                authority,
                peers: FxHashMap::default(),
            })),
            id_gen: IdGenerator::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        self.run_with_listener(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        if let Some(period) = self.config.broadcast_interval {
            tokio::spawn(broadcast_ticker(
                Arc::clone(&self.shared),
                period,
                self.shutdown_rx.clone(),
            ));
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = result?;
                    stream.set_nodelay(true)?;
                    let id = self.id_gen.next_id();
                    debug!("Accepted connection {id:?} from {peer_addr}");
                    tokio::spawn(serve_connection(
                        id,
                        stream,
                        Arc::clone(&self.shared),
                        Arc::clone(&self.config),
                        self.shutdown_rx.clone(),
                    ));
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Server shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Signals the accept loop and every connection to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Number of joined players.
    pub async fn player_count(&self) -> usize {
        self.shared.lock().await.peers.len()
    }

    /// Runs a server-side edit against the authority. With immediate
    /// broadcasting the resulting deltas are queued right away.
    pub async fn with_authority<R>(&self, edit: impl FnOnce(&mut BroadcastAuthority) -> R) -> R {
        let mut shared = self.shared.lock().await;
        let result = edit(&mut shared.authority);
        if self.config.broadcast_interval.is_none() {
            shared.flush();
        }
        result
    }
}

async fn broadcast_ticker(
    shared: Arc<Mutex<Shared>>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => shared.lock().await.flush(),
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn serve_connection(
    id: ConnectionId,
    stream: TcpStream,
    shared: Arc<Mutex<Shared>>,
    config: Arc<ServerConfig>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let Some((player, outbound, queue)) =
        handshake(id, &mut reader, &mut writer, &shared, &config).await
    else {
        return;
    };

    let wire = config.wire.clone();
    let writer_task = tokio::spawn(write_loop(writer, queue, wire, player));
    let reason = read_loop(player, reader, &outbound, &shared, &config, shutdown_rx).await;

    {
        let mut shared = shared.lock().await;
        shared.peers.remove(&player);
        shared.authority.leave(player);
        if config.broadcast_interval.is_none() {
            shared.flush();
        }
    }
    drop(outbound);
    let _ = writer_task.await;
    info!("Player {player} disconnected ({reason})");
}

/// Reads `Hello`, checks the version and joins the player. Returns `None`
/// when the connection should just be closed.
async fn handshake(
    id: ConnectionId,
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    shared: &Mutex<Shared>,
    config: &ServerConfig,
) -> Option<(PlayerId, Outbound, mpsc::UnboundedReceiver<Message>)> {
    let first = tokio::time::timeout(config.handshake_timeout, read_message(reader, &config.wire));
    let (client_version, player_name) = match first.await {
        Ok(Ok(Message::Hello {
            client_version,
            player_name,
        })) => (client_version, player_name),
        Ok(Ok(other)) => {
            warn!("Connection {id:?} opened with {} instead of Hello", other.kind());
            return None;
        }
        Ok(Err(err)) => {
            debug!("Connection {id:?} failed before Hello: {err}");
            return None;
        }
        Err(_) => {
            debug!("Connection {id:?} sent no Hello in time");
            return None;
        }
    };

    let api_version = API_VERSION.to_string();
    if let Err(err) = check_compatibility(&api_version, &client_version) {
        info!("Refusing connection {id:?} ({player_name}): {err}");
        refuse(writer, err.to_string(), config).await;
        return None;
    }

    let mut guard = shared.lock().await;
    let snapshot = match guard.authority.join() {
        Ok(snapshot) => snapshot,
        Err(err) => {
            drop(guard);
            info!("Refusing connection {id:?} ({player_name}): {err}");
            refuse(writer, err.to_string(), config).await;
            return None;
        }
    };
    let player = snapshot.player_id;
    let (outbound, queue) = mpsc::unbounded_channel();
    // Queued before the first delta so the client always starts from it.
    let _ = outbound.send(Message::Welcome {
        api_version,
        snapshot,
    });
    guard.peers.insert(player, outbound.clone());
    if config.broadcast_interval.is_none() {
        guard.flush();
    }
    drop(guard);

    info!("Connection {id:?} joined as player {player} ({player_name})");
    Some((player, outbound, queue))
}

async fn refuse(writer: &mut OwnedWriteHalf, reason: String, config: &ServerConfig) {
    let refusal = Message::Refused {
        reason,
        api_version: API_VERSION.to_string(),
    };
    if let Err(err) = write_message(writer, &refusal, &config.wire).await {
        debug!("Could not deliver refusal: {err}");
    }
}

async fn read_loop(
    player: PlayerId,
    mut reader: OwnedReadHalf,
    outbound: &Outbound,
    shared: &Mutex<Shared>,
    config: &ServerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> &'static str {
    let immediate = config.broadcast_interval.is_none();
    loop {
        tokio::select! {
            result = tokio::time::timeout(config.idle_timeout, read_message(&mut reader, &config.wire)) => {
                let msg = match result {
                    Err(_) => return "idle timeout",
                    Ok(Err(err)) if err.is_closed() => return "connection closed",
                    Ok(Err(err)) => {
                        warn!("Protocol error from player {player}: {err}");
                        return "protocol error";
                    }
                    Ok(Ok(msg)) => msg,
                };
                match msg {
                    Message::Command(command) => {
                        let mut shared = shared.lock().await;
                        let verdict = shared.authority.submit(player, &command);
                        trace!("Player {player} command {}: {verdict:?}", command.sequence);
                        if immediate {
                            shared.flush();
                        }
                    }
                    Message::Ping { timestamp_ms } => {
                        let _ = outbound.send(Message::Pong { timestamp_ms });
                    }
                    Message::Pong { .. } => {}
                    Message::Logout { reason } => {
                        debug!("Player {player} logged out: {reason}");
                        return "logout";
                    }
                    other => warn!("Ignoring unexpected {} from player {player}", other.kind()),
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let _ = outbound.send(Message::Logout {
                        reason: "server shutting down".into(),
                    });
                    return "server shutdown";
                }
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Message>,
    wire: WireConfig,
    player: PlayerId,
) {
    while let Some(msg) = queue.recv().await {
        if let Err(err) = write_message(&mut writer, &msg, &wire).await {
            log_write_error(player, &err);
            break;
        }
        if matches!(msg, Message::Logout { .. }) {
            break;
        }
    }
}

fn log_write_error(player: PlayerId, err: &MessageError) {
    if err.is_closed() {
        debug!("Player {player} went away while sending");
    } else {
        warn!("Failed to send to player {player}: {err}");
    }
}
