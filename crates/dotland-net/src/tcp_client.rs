//! TCP client: version handshake, then local prediction with canonical
//! deltas merged as they arrive.
//!
//! [`GameClient::input`] predicts locally and queues the command for a
//! writer task without waiting on the network. A reader task reconciles
//! deltas and publishes a fresh [`ClientView`] on a [`watch`] channel after
//! every change.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use dotland_sync::{
    ClientGameState, ClientView, CommandKind, DEFAULT_MAX_PENDING, InputOutcome, SyncError,
};
use dotland_world::{CLIENT_VERSION, ContentTables, PlayerId, VersionError, check_compatibility};

use crate::messages::{Message, MessageError, WireConfig, read_message, write_message};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connect and handshake in progress.
    Connecting,
    /// Synced and exchanging messages.
    Connected,
    /// Closed by either side or timed out.
    Disconnected,
}

/// Observable connection state. Every background task stops once it reads
/// [`ConnectionState::Disconnected`].
#[derive(Debug)]
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Starts out [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(ConnectionState::Disconnected),
        }
    }

    /// Updates the state, notifying subscribers on change.
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// A new subscriber.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Current state.
    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Resolves once the state is `Disconnected`.
    pub async fn disconnected(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;
    }
}

/// Errors surfaced to the code driving a [`GameClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding, framing or compression failure.
    #[error(transparent)]
    Wire(#[from] MessageError),

    /// The server build is incompatible with this client.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// The sync engine refused the operation.
    #[error(transparent)]
    Sync(SyncError),

    /// The server turned the connection down.
    #[error("refused by server: {0}")]
    Refused(String),

    /// The server sent something out of order.
    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),

    /// No reply in time.
    #[error("timed out waiting for server")]
    Timeout,

    /// The session has ended.
    #[error("session ended")]
    Disconnected,
}

impl From<SyncError> for ClientError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Version(version) => Self::Version(version),
            other => Self::Sync(other),
        }
    }
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name sent in `Hello`.
    pub player_name: String,
    /// Unacknowledged commands allowed in flight.
    pub max_pending: usize,
    /// How long to wait for `Welcome`.
    pub handshake_timeout: Duration,
    /// Ping period.
    pub heartbeat_interval: Duration,
    /// No pong for this long ends the session.
    pub heartbeat_timeout: Duration,
    /// Framing and compression.
    pub wire: WireConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player_name: "player".into(),
            max_pending: DEFAULT_MAX_PENDING,
            handshake_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            wire: WireConfig::default(),
        }
    }
}

/// A synced session with a game server.
pub struct GameClient {
    player_id: PlayerId,
    state: Arc<Mutex<ClientGameState>>,
    outbound: mpsc::UnboundedSender<Message>,
    view_tx: Arc<watch::Sender<Option<ClientView>>>,
    connection: Arc<ConnectionStateWatch>,
}

impl GameClient {
    /// Connects, performs the version handshake and applies the initial
    /// snapshot. Fails with [`ClientError::Version`] if the server's API is
    /// incompatible with this build.
    pub async fn connect(
        addr: SocketAddr,
        content: Arc<ContentTables>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let connection = Arc::new(ConnectionStateWatch::new());
        connection.set(ConnectionState::Connecting);

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let hello = Message::Hello {
            client_version: CLIENT_VERSION.to_string(),
            player_name: config.player_name.clone(),
        };
        write_message(&mut writer, &hello, &config.wire).await?;
        let reply = tokio::time::timeout(
            config.handshake_timeout,
            read_message(&mut reader, &config.wire),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;

        let mut state = ClientGameState::new(config.max_pending);
        let player_id = match reply {
            Message::Welcome {
                api_version,
                snapshot,
            } => {
                if let Err(err) = state.begin_sync(&api_version) {
                    let logout = Message::Logout {
                        reason: "incompatible server".into(),
                    };
                    let _ = write_message(&mut writer, &logout, &config.wire).await;
                    return Err(err.into());
                }
                state.apply_snapshot(&snapshot, content)?;
                snapshot.player_id
            }
            Message::Refused {
                reason,
                api_version,
            } => {
                check_compatibility(&api_version, &CLIENT_VERSION.to_string())?;
                return Err(ClientError::Refused(reason));
            }
            other => return Err(ClientError::UnexpectedMessage(other.kind())),
        };

        connection.set(ConnectionState::Connected);
        info!("Connected to {addr} as player {player_id}");

        let view_tx = Arc::new(watch::Sender::new(state.view()));
        let state = Arc::new(Mutex::new(state));
        let (outbound, queue) = mpsc::unbounded_channel();
        let (pong_tx, pong_rx) = watch::channel(Instant::now());

        tokio::spawn(write_loop(
            writer,
            queue,
            config.wire.clone(),
            Arc::clone(&connection),
        ));
        tokio::spawn(read_loop(
            reader,
            ReaderContext {
                state: Arc::clone(&state),
                view_tx: Arc::clone(&view_tx),
                outbound: outbound.clone(),
                pong_tx,
                connection: Arc::clone(&connection),
                wire: config.wire.clone(),
            },
        ));
        tokio::spawn(heartbeat_loop(
            outbound.clone(),
            pong_rx,
            Arc::clone(&connection),
            config.heartbeat_interval,
            config.heartbeat_timeout,
        ));

        Ok(Self {
            player_id,
            state,
            outbound,
            view_tx,
            connection,
        })
    }

    /// The local player.
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Connection state watch.
    pub fn connection(&self) -> &Arc<ConnectionStateWatch> {
        &self.connection
    }

    /// Subscribes to rendering views. `None` once disconnected.
    pub fn views(&self) -> watch::Receiver<Option<ClientView>> {
        self.view_tx.subscribe()
    }

    /// The latest view.
    pub fn view(&self) -> Option<ClientView> {
        self.view_tx.borrow().clone()
    }

    /// Predicts `kind` locally and, if allowed, queues it for the server.
    pub async fn input(&self, kind: CommandKind) -> Result<InputOutcome, ClientError> {
        if self.connection.current() != ConnectionState::Connected {
            return Err(ClientError::Disconnected);
        }
        let mut state = self.state.lock().await;
        let outcome = state.input(kind, now_ms())?;
        if let InputOutcome::Predicted(command) = &outcome {
            self.outbound
                .send(Message::Command(*command))
                .map_err(|_| ClientError::Disconnected)?;
            self.view_tx.send_replace(state.view());
        }
        Ok(outcome)
    }

    /// Sets the camera zoom. Returns `false` for non-positive values.
    pub async fn set_zoom(&self, zoom: f32) -> bool {
        let mut state = self.state.lock().await;
        let changed = state.set_zoom(zoom);
        if changed {
            self.view_tx.send_replace(state.view());
        }
        changed
    }

    /// Sends `Logout`, stops background tasks and drops local state.
    pub async fn disconnect(&self) {
        let _ = self.outbound.send(Message::Logout {
            reason: "client disconnect".into(),
        });
        self.connection.set(ConnectionState::Disconnected);
        self.state.lock().await.disconnect();
        self.view_tx.send_replace(None);
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        if self.connection.current() == ConnectionState::Disconnected {
            return;
        }
        // Logout is queued first so the writer sends it before stopping.
        let _ = self.outbound.send(Message::Logout {
            reason: "client dropped".into(),
        });
        self.connection.set(ConnectionState::Disconnected);
    }
}

struct ReaderContext {
    state: Arc<Mutex<ClientGameState>>,
    view_tx: Arc<watch::Sender<Option<ClientView>>>,
    outbound: mpsc::UnboundedSender<Message>,
    pong_tx: watch::Sender<Instant>,
    connection: Arc<ConnectionStateWatch>,
    wire: WireConfig,
}

async fn read_loop(mut reader: OwnedReadHalf, ctx: ReaderContext) {
    loop {
        let msg = tokio::select! {
            result = read_message(&mut reader, &ctx.wire) => result,
            _ = ctx.connection.disconnected() => return,
        };
        match msg {
            Ok(Message::Delta(delta)) => {
                let mut state = ctx.state.lock().await;
                match state.apply_delta(&delta) {
                    Ok(report) => {
                        if report.corrected || !report.dropped.is_empty() {
                            debug!(
                                "Prediction corrected at {} (dropped {:?})",
                                delta.canonical_sequence, report.dropped
                            );
                        }
                        ctx.view_tx.send_replace(state.view());
                    }
                    Err(err) => {
                        error!("Discarding session after bad delta: {err}");
                        break;
                    }
                }
            }
            Ok(Message::Ping { timestamp_ms }) => {
                let _ = ctx.outbound.send(Message::Pong { timestamp_ms });
            }
            Ok(Message::Pong { .. }) => {
                ctx.pong_tx.send_replace(Instant::now());
            }
            Ok(Message::Logout { reason }) => {
                info!("Server ended the session: {reason}");
                break;
            }
            Ok(other) => warn!("Ignoring unexpected {} from server", other.kind()),
            Err(err) if err.is_closed() => {
                info!("Server closed the connection");
                break;
            }
            Err(err) => {
                error!("Connection error: {err}");
                break;
            }
        }
    }

    ctx.state.lock().await.disconnect();
    ctx.view_tx.send_replace(None);
    ctx.connection.set(ConnectionState::Disconnected);
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Message>,
    wire: WireConfig,
    connection: Arc<ConnectionStateWatch>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            msg = queue.recv() => msg,
            _ = connection.disconnected() => None,
        };
        let Some(msg) = msg else { break };
        if let Err(err) = write_message(&mut writer, &msg, &wire).await {
            debug!("Send failed: {err}");
            connection.set(ConnectionState::Disconnected);
            break;
        }
        if matches!(msg, Message::Logout { .. }) {
            break;
        }
    }
}

async fn heartbeat_loop(
    outbound: mpsc::UnboundedSender<Message>,
    pong_rx: watch::Receiver<Instant>,
    connection: Arc<ConnectionStateWatch>,
    period: Duration,
    timeout: Duration,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = connection.disconnected() => return,
        }
        let silent_for = pong_rx.borrow().elapsed();
        if silent_for > timeout {
            warn!("Heartbeat timeout, no pong for {silent_for:?}");
            connection.set(ConnectionState::Disconnected);
            return;
        }
        let ping = Message::Ping {
            timestamp_ms: now_ms(),
        };
        if outbound.send(ping).is_err() {
            return;
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use dotland_sync::{AuthorityConfig, BroadcastAuthority};
    use dotland_world::{CellInstance, CellTypeId, ContentPack, Grid, GridPos, WorldState};
    use tokio::net::TcpListener;

    use super::*;
    use crate::tcp_server::{GameServer, ServerConfig};

    fn content() -> Arc<ContentTables> {
        Arc::new(ContentPack::builtin().into_tables().unwrap())
    }

    async fn start_server() -> (SocketAddr, Arc<GameServer>) {
        let world = WorldState::new(Grid::new(5, 5, content()).unwrap());
        let authority = BroadcastAuthority::new(
            world,
            AuthorityConfig {
                spawn: GridPos::new(2, 2),
                ..Default::default()
            },
        );
        let server = Arc::new(GameServer::new(authority, ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let srv = Arc::clone(&server);
        tokio::spawn(async move {
            srv.run_with_listener(listener).await.unwrap();
        });
        (addr, server)
    }

    /// Helper: a server that answers `Hello` with a fixed reply.
    async fn scripted_server(reply: Message) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let wire = WireConfig::default();
            let _ = read_message(&mut stream, &wire).await;
            write_message(&mut stream, &reply, &wire).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });
        addr
    }

    /// Waits until the client's view satisfies `pred`.
    async fn wait_for_view(client: &GameClient, pred: impl Fn(&ClientView) -> bool) -> ClientView {
        let mut views = client.views();
        let view = tokio::time::timeout(
            Duration::from_secs(5),
            views.wait_for(|view| view.as_ref().is_some_and(&pred)),
        )
        .await
        .expect("view never converged")
        .unwrap();
        view.clone().unwrap()
    }

    #[tokio::test]
    async fn test_state_watch_transitions() {
        let watch = ConnectionStateWatch::new();
        let mut rx = watch.subscribe();
        assert_eq!(watch.current(), ConnectionState::Disconnected);
        watch.set(ConnectionState::Connected);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
        watch.set(ConnectionState::Disconnected);
        watch.disconnected().await;
    }

    #[tokio::test]
    async fn test_incompatible_welcome_surfaces_version_mismatch() {
        let world = WorldState::new(Grid::new(2, 2, content()).unwrap());
        let reply = Message::Welcome {
            api_version: "3.0.0".into(),
            snapshot: dotland_sync::Snapshot {
                player_id: PlayerId(1),
                canonical_sequence: 0,
                ack_sequence: 0,
                world: world.to_snapshot(),
            },
        };
        let addr = scripted_server(reply).await;
        let result = GameClient::connect(addr, content(), ClientConfig::default()).await;
        assert!(matches!(
            result,
            Err(ClientError::Version(VersionError::Mismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_refusal_for_version_surfaces_version_mismatch() {
        let addr = scripted_server(Message::Refused {
            reason: "version mismatch".into(),
            api_version: "7.0.0".into(),
        })
        .await;
        let result = GameClient::connect(addr, content(), ClientConfig::default()).await;
        assert!(matches!(result, Err(ClientError::Version(_))));

        let addr = scripted_server(Message::Refused {
            reason: "server full".into(),
            api_version: "0.1.0".into(),
        })
        .await;
        let result = GameClient::connect(addr, content(), ClientConfig::default()).await;
        assert!(matches!(result, Err(ClientError::Refused(reason)) if reason == "server full"));
    }

    #[tokio::test]
    async fn test_two_clients_converge_over_tcp() {
        let (addr, server) = start_server().await;
        let a = GameClient::connect(addr, content(), ClientConfig::default())
            .await
            .unwrap();
        let b = GameClient::connect(addr, content(), ClientConfig::default())
            .await
            .unwrap();
        let (ida, idb) = (a.player_id(), b.player_id());
        assert_ne!(ida, idb);

        // A at (2, 2), B at (2, 1).
        let outcome = a.input(CommandKind::Move { x: 2, y: 3 }).await.unwrap();
        assert!(matches!(outcome, InputOutcome::Predicted(_)));
        let outcome = b.input(CommandKind::Move { x: 1, y: 1 }).await.unwrap();
        assert!(matches!(outcome, InputOutcome::Predicted(_)));

        for client in [&a, &b] {
            wait_for_view(client, |view| {
                view.pending == 0
                    && view.world.player(ida).map(|p| p.position()) == Some(GridPos::new(2, 3))
                    && view.world.player(idb).map(|p| p.position()) == Some(GridPos::new(1, 1))
            })
            .await;
        }

        let canonical = server.with_authority(|authority| authority.world().clone()).await;
        assert_eq!(a.view().unwrap().world, canonical);
        assert_eq!(b.view().unwrap().world, canonical);
        assert_eq!(a.view().unwrap().camera.y(), 3.0);
    }

    #[tokio::test]
    async fn test_server_edit_rolls_back_prediction() {
        let (addr, server) = start_server().await;
        let client = GameClient::connect(addr, content(), ClientConfig::default())
            .await
            .unwrap();
        let me = client.player_id();

        // The wall lands on the server before the move does.
        server
            .with_authority(|authority| {
                authority
                    .set_cell(GridPos::new(2, 3), Some(CellInstance::new(CellTypeId(2))))
                    .unwrap();
            })
            .await;
        let _ = client.input(CommandKind::Move { x: 2, y: 3 }).await.unwrap();

        let view = wait_for_view(&client, |view| {
            view.pending == 0 && view.world.grid().get(2, 3).ok().flatten().is_some()
        })
        .await;
        assert_eq!(view.world.player(me).unwrap().position(), GridPos::new(2, 2));
    }

    #[tokio::test]
    async fn test_dropped_client_leaves_server() {
        let (addr, server) = start_server().await;
        let client = GameClient::connect(addr, content(), ClientConfig::default())
            .await
            .unwrap();
        let connection = Arc::clone(client.connection());
        assert_eq!(server.player_count().await, 1);

        drop(client);
        assert_eq!(connection.current(), ConnectionState::Disconnected);

        tokio::time::timeout(Duration::from_secs(5), async {
            while server.player_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("server kept the dropped player");
        let world_players = server
            .with_authority(|authority| authority.world().player_count())
            .await;
        assert_eq!(world_players, 0);
    }

    #[tokio::test]
    async fn test_disconnect_ends_session() {
        let (addr, server) = start_server().await;
        let client = GameClient::connect(addr, content(), ClientConfig::default())
            .await
            .unwrap();
        client.disconnect().await;

        assert_eq!(client.connection().current(), ConnectionState::Disconnected);
        assert!(client.view().is_none());
        assert!(matches!(
            client.input(CommandKind::Move { x: 2, y: 3 }).await,
            Err(ClientError::Disconnected)
        ));

        tokio::time::timeout(Duration::from_secs(5), async {
            while server.player_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("server never removed the player");
    }

    #[tokio::test]
    async fn test_server_shutdown_disconnects_client() {
        let (addr, server) = start_server().await;
        let client = GameClient::connect(addr, content(), ClientConfig::default())
            .await
            .unwrap();
        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), client.connection().disconnected())
            .await
            .expect("client never noticed the shutdown");
        assert!(client.view().is_none());
    }
}
