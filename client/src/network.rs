//! Client network layer: joining a room, streaming input and receiving state

use crate::input::InputChannel;
use log::{debug, info, warn};
use shared::map_sync::{MapPayload, Wall};
use shared::protocol::{self, SessionEnd, SessionStart};
use shared::snapshot::sequence_greater_than;
use shared::{GameStateSnapshot, Message, NetConfig, NetError, Payload};
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

pub const USER_DISCONNECT_REASON: &str = "user_disconnect";

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Notifications from the network task to the game loop
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected {
        client_id: String,
    },
    /// Emitted once per connection, whoever ended it
    Disconnected {
        reason: String,
    },
    /// A round is starting; `map` is present only if it was sent and verified
    SessionStarted {
        round: u32,
        skins: BTreeMap<String, String>,
        map: Option<Vec<Wall>>,
    },
    SessionEnded(SessionEnd),
    MapSynced {
        walls: Vec<Wall>,
        checksum: String,
    },
    MapRejected {
        reason: String,
    },
}

/// Joining side of a two-player session
pub struct GameClient {
    config: NetConfig,
    state: ConnectionState,
    socket: Option<Arc<UdpSocket>>,
    host_addr: Option<SocketAddr>,
    client_id: Option<String>,
    input: InputChannel,

    // Cleared by whichever side ends the connection first
    link_up: Arc<AtomicBool>,
    running: Arc<AtomicBool>,

    snapshots: Option<watch::Receiver<Option<GameStateSnapshot>>>,
    events_tx: mpsc::Sender<ClientEvent>,
    events_rx: mpsc::Receiver<ClientEvent>,
    task: Option<JoinHandle<()>>,
}

impl GameClient {
    pub fn new(config: NetConfig) -> Result<Self, NetError> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);

        Ok(Self {
            config,
            state: ConnectionState::Idle,
            socket: None,
            host_addr: None,
            client_id: None,
            input: InputChannel::new(),
            link_up: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            snapshots: None,
            events_tx,
            events_rx,
            task: None,
        })
    }

    /// Joins the room at `host_addr` and starts the network task.
    ///
    /// Waits up to `connect_timeout` for the host's answer. On rejection or
    /// timeout the client goes back to `Idle`.
    pub async fn connect(
        &mut self,
        host_addr: SocketAddr,
        display_name: &str,
    ) -> Result<String, NetError> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => {
                return Err(NetError::InvalidState("client is already connected"));
            }
            ConnectionState::Disconnected => self.disconnect().await,
            ConnectionState::Idle => {}
        }

        let bind_addr = match host_addr.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        info!("Connecting to {} as {}...", host_addr, display_name);
        self.state = ConnectionState::Connecting;

        let client_id = match self.handshake(&socket, host_addr, display_name).await {
            Ok(client_id) => client_id,
            Err(e) => {
                self.state = ConnectionState::Idle;
                warn!("Connection to {} failed: {}", host_addr, e);
                return Err(e);
            }
        };

        let stale = self.poll_events().len();
        if stale > 0 {
            debug!("Discarded {} events from the previous connection", stale);
        }

        let socket = Arc::new(socket);
        let (snapshots_tx, snapshots_rx) = watch::channel(None);
        self.input.clear();
        self.link_up = Arc::new(AtomicBool::new(true));
        self.running = Arc::new(AtomicBool::new(true));

        let client_loop = ClientLoop {
            socket: Arc::clone(&socket),
            host_addr,
            client_id: client_id.clone(),
            input: self.input.clone(),
            link_up: Arc::clone(&self.link_up),
            running: Arc::clone(&self.running),
            events: self.events_tx.clone(),
            snapshots: snapshots_tx,
            heartbeat_interval: self.config.effective_heartbeat_interval(),
            poll_interval: self.config.poll_interval,
        };
        self.task = Some(tokio::spawn(client_loop.run()));

        self.socket = Some(socket);
        self.host_addr = Some(host_addr);
        self.client_id = Some(client_id.clone());
        self.snapshots = Some(snapshots_rx);
        self.state = ConnectionState::Connected;

        info!("Connected! Client ID: {}", client_id);
        emit(
            &self.events_tx,
            ClientEvent::Connected {
                client_id: client_id.clone(),
            },
        );

        Ok(client_id)
    }

    async fn handshake(
        &self,
        socket: &UdpSocket,
        host_addr: SocketAddr,
        display_name: &str,
    ) -> Result<String, NetError> {
        send_message(socket, &Message::join_request(display_name), host_addr).await?;

        let deadline = Instant::now() + self.config.connect_timeout;
        let mut buffer = [0u8; protocol::MAX_DATAGRAM_SIZE];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (len, from) = match timeout(remaining, socket.recv_from(&mut buffer)).await {
                Ok(received) => received?,
                Err(_) => {
                    return Err(NetError::Timeout(format!(
                        "no join response from {} within {:?}",
                        host_addr, self.config.connect_timeout
                    )));
                }
            };

            if from != host_addr {
                debug!("Ignoring datagram from {} while connecting", from);
                continue;
            }

            let message = match protocol::decode(&buffer[..len]) {
                Ok(message) => message,
                Err(e) => {
                    debug!("Ignoring datagram from {} while connecting: {}", from, e);
                    continue;
                }
            };

            match message.payload {
                Payload::JoinResponse {
                    success: true,
                    client_id: Some(client_id),
                    ..
                } => return Ok(client_id),
                Payload::JoinResponse { success: true, .. } => {
                    return Err(NetError::Protocol("join accepted without a client id".into()));
                }
                Payload::JoinResponse { reason, .. } => {
                    return Err(NetError::JoinRejected {
                        reason: reason.unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                other => debug!("Ignoring {} from {} while connecting", other.kind(), from),
            }
        }
    }

    /// Leaves the room and stops the network task. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if self.socket.is_none() {
            return;
        }

        let was_up = self.link_up.swap(false, Ordering::AcqRel);

        if was_up {
            if let (Some(socket), Some(addr)) = (self.socket.as_ref(), self.host_addr) {
                let goodbye = Message::disconnect(USER_DISCONNECT_REASON)
                    .with_sender(self.client_id.as_deref());
                if let Err(e) = send_message(socket, &goodbye, addr).await {
                    warn!("Failed to notify host of disconnect: {}", e);
                }
            }
        }

        self.running.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            if timeout(TASK_JOIN_TIMEOUT, task).await.is_err() {
                warn!("Client network task did not stop within {:?}", TASK_JOIN_TIMEOUT);
            }
        }

        self.socket = None;
        self.host_addr = None;
        self.client_id = None;
        self.snapshots = None;
        self.input.clear();
        self.state = ConnectionState::Disconnected;

        if was_up {
            info!("Disconnected from host");
            emit(
                &self.events_tx,
                ClientEvent::Disconnected {
                    reason: USER_DISCONNECT_REASON.to_string(),
                },
            );
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.state == ConnectionState::Connected && !self.link_up.load(Ordering::Acquire) {
            ConnectionState::Disconnected
        } else {
            self.state
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Identifier issued by the host, while connected.
    pub fn player_id(&self) -> Option<&str> {
        if self.is_connected() {
            self.client_id.as_deref()
        } else {
            None
        }
    }

    pub fn host_addr(&self) -> Option<SocketAddr> {
        self.host_addr
    }

    /// Queues a key press for the next flush. Ignored while not connected.
    pub fn press(&self, key: &str) -> bool {
        self.is_connected() && self.input.press(key)
    }

    pub fn release(&self, key: &str) -> bool {
        self.is_connected() && self.input.release(key)
    }

    pub fn current_keys(&self) -> HashSet<String> {
        self.input.current_keys()
    }

    /// Newest snapshot received since the last call, if any.
    pub fn take_snapshot(&mut self) -> Option<GameStateSnapshot> {
        let slot = self.snapshots.as_mut()?;
        if !slot.has_changed().unwrap_or(false) {
            return None;
        }
        slot.borrow_and_update().clone()
    }

    pub fn poll_events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events_rx.recv().await
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// State owned by the spawned network task
struct ClientLoop {
    socket: Arc<UdpSocket>,
    host_addr: SocketAddr,
    client_id: String,
    input: InputChannel,
    link_up: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    events: mpsc::Sender<ClientEvent>,
    snapshots: watch::Sender<Option<GameStateSnapshot>>,
    heartbeat_interval: Duration,
    poll_interval: Duration,
}

impl ClientLoop {
    async fn run(self) {
        let mut buffer = [0u8; protocol::MAX_DATAGRAM_SIZE];
        let mut last_heartbeat = Instant::now();
        let mut last_sequence: Option<u32> = None;

        while self.running.load(Ordering::Acquire) {
            let heartbeat_due = last_heartbeat.elapsed() >= self.heartbeat_interval;

            if let Err(e) = self.send_outbound(heartbeat_due).await {
                if is_fatal(&e) {
                    self.connection_lost(format!("send failed: {}", e));
                    break;
                }
                warn!("Dropping outbound message: {}", e);
            }
            if heartbeat_due {
                last_heartbeat = Instant::now();
            }

            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((len, addr)) => {
                        if let Some(reason) = self.handle_datagram(&buffer[..len], addr, &mut last_sequence) {
                            self.connection_lost(reason);
                            break;
                        }
                    }
                    Err(e) => {
                        let e = NetError::from(e);
                        if is_fatal(&e) {
                            self.connection_lost(format!("receive failed: {}", e));
                            break;
                        }
                    }
                },
                _ = self.input.queued() => {}
                _ = sleep(self.poll_interval) => {}
            }
        }

        debug!("Client network task stopped");
    }

    /// Flushes pending input; on heartbeat ticks also sends a heartbeat and the held keys.
    async fn send_outbound(&self, heartbeat_due: bool) -> Result<(), NetError> {
        if heartbeat_due {
            let heartbeat = Message::heartbeat().with_sender(Some(&self.client_id));
            send_message(&self.socket, &heartbeat, self.host_addr).await?;
        }

        let batch = self.input.drain();
        let held = heartbeat_due.then(|| self.input.held_keys());
        if batch.is_none() && held.is_none() {
            return Ok(());
        }

        let batch = batch.unwrap_or_default();
        let input = Message::player_input(batch.pressed, batch.released, held)
            .with_sender(Some(&self.client_id));
        send_message(&self.socket, &input, self.host_addr).await
    }

    /// Returns the reason when the host ended the connection.
    fn handle_datagram(
        &self,
        data: &[u8],
        addr: SocketAddr,
        last_sequence: &mut Option<u32>,
    ) -> Option<String> {
        if addr != self.host_addr {
            debug!("Ignoring datagram from {}, not the host", addr);
            return None;
        }

        let message = match protocol::decode(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", addr, e);
                return None;
            }
        };

        match message.payload {
            Payload::StateSnapshot(snapshot) => {
                if let Some(last) = *last_sequence {
                    if !sequence_greater_than(snapshot.sequence, last) {
                        debug!("Dropping stale snapshot {} (last {})", snapshot.sequence, last);
                        return None;
                    }
                }
                *last_sequence = Some(snapshot.sequence);
                self.snapshots.send_replace(Some(snapshot));
            }
            Payload::SessionStart(start) => self.handle_session_start(start),
            Payload::SessionEnd(end) => {
                info!("Session ended: {}", end.reason);
                emit(&self.events, ClientEvent::SessionEnded(end));
            }
            Payload::MapSync(map) => self.handle_map(map),
            Payload::Disconnect { reason } => {
                info!("Host closed the connection: {}", reason);
                return Some(reason);
            }
            Payload::Heartbeat => {}
            other => warn!("Unexpected {} message from host", other.kind()),
        }

        None
    }

    fn handle_session_start(&self, start: SessionStart) {
        let map = match start.map {
            Some(payload) => match payload.open() {
                Ok(walls) => Some(walls),
                Err(e) => {
                    warn!("Rejected map in round {} start: {}", start.round, e);
                    emit(
                        &self.events,
                        ClientEvent::MapRejected {
                            reason: e.to_string(),
                        },
                    );
                    None
                }
            },
            None => None,
        };

        info!("Round {} starting", start.round);
        emit(
            &self.events,
            ClientEvent::SessionStarted {
                round: start.round,
                skins: start.skins,
                map,
            },
        );
    }

    fn handle_map(&self, payload: MapPayload) {
        match payload.open() {
            Ok(walls) => {
                info!("Map synced: {} walls ({})", walls.len(), payload.checksum);
                emit(
                    &self.events,
                    ClientEvent::MapSynced {
                        walls,
                        checksum: payload.checksum,
                    },
                );
            }
            Err(e) => {
                warn!("Rejected map: {}", e);
                emit(
                    &self.events,
                    ClientEvent::MapRejected {
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    fn connection_lost(&self, reason: String) {
        if self.link_up.swap(false, Ordering::AcqRel) {
            warn!("Connection to {} lost: {}", self.host_addr, reason);
            emit(&self.events, ClientEvent::Disconnected { reason });
        }
    }
}

fn is_fatal(e: &NetError) -> bool {
    matches!(e, NetError::Transport(_)) && !e.is_transient()
}

fn emit(events: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => warn!("Client event queue full, dropping {:?}", event),
        Err(TrySendError::Closed(_)) => debug!("Client event queue closed"),
    }
}

async fn send_message(
    socket: &UdpSocket,
    message: &Message,
    addr: SocketAddr,
) -> Result<(), NetError> {
    let data = protocol::encode(message)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}
