//! Host network layer handling session admission, client input and outbound state

use crate::session::SessionRegistry;
use crate::sync::StateSynchronizer;
use log::{debug, error, info, warn};
use shared::discovery::RoomAdvertiser;
use shared::map_sync::{MapPayload, Wall};
use shared::protocol::{self, SessionEnd, SessionStart};
use shared::{GameStateSnapshot, Message, NetConfig, NetError, Payload};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Sender id stamped on every host message
pub const HOST_PLAYER_ID: &str = "host";
pub const ROOM_FULL_REASON: &str = "room_full";
pub const HOST_SHUTDOWN_REASON: &str = "host_shutdown";

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Timeout,
    ClientDisconnect,
}

impl LeaveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::Timeout => "timeout",
            LeaveReason::ClientDisconnect => "client_disconnect",
        }
    }
}

impl fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications from the network task to the game loop
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ClientJoined {
        client_id: String,
        player_name: String,
    },
    ClientLeft {
        client_id: String,
        player_name: String,
        reason: LeaveReason,
    },
    /// Key changes since the previous input message
    InputReceived {
        client_id: String,
        pressed: Vec<String>,
        released: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Idle,
    Hosting,
    Stopped,
}

/// Hosting side of a two-player session
///
/// Owns the game socket, the room advertiser and the network task. The game
/// loop drives it from the simulation context: it drains [`HostEvent`]s with
/// [`GameHost::poll_events`] and pushes snapshots with [`GameHost::send_state`]
/// every frame.
pub struct GameHost {
    config: NetConfig,
    state: HostState,
    socket: Option<Arc<UdpSocket>>,
    local_addr: Option<SocketAddr>,
    sessions: Arc<RwLock<SessionRegistry>>,
    running: Arc<AtomicBool>,
    advertiser: Option<RoomAdvertiser>,
    synchronizer: StateSynchronizer,

    // Network task -> game loop
    events_tx: mpsc::Sender<HostEvent>,
    events_rx: mpsc::Receiver<HostEvent>,
    task: Option<JoinHandle<()>>,
}

impl GameHost {
    pub fn new(config: NetConfig) -> Result<Self, NetError> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);

        Ok(Self {
            synchronizer: StateSynchronizer::new(config.target_sync_hz),
            config,
            state: HostState::Idle,
            socket: None,
            local_addr: None,
            sessions: Arc::new(RwLock::new(SessionRegistry::new())),
            running: Arc::new(AtomicBool::new(false)),
            advertiser: None,
            events_tx,
            events_rx,
            task: None,
        })
    }

    /// Binds the game socket, starts advertising and spawns the network task.
    pub async fn start(&mut self, room_name: &str) -> Result<SocketAddr, NetError> {
        if self.state == HostState::Hosting {
            return Err(NetError::InvalidState("host is already running"));
        }

        let socket = Arc::new(UdpSocket::bind(self.config.game_addr()).await?);
        let local_addr = socket.local_addr()?;
        info!("Host listening on {}", local_addr);

        let advertiser = RoomAdvertiser::start(&self.config, room_name, local_addr.port()).await?;

        self.sessions.write().await.clear();
        let stale = self.poll_events().len();
        if stale > 0 {
            debug!("Discarded {} events from the previous run", stale);
        }
        self.synchronizer = StateSynchronizer::new(self.config.target_sync_hz);
        self.running = Arc::new(AtomicBool::new(true));

        let host_loop = HostLoop {
            socket: Arc::clone(&socket),
            sessions: Arc::clone(&self.sessions),
            running: Arc::clone(&self.running),
            events: self.events_tx.clone(),
            occupancy: advertiser.occupancy(),
            session_timeout: self.config.session_timeout,
            poll_interval: self.config.poll_interval,
        };
        self.task = Some(tokio::spawn(host_loop.run()));

        self.socket = Some(socket);
        self.local_addr = Some(local_addr);
        self.advertiser = Some(advertiser);
        self.state = HostState::Hosting;

        info!("Hosting room '{}'", room_name);
        Ok(local_addr)
    }

    /// Shuts the room down. Refuses while a client is connected unless `force` is set.
    pub async fn stop(&mut self, force: bool) -> Result<(), NetError> {
        if self.state != HostState::Hosting {
            return Err(NetError::InvalidState("host is not running"));
        }

        let client_addr = self.sessions.read().await.client_addr();
        if client_addr.is_some() && !force {
            return Err(NetError::SessionActive);
        }

        if let (Some(addr), Some(socket)) = (client_addr, self.socket.as_ref()) {
            let goodbye =
                Message::disconnect(HOST_SHUTDOWN_REASON).with_sender(Some(HOST_PLAYER_ID));
            if let Err(e) = send_message(socket, &goodbye, addr).await {
                warn!("Failed to notify client of shutdown: {}", e);
            }
        }

        self.running.store(false, Ordering::Release);

        if let Some(mut advertiser) = self.advertiser.take() {
            advertiser.stop().await;
        }

        if let Some(task) = self.task.take() {
            if timeout(TASK_JOIN_TIMEOUT, task).await.is_err() {
                warn!("Host network task did not stop within {:?}", TASK_JOIN_TIMEOUT);
            }
        }

        self.socket = None;
        self.local_addr = None;
        self.sessions.write().await.clear();
        self.state = HostState::Stopped;

        info!("Host stopped");
        Ok(())
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub async fn player_count(&self) -> usize {
        self.sessions.read().await.player_count()
    }

    pub async fn is_room_full(&self) -> bool {
        self.sessions.read().await.is_full()
    }

    /// Display names of everyone in the room, host first.
    pub async fn connected_players(&self) -> Vec<String> {
        let mut players = vec![self.config.display_name.clone()];
        if let Some(session) = self.sessions.read().await.current() {
            players.push(session.player_name.clone());
        }
        players
    }

    /// Keys the remote player is currently holding.
    pub async fn get_client_input(&self) -> HashSet<String> {
        self.sessions.read().await.client_input()
    }

    pub async fn client_id(&self) -> Option<String> {
        self.sessions.read().await.client_id()
    }

    /// Drains every event queued since the last call.
    pub fn poll_events(&mut self) -> Vec<HostEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Waits for the next event.
    pub async fn next_event(&mut self) -> Option<HostEvent> {
        self.events_rx.recv().await
    }

    /// Sends `snapshot` if a client is connected and the sync interval has elapsed.
    ///
    /// Safe to call every frame. Returns whether a snapshot went out.
    pub async fn send_state(&mut self, snapshot: &GameStateSnapshot) -> Result<bool, NetError> {
        let now = Instant::now();
        if self.state != HostState::Hosting || !self.synchronizer.is_ready(now) {
            return Ok(false);
        }

        if !self.sessions.read().await.is_full() {
            return Ok(false);
        }

        match self.synchronizer.prepare(now, snapshot) {
            Some(prepared) => self.send_to_client(Message::state_snapshot(prepared)).await,
            None => Ok(false),
        }
    }

    /// Sends `message` to the connected client, if any.
    pub async fn send_to_client(&self, message: Message) -> Result<bool, NetError> {
        let socket = match self.socket.as_ref() {
            Some(socket) => socket,
            None => return Ok(false),
        };

        let addr = match self.sessions.read().await.client_addr() {
            Some(addr) => addr,
            None => return Ok(false),
        };

        send_message(socket, &message.with_sender(Some(HOST_PLAYER_ID)), addr).await?;
        Ok(true)
    }

    pub async fn start_session(&self, start: SessionStart) -> Result<bool, NetError> {
        info!("Starting round {}", start.round);
        self.send_to_client(Message::session_start(start)).await
    }

    pub async fn end_session(&self, end: SessionEnd) -> Result<bool, NetError> {
        info!("Ending session: {}", end.reason);
        self.send_to_client(Message::session_end(end)).await
    }

    /// Seals `layout` with its checksum and sends it to the client.
    pub async fn send_map(&self, layout: &[Wall]) -> Result<bool, NetError> {
        let payload = MapPayload::seal(layout)?;
        debug!("Sending map with {} walls ({})", payload.wall_count, payload.checksum);
        self.send_to_client(Message::map_sync(payload)).await
    }
}

impl Drop for GameHost {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// State owned by the spawned network task
struct HostLoop {
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<SessionRegistry>>,
    running: Arc<AtomicBool>,
    events: mpsc::Sender<HostEvent>,
    occupancy: Arc<AtomicU8>,
    session_timeout: Duration,
    poll_interval: Duration,
}

impl HostLoop {
    async fn run(self) {
        let mut buffer = [0u8; protocol::MAX_DATAGRAM_SIZE];

        while self.running.load(Ordering::Acquire) {
            match timeout(self.poll_interval, self.socket.recv_from(&mut buffer)).await {
                Ok(Ok((len, addr))) => self.handle_datagram(&buffer[..len], addr).await,
                Ok(Err(e)) => {
                    error!("Error receiving packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(_) => {}
            }

            self.sweep_timeouts().await;

            let count = self.sessions.read().await.player_count();
            self.occupancy
                .store(u8::try_from(count).unwrap_or(u8::MAX), Ordering::Relaxed);
        }

        debug!("Host network task stopped");
    }

    async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        let message = match protocol::decode(data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping datagram from {}: {}", addr, e);
                return;
            }
        };

        let kind = message.kind();
        let sender_id = message.sender_id;

        match message.payload {
            Payload::JoinRequest { player_name } => self.handle_join(player_name, addr).await,
            Payload::PlayerInput {
                pressed,
                released,
                held,
            } => {
                self.handle_input(sender_id.as_deref(), pressed, released, held)
                    .await
            }
            Payload::Heartbeat => {
                match self.sessions.write().await.owned_by(sender_id.as_deref()) {
                    Some(session) => session.refresh_heartbeat(),
                    None => debug!("Heartbeat from unknown sender {:?} at {}", sender_id, addr),
                }
            }
            Payload::Disconnect { reason } => {
                self.handle_disconnect(sender_id.as_deref(), &reason, addr)
                    .await
            }
            Payload::RoomAdvertise(_)
            | Payload::JoinResponse { .. }
            | Payload::StateSnapshot(_)
            | Payload::SessionStart(_)
            | Payload::SessionEnd(_)
            | Payload::MapSync(_) => {
                warn!("Unexpected {} message from {}", kind, addr);
            }
        }
    }

    async fn handle_join(&self, player_name: String, addr: SocketAddr) {
        let outcome = {
            let mut sessions = self.sessions.write().await;
            sessions
                .try_join(addr, &player_name)
                .map(|session| session.client_id.clone())
        };

        match outcome {
            Ok(client_id) => {
                let response = Message::join_accepted(&client_id).with_sender(Some(HOST_PLAYER_ID));
                if let Err(e) = send_message(&self.socket, &response, addr).await {
                    error!("Failed to send join response to {}: {}", addr, e);
                }
                self.emit(HostEvent::ClientJoined {
                    client_id,
                    player_name,
                });
            }
            Err(NetError::RoomFull) => {
                info!("Rejected {} from {}: room full", player_name, addr);
                let response =
                    Message::join_rejected(ROOM_FULL_REASON).with_sender(Some(HOST_PLAYER_ID));
                if let Err(e) = send_message(&self.socket, &response, addr).await {
                    error!("Failed to send join rejection to {}: {}", addr, e);
                }
            }
            Err(e) => warn!("Join from {} failed: {}", addr, e),
        }
    }

    async fn handle_input(
        &self,
        sender_id: Option<&str>,
        mut pressed: Vec<String>,
        mut released: Vec<String>,
        held: Option<Vec<String>>,
    ) {
        let client_id = {
            let mut sessions = self.sessions.write().await;
            let session = match sessions.owned_by(sender_id) {
                Some(session) => session,
                None => {
                    debug!("Ignoring input from unknown sender {:?}", sender_id);
                    return;
                }
            };

            session.refresh_heartbeat();
            session.apply_input(&pressed, &released);

            if let Some(held) = held {
                let drift = session.resync(&held);
                if !drift.is_empty() {
                    debug!("Resynced keys of {}: {:?}", session.client_id, drift);
                    pressed.extend(drift.pressed);
                    released.extend(drift.released);
                }
            }

            session.client_id.clone()
        };

        if pressed.is_empty() && released.is_empty() {
            return;
        }

        self.emit(HostEvent::InputReceived {
            client_id,
            pressed,
            released,
        });
    }

    async fn handle_disconnect(&self, sender_id: Option<&str>, reason: &str, addr: SocketAddr) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            if sessions.owned_by(sender_id).is_some() {
                sessions.remove()
            } else {
                None
            }
        };

        match removed {
            Some(session) => {
                info!("Client {} disconnected: {}", session.client_id, reason);
                self.emit(HostEvent::ClientLeft {
                    client_id: session.client_id,
                    player_name: session.player_name,
                    reason: LeaveReason::ClientDisconnect,
                });
            }
            None => debug!("Disconnect from unknown sender {:?} at {}", sender_id, addr),
        }
    }

    async fn sweep_timeouts(&self) {
        let evicted = self
            .sessions
            .write()
            .await
            .sweep_timeout(Instant::now(), self.session_timeout);

        if let Some(session) = evicted {
            warn!(
                "Client {} timed out after {:?}",
                session.client_id, self.session_timeout
            );
            self.emit(HostEvent::ClientLeft {
                client_id: session.client_id,
                player_name: session.player_name,
                reason: LeaveReason::Timeout,
            });
        }
    }

    fn emit(&self, event: HostEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!("Host event queue full, dropping {:?}", event),
            Err(TrySendError::Closed(_)) => debug!("Host event queue closed"),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::VehicleState;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio_test::{assert_err, assert_ok};

    fn test_config() -> NetConfig {
        let mut config = NetConfig::default();
        config.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.broadcast_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.game_port = 0;
        config.poll_interval = Duration::from_millis(20);
        config.target_sync_hz = 1000;
        config
    }

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    async fn started_host(config: NetConfig) -> (GameHost, SocketAddr) {
        let mut host = GameHost::new(config).unwrap();
        let addr = host.start("Test Room").await.unwrap();
        (host, addr)
    }

    async fn send(socket: &UdpSocket, message: Message, to: SocketAddr) {
        let bytes = protocol::encode(&message).unwrap();
        socket.send_to(&bytes, to).await.unwrap();
    }

    async fn recv(socket: &UdpSocket) -> Message {
        let mut buffer = [0u8; protocol::MAX_DATAGRAM_SIZE];
        let (len, _) = timeout(Duration::from_secs(1), socket.recv_from(&mut buffer))
            .await
            .expect("no datagram from host")
            .unwrap();
        protocol::decode(&buffer[..len]).unwrap()
    }

    async fn next_event(host: &mut GameHost) -> HostEvent {
        timeout(Duration::from_secs(2), host.next_event())
            .await
            .expect("no host event")
            .expect("event queue closed")
    }

    async fn join(host: &mut GameHost, host_addr: SocketAddr, name: &str) -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(&socket, Message::join_request(name), host_addr).await;

        let client_id = match recv(&socket).await.payload {
            Payload::JoinResponse {
                success: true,
                client_id: Some(id),
                ..
            } => id,
            other => panic!("unexpected join response {:?}", other),
        };

        match next_event(host).await {
            HostEvent::ClientJoined { client_id: id, .. } => assert_eq!(id, client_id),
            other => panic!("unexpected event {:?}", other),
        }

        (socket, client_id)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut host = GameHost::new(test_config()).unwrap();
        assert_eq!(host.state(), HostState::Idle);
        assert!(matches!(host.stop(false).await, Err(NetError::InvalidState(_))));

        let addr = host.start("Room").await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(host.state(), HostState::Hosting);
        assert_eq!(host.local_addr(), Some(addr));
        assert!(matches!(host.start("Room").await, Err(NetError::InvalidState(_))));

        assert_ok!(host.stop(false).await);
        assert_eq!(host.state(), HostState::Stopped);
        assert!(host.local_addr().is_none());

        // Restartable
        assert_ok!(host.start("Room").await);
        assert_eq!(host.state(), HostState::Hosting);
        assert_ok!(host.stop(false).await);
    }

    #[tokio::test]
    async fn test_restart_discards_stale_events() {
        let (mut host, addr) = started_host(test_config()).await;
        let (client, client_id) = join(&mut host, addr, "Bob").await;

        send(&client, Message::disconnect("bye").with_sender(Some(&client_id)), addr).await;
        timeout(Duration::from_secs(1), async {
            while host.is_room_full().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_ok!(host.stop(false).await);
        assert_ok!(host.start("Room").await);

        assert!(host.poll_events().is_empty());
        assert_ok!(host.stop(false).await);
    }

    #[tokio::test]
    async fn test_bind_failure_stays_idle() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut config = test_config();
        config.game_port = taken.local_addr().unwrap().port();

        let mut host = GameHost::new(config).unwrap();
        assert!(matches!(host.start("Room").await, Err(NetError::Transport(_))));
        assert_eq!(host.state(), HostState::Idle);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.target_sync_hz = 0;
        assert!(matches!(GameHost::new(config), Err(NetError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_join_accepted() {
        let (mut host, addr) = started_host(test_config()).await;
        assert_eq!(host.player_count().await, 1);

        let (_client, client_id) = join(&mut host, addr, "Bob").await;

        assert!(client_id.starts_with("client_"));
        assert_eq!(host.client_id().await, Some(client_id));
        assert_eq!(host.player_count().await, 2);
        assert!(host.is_room_full().await);
        assert_eq!(host.connected_players().await, vec!["Player".to_string(), "Bob".to_string()]);

        host.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_join_rejected() {
        let (mut host, addr) = started_host(test_config()).await;
        let (_first, first_id) = join(&mut host, addr, "X").await;

        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(&second, Message::join_request("Y"), addr).await;

        match recv(&second).await.payload {
            Payload::JoinResponse {
                success,
                client_id,
                reason,
            } => {
                assert!(!success);
                assert!(client_id.is_none());
                assert_eq!(reason.as_deref(), Some(ROOM_FULL_REASON));
            }
            other => panic!("unexpected response {:?}", other),
        }

        assert_eq!(host.client_id().await, Some(first_id));
        assert!(host.poll_events().is_empty());

        host.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_input_updates_held_keys() {
        let (mut host, addr) = started_host(test_config()).await;
        let (client, client_id) = join(&mut host, addr, "X").await;

        let input = Message::player_input(keys(&["W", "SPACE"]), vec![], None)
            .with_sender(Some(&client_id));
        send(&client, input, addr).await;

        match next_event(&mut host).await {
            HostEvent::InputReceived {
                client_id: id,
                pressed,
                released,
            } => {
                assert_eq!(id, client_id);
                assert_eq!(pressed, keys(&["W", "SPACE"]));
                assert!(released.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }

        let held = host.get_client_input().await;
        assert!(held.contains("W") && held.contains("SPACE"));

        let input = Message::player_input(vec![], keys(&["W"]), None).with_sender(Some(&client_id));
        send(&client, input, addr).await;
        next_event(&mut host).await;

        assert_eq!(host.get_client_input().await, HashSet::from(["SPACE".to_string()]));

        host.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_input_from_wrong_sender_is_ignored() {
        let (mut host, addr) = started_host(test_config()).await;
        let (client, _client_id) = join(&mut host, addr, "X").await;

        let forged = Message::player_input(keys(&["W"]), vec![], None)
            .with_sender(Some("client_00000000"));
        send(&client, forged, addr).await;
        let anonymous = Message::player_input(keys(&["A"]), vec![], None);
        send(&client, anonymous, addr).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(host.get_client_input().await.is_empty());
        assert!(host.poll_events().is_empty());

        host.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_held_keys_resync() {
        let (mut host, addr) = started_host(test_config()).await;
        let (client, client_id) = join(&mut host, addr, "X").await;

        send(
            &client,
            Message::player_input(keys(&["W", "A"]), vec![], None).with_sender(Some(&client_id)),
            addr,
        )
        .await;
        next_event(&mut host).await;

        // The release of A was lost; the resync carries the truth
        send(
            &client,
            Message::player_input(vec![], vec![], Some(keys(&["W", "D"])))
                .with_sender(Some(&client_id)),
            addr,
        )
        .await;

        match next_event(&mut host).await {
            HostEvent::InputReceived {
                pressed, released, ..
            } => {
                assert_eq!(pressed, keys(&["D"]));
                assert_eq!(released, keys(&["A"]));
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(
            host.get_client_input().await,
            HashSet::from(["W".to_string(), "D".to_string()])
        );

        host.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_client_disconnect() {
        let (mut host, addr) = started_host(test_config()).await;
        let (client, client_id) = join(&mut host, addr, "X").await;

        send(
            &client,
            Message::disconnect("user_disconnect").with_sender(Some(&client_id)),
            addr,
        )
        .await;

        match next_event(&mut host).await {
            HostEvent::ClientLeft { client_id: id, reason, .. } => {
                assert_eq!(id, client_id);
                assert_eq!(reason, LeaveReason::ClientDisconnect);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(!host.is_room_full().await);
        assert_eq!(host.player_count().await, 1);
        host.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let mut config = test_config();
        config.session_timeout = Duration::from_millis(150);
        let (mut host, addr) = started_host(config).await;
        let (_client, client_id) = join(&mut host, addr, "X").await;

        match next_event(&mut host).await {
            HostEvent::ClientLeft { client_id: id, reason, .. } => {
                assert_eq!(id, client_id);
                assert_eq!(reason, LeaveReason::Timeout);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(host.client_id().await.is_none());
        assert!(host.get_client_input().await.is_empty());
        host.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_session_alive() {
        let mut config = test_config();
        config.session_timeout = Duration::from_millis(200);
        let (mut host, addr) = started_host(config).await;
        let (client, client_id) = join(&mut host, addr, "X").await;

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            send(&client, Message::heartbeat().with_sender(Some(&client_id)), addr).await;
        }

        assert!(host.is_room_full().await);
        assert!(host.poll_events().is_empty());
        host.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_refused_while_client_connected() {
        let (mut host, addr) = started_host(test_config()).await;
        let (client, _) = join(&mut host, addr, "X").await;

        assert_err!(host.stop(false).await);
        assert!(matches!(host.stop(false).await, Err(NetError::SessionActive)));
        assert_eq!(host.state(), HostState::Hosting);

        host.stop(true).await.unwrap();
        assert_eq!(host.state(), HostState::Stopped);

        match recv(&client).await.payload {
            Payload::Disconnect { reason } => assert_eq!(reason, HOST_SHUTDOWN_REASON),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_state_without_client_is_noop() {
        let (mut host, _addr) = started_host(test_config()).await;

        let snapshot = GameStateSnapshot::new();
        assert!(!host.send_state(&snapshot).await.unwrap());

        host.stop(false).await.unwrap();
        assert!(!host.send_state(&snapshot).await.unwrap());
    }

    #[tokio::test]
    async fn test_send_state_is_rate_limited() {
        let mut config = test_config();
        config.target_sync_hz = 1;
        let (mut host, addr) = started_host(config).await;
        let (client, _) = join(&mut host, addr, "X").await;

        let mut snapshot = GameStateSnapshot::new();
        snapshot.push_vehicle(VehicleState::new("host", 100.04, 200.0, 0.0, 100));

        assert!(host.send_state(&snapshot).await.unwrap());
        assert!(!host.send_state(&snapshot).await.unwrap());

        match recv(&client).await.payload {
            Payload::StateSnapshot(received) => {
                assert_eq!(received.sequence, 1);
                assert_approx_eq!(received.vehicles[0].x, 100.0);
            }
            other => panic!("unexpected message {:?}", other),
        }

        host.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_map_and_session_messages() {
        let (mut host, addr) = started_host(test_config()).await;
        let (client, _) = join(&mut host, addr, "X").await;

        let layout = vec![Wall::new(100.0, 100.0, 20.0, 200.0)];
        assert!(host.send_map(&layout).await.unwrap());

        let message = recv(&client).await;
        assert_eq!(message.sender_id.as_deref(), Some(HOST_PLAYER_ID));
        match message.payload {
            Payload::MapSync(map) => assert_eq!(map.open().unwrap(), layout),
            other => panic!("unexpected message {:?}", other),
        }

        assert!(host
            .start_session(SessionStart {
                round: 1,
                ..Default::default()
            })
            .await
            .unwrap());
        assert!(matches!(recv(&client).await.payload, Payload::SessionStart(_)));

        assert!(host
            .end_session(SessionEnd {
                reason: "round_over".into(),
                ..Default::default()
            })
            .await
            .unwrap());
        assert!(matches!(recv(&client).await.payload, Payload::SessionEnd(_)));

        host.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_datagrams_are_dropped() {
        let (mut host, addr) = started_host(test_config()).await;

        let stray = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        stray.send_to(b"\x00\x01garbage", addr).await.unwrap();

        // Host keeps serving after the bad datagram
        let (_client, _) = join(&mut host, addr, "X").await;
        host.stop(true).await.unwrap();
    }
}
