//! LAN room discovery
//!
//! A hosting peer runs a [`RoomAdvertiser`] that broadcasts a `RoomAdvertise`
//! message every `discovery_interval`. A browsing peer runs a [`RoomListener`]
//! bound to the discovery port; it keeps a [`RoomTable`] of advertisements,
//! drops the ones not refreshed within `discovery_expiry` and publishes the
//! current list through a `watch` channel.
//!
//! Discovery is best effort: malformed datagrams are dropped without
//! surfacing an error.

use crate::config::{NetConfig, MAX_PLAYERS, MODE_TAG};
use crate::error::NetError;
use crate::protocol::{self, Message, Payload, RoomInfo};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A room seen on the network
#[derive(Debug, Clone)]
pub struct RoomAdvertisement {
    pub room_name: String,
    pub host_name: String,
    /// Advertiser's IP combined with the advertised game port
    pub host_address: SocketAddr,
    pub player_count: u8,
    pub max_players: u8,
    pub mode_tag: String,
    pub last_seen: Instant,
}

impl RoomAdvertisement {
    pub fn is_expired(&self, now: Instant, expiry: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > expiry
    }

    pub fn is_full(&self) -> bool {
        self.player_count >= self.max_players
    }
}

impl fmt::Display for RoomAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) - {}/{}",
            self.room_name, self.host_name, self.player_count, self.max_players
        )
    }
}

/// Advertisements keyed by host address, with expiry
pub struct RoomTable {
    rooms: HashMap<SocketAddr, RoomAdvertisement>,
    expiry: Duration,
}

impl RoomTable {
    pub fn new(expiry: Duration) -> Self {
        Self {
            rooms: HashMap::new(),
            expiry,
        }
    }

    /// Inserts a new room or refreshes a known one. Returns true for a new room.
    pub fn observe(&mut self, info: RoomInfo, source: IpAddr, now: Instant) -> bool {
        let host_address = SocketAddr::new(source, info.game_port);

        if let Some(room) = self.rooms.get_mut(&host_address) {
            room.last_seen = room.last_seen.max(now);
            room.player_count = info.player_count;
            return false;
        }

        let room = RoomAdvertisement {
            room_name: info.room_name,
            host_name: info.host_name,
            host_address,
            player_count: info.player_count,
            max_players: info.max_players,
            mode_tag: info.mode_tag,
            last_seen: now,
        };
        info!("Discovered room {} at {}", room, host_address);
        self.rooms.insert(host_address, room);
        true
    }

    /// Drops expired rooms and returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.rooms.len();
        let expiry = self.expiry;
        self.rooms.retain(|addr, room| {
            let keep = !room.is_expired(now, expiry);
            if !keep {
                debug!("Room {} at {} expired", room.room_name, addr);
            }
            keep
        });
        before - self.rooms.len()
    }

    pub fn rooms(&self) -> Vec<RoomAdvertisement> {
        let mut rooms: Vec<RoomAdvertisement> = self.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| {
            a.room_name
                .cmp(&b.room_name)
                .then(a.host_address.cmp(&b.host_address))
        });
        rooms
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

/// Periodically broadcasts this host's room
pub struct RoomAdvertiser {
    player_count: Arc<AtomicU8>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RoomAdvertiser {
    pub async fn start(
        config: &NetConfig,
        room_name: &str,
        game_port: u16,
    ) -> Result<Self, NetError> {
        let bind_addr = match config.broadcast_address {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;

        let player_count = Arc::new(AtomicU8::new(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let info = RoomInfo {
            room_name: room_name.to_string(),
            host_name: config.display_name.clone(),
            player_count: 1,
            max_players: MAX_PLAYERS,
            mode_tag: MODE_TAG.to_string(),
            game_port,
        };

        let task = tokio::spawn(Self::run(
            socket,
            info,
            config.broadcast_target(),
            config.discovery_interval,
            Arc::clone(&player_count),
            shutdown_rx,
        ));

        info!(
            "Advertising room '{}' on {} (game port {})",
            room_name,
            config.broadcast_target(),
            game_port
        );

        Ok(Self {
            player_count,
            shutdown,
            task: Some(task),
        })
    }

    async fn run(
        socket: UdpSocket,
        mut info: RoomInfo,
        target: SocketAddr,
        period: Duration,
        player_count: Arc<AtomicU8>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info.player_count = player_count.load(Ordering::Relaxed);
                    let message = Message::room_advertise(info.clone());
                    match protocol::encode(&message) {
                        Ok(bytes) => {
                            if let Err(e) = socket.send_to(&bytes, target).await {
                                warn!("Room advertisement to {} failed: {}", target, e);
                            }
                        }
                        Err(e) => error!("Cannot encode room advertisement: {}", e),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("Room advertiser stopped");
    }

    pub fn set_player_count(&self, count: u8) {
        self.player_count.store(count, Ordering::Relaxed);
    }

    pub fn player_count(&self) -> u8 {
        self.player_count.load(Ordering::Relaxed)
    }

    /// Shared occupancy cell, for tasks that update the count without owning the advertiser.
    pub fn occupancy(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.player_count)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops broadcasting and waits for the task to release its socket.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);

        if let Some(task) = self.task.take() {
            if timeout(JOIN_TIMEOUT, task).await.is_err() {
                warn!("Room advertiser did not stop within {:?}", JOIN_TIMEOUT);
            }
            info!("Room advertising stopped");
        }
    }
}

impl Drop for RoomAdvertiser {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Collects advertisements broadcast on the discovery port
pub struct RoomListener {
    table: Arc<RwLock<RoomTable>>,
    running: Arc<AtomicBool>,
    updates: watch::Receiver<Vec<RoomAdvertisement>>,
    local_addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl RoomListener {
    /// Binds the discovery port. Fails synchronously if the port is taken.
    pub async fn start(config: &NetConfig) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(config.discovery_addr()).await?;
        let local_addr = socket.local_addr()?;

        let table = Arc::new(RwLock::new(RoomTable::new(config.discovery_expiry)));
        let running = Arc::new(AtomicBool::new(true));
        let (updates_tx, updates) = watch::channel(Vec::new());

        let task = tokio::spawn(Self::run(
            socket,
            Arc::clone(&table),
            Arc::clone(&running),
            updates_tx,
            config.discovery_poll_interval,
        ));

        info!("Searching for rooms on {}", local_addr);

        Ok(Self {
            table,
            running,
            updates,
            local_addr,
            task: Some(task),
        })
    }

    async fn run(
        socket: UdpSocket,
        table: Arc<RwLock<RoomTable>>,
        running: Arc<AtomicBool>,
        updates: watch::Sender<Vec<RoomAdvertisement>>,
        poll: Duration,
    ) {
        let mut buffer = [0u8; protocol::MAX_DATAGRAM_SIZE];

        while running.load(Ordering::Acquire) {
            match timeout(poll, socket.recv_from(&mut buffer)).await {
                Ok(Ok((len, addr))) => {
                    Self::handle_datagram(&table, &buffer[..len], addr).await;
                }
                Ok(Err(e)) => {
                    error!("Error receiving discovery packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(_) => {}
            }

            let rooms = {
                let mut table = table.write().await;
                table.prune(Instant::now());
                table.rooms()
            };

            updates.send_if_modified(|current| {
                if same_listing(current, &rooms) {
                    false
                } else {
                    *current = rooms;
                    true
                }
            });
        }

        debug!("Room listener stopped");
    }

    async fn handle_datagram(table: &RwLock<RoomTable>, data: &[u8], addr: SocketAddr) {
        let message = match protocol::decode(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring discovery datagram from {}: {}", addr, e);
                return;
            }
        };

        match message.payload {
            Payload::RoomAdvertise(info) => {
                table.write().await.observe(info, addr.ip(), Instant::now());
            }
            other => debug!("Ignoring {} on discovery port from {}", other.kind(), addr),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receiver that observes every change of the room list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<RoomAdvertisement>> {
        self.updates.clone()
    }

    pub async fn get_discovered_rooms(&self) -> Vec<RoomAdvertisement> {
        let mut table = self.table.write().await;
        table.prune(Instant::now());
        table.rooms()
    }

    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        if let Some(task) = self.task.take() {
            if timeout(JOIN_TIMEOUT, task).await.is_err() {
                warn!("Room listener did not stop within {:?}", JOIN_TIMEOUT);
            }
        }

        self.table.write().await.clear();
        info!("Room search stopped");
    }
}

impl Drop for RoomListener {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

fn same_listing(a: &[RoomAdvertisement], b: &[RoomAdvertisement]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.host_address == y.host_address
                && x.player_count == y.player_count
                && x.room_name == y.room_name
        })
}
