//! Runtime configuration passed explicitly to every manager

use crate::error::NetError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DISCOVERY_PORT: u16 = 12345;
/// The game port sits one above the discovery port unless overridden.
pub const GAME_PORT: u16 = DISCOVERY_PORT + 1;
pub const MAX_PLAYERS: u8 = 2;
pub const MODE_TAG: &str = "1v1";

/// Settings shared by the host, client and discovery components
///
/// Each manager takes its own copy at construction; nothing here is global.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub room_name: String,
    pub display_name: String,
    pub discovery_port: u16,
    pub game_port: u16,
    /// Local address the host and listener sockets bind to
    pub bind_address: IpAddr,
    /// Destination of room advertisements
    pub broadcast_address: IpAddr,
    pub target_sync_hz: u32,
    pub heartbeat_interval: Duration,
    pub session_timeout: Duration,
    pub discovery_interval: Duration,
    pub discovery_expiry: Duration,
    /// Receive timeout of the host and client network loops
    pub poll_interval: Duration,
    /// Receive timeout of the discovery listener loop
    pub discovery_poll_interval: Duration,
    pub connect_timeout: Duration,
    pub event_queue_capacity: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            room_name: "Tank Room".to_string(),
            display_name: "Player".to_string(),
            discovery_port: DISCOVERY_PORT,
            game_port: GAME_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            target_sync_hz: 30,
            heartbeat_interval: Duration::from_secs(5),
            session_timeout: Duration::from_secs(3),
            discovery_interval: Duration::from_secs(2),
            discovery_expiry: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            discovery_poll_interval: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(5),
            event_queue_capacity: 256,
        }
    }
}

impl NetConfig {
    /// Moves discovery to `port` and the game port to the slot right above it.
    pub fn with_discovery_port(mut self, port: u16) -> Self {
        self.discovery_port = port;
        self.game_port = port.wrapping_add(1);
        self
    }

    pub fn game_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.game_port)
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.discovery_port)
    }

    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_address, self.discovery_port)
    }

    /// Heartbeat cadence actually used by the client: never slower than a
    /// third of the host's session timeout.
    pub fn effective_heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval.min(self.session_timeout / 3)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_sync_hz.max(1) as f64)
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.target_sync_hz == 0 {
            return Err(NetError::InvalidConfig("target_sync_hz must be > 0".into()));
        }

        let intervals = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("session_timeout", self.session_timeout),
            ("discovery_interval", self.discovery_interval),
            ("discovery_expiry", self.discovery_expiry),
            ("poll_interval", self.poll_interval),
            ("discovery_poll_interval", self.discovery_poll_interval),
            ("connect_timeout", self.connect_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(NetError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }

        if self.event_queue_capacity == 0 {
            return Err(NetError::InvalidConfig(
                "event_queue_capacity must be > 0".into(),
            ));
        }

        Ok(())
    }
}
