//! Host-side record of the single connected client
//!
//! This module handles the server-side bookkeeping for the one client a
//! two-player room can hold:
//! - Join admission with a capacity of exactly one
//! - Heartbeat tracking and timeout eviction
//! - The set of keys the client currently holds down
//!
//! All mutation happens from the host network task; the game loop only reads
//! through [`crate::network::GameHost`].

use log::info;
use shared::NetError;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// The connected client and its input state
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Identifier issued by the host in the join response
    pub client_id: String,
    /// Network address for sending responses
    pub addr: SocketAddr,
    pub player_name: String,
    /// Last time a heartbeat, input or other owned message arrived
    pub last_heartbeat: Instant,
    pub connected: bool,
    /// Keys currently held down by the remote player
    pub pressed_keys: HashSet<String>,
}

/// Effective change of the held key set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputDelta {
    pub pressed: Vec<String>,
    pub released: Vec<String>,
}

impl InputDelta {
    pub fn is_empty(&self) -> bool {
        self.pressed.is_empty() && self.released.is_empty()
    }
}

impl ClientSession {
    pub fn new(client_id: String, addr: SocketAddr, player_name: String) -> Self {
        Self {
            client_id,
            addr,
            player_name,
            last_heartbeat: Instant::now(),
            connected: true,
            pressed_keys: HashSet::new(),
        }
    }

    pub fn refresh_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > timeout
    }

    /// Applies pressed keys first, then released keys.
    pub fn apply_input(&mut self, pressed: &[String], released: &[String]) {
        for key in pressed {
            self.pressed_keys.insert(key.clone());
        }
        for key in released {
            self.pressed_keys.remove(key);
        }
    }

    /// Replaces the held set with `held` and reports what changed.
    pub fn resync(&mut self, held: &[String]) -> InputDelta {
        let held: HashSet<String> = held.iter().cloned().collect();

        let mut delta = InputDelta {
            pressed: held.difference(&self.pressed_keys).cloned().collect(),
            released: self.pressed_keys.difference(&held).cloned().collect(),
        };
        delta.pressed.sort();
        delta.released.sort();

        self.pressed_keys = held;
        delta
    }
}

/// Single-slot client registry
#[derive(Debug, Default)]
pub struct SessionRegistry {
    session: Option<ClientSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { session: None }
    }

    pub fn is_full(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.connected)
    }

    /// Admits a new client, or fails with `RoomFull` leaving the current session untouched.
    pub fn try_join(
        &mut self,
        addr: SocketAddr,
        player_name: &str,
    ) -> Result<&ClientSession, NetError> {
        if self.is_full() {
            return Err(NetError::RoomFull);
        }

        let client_id = format!("client_{:08x}", rand::random::<u32>());
        info!(
            "Client {} ({}) joined from {}",
            player_name, client_id, addr
        );

        Ok(self.session.insert(ClientSession::new(
            client_id,
            addr,
            player_name.to_string(),
        )))
    }

    pub fn current(&self) -> Option<&ClientSession> {
        self.session.as_ref().filter(|s| s.connected)
    }

    /// The session owned by `sender_id`, if it is the connected one.
    pub fn owned_by(&mut self, sender_id: Option<&str>) -> Option<&mut ClientSession> {
        let sender_id = sender_id?;
        self.session
            .as_mut()
            .filter(|s| s.connected && s.client_id == sender_id)
    }

    pub fn remove(&mut self) -> Option<ClientSession> {
        let mut session = self.session.take()?;
        session.connected = false;
        info!(
            "Client {} ({}) removed",
            session.player_name, session.client_id
        );
        Some(session)
    }

    /// Evicts the session if its heartbeat lapsed.
    pub fn sweep_timeout(&mut self, now: Instant, timeout: Duration) -> Option<ClientSession> {
        let timed_out = self
            .session
            .as_ref()
            .is_some_and(|s| s.connected && s.is_timed_out(now, timeout));

        if timed_out {
            self.remove()
        } else {
            None
        }
    }

    pub fn client_input(&self) -> HashSet<String> {
        self.current()
            .map(|s| s.pressed_keys.clone())
            .unwrap_or_default()
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.current().map(|s| s.addr)
    }

    pub fn client_id(&self) -> Option<String> {
        self.current().map(|s| s.client_id.clone())
    }

    /// Host plus the client, if one is connected
    pub fn player_count(&self) -> usize {
        1 + usize::from(self.is_full())
    }

    pub fn clear(&mut self) {
        self.session = None;
    }
}
