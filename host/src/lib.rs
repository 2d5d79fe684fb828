//! # Tank Host Library
//!
//! The hosting side of a two-player LAN session. The host's simulation is the
//! only source of truth: it admits a single client, applies that client's key
//! input to the remote tank and streams state snapshots back.
//!
//! ## Core Responsibilities
//!
//! ### Room Lifecycle
//! [`network::GameHost`] binds the game socket, advertises the room on the
//! discovery port and runs one network task until stopped. A host with a
//! connected client refuses to stop unless forced, and a forced stop tells
//! the client why.
//!
//! ### Client Management
//! Capacity is exactly one client:
//! - Join admission with `room_full` rejection
//! - Heartbeat tracking and timeout eviction
//! - Held-key bookkeeping with periodic resync
//!
//! ### State Broadcasting
//! Snapshots are pushed every frame but leave the host at most
//! `target_sync_hz` times per second, quantized and sequenced.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! The single-slot registry of the connected client.
//!
//! ### Sync Module (`sync`)
//! Rate limiting, snapshot preparation and projectile id allocation.
//!
//! ### Network Module (`network`)
//! Socket ownership, the receive loop and the event queue to the game loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use host::network::{GameHost, HostEvent};
//! use shared::{GameStateSnapshot, NetConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut host = GameHost::new(NetConfig::default())?;
//!     host.start("Alice's room").await?;
//!
//!     loop {
//!         for event in host.poll_events() {
//!             if let HostEvent::ClientJoined { player_name, .. } = event {
//!                 println!("{} joined", player_name);
//!             }
//!         }
//!
//!         let snapshot = GameStateSnapshot::new();
//!         host.send_state(&snapshot).await?;
//!         tokio::time::sleep(std::time::Duration::from_millis(16)).await;
//!     }
//! }
//! ```

pub mod network;
pub mod session;
pub mod sync;
