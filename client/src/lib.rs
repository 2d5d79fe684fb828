//! # Tank Client Library
//!
//! The joining side of a two-player LAN session. The client does not simulate
//! the match: it sends key transitions to the host and renders a reconciled
//! copy of the host's state.
//!
//! ## Architecture Overview
//!
//! ### Host Authority
//! Every snapshot from the host overwrites the local world. Vehicles are
//! addressed by slot, projectiles by host-assigned id, so a lost or late
//! snapshot is simply replaced by the next one.
//!
//! ### Network Context vs. Game Context
//! One network task per connection owns the socket. It never touches game or
//! render state; it hands the newest snapshot over through a `watch` slot and
//! lifecycle changes through a bounded event queue that the game loop drains
//! once per frame.
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! Key edge detection and batching:
//! - Repeated presses and releases are filtered out
//! - Changes are flushed as one message per network tick
//! - The network task wakes as soon as a change is queued
//!
//! ### Network Module (`network`)
//! Join handshake, heartbeats, held-key resync, stale snapshot rejection and
//! map verification.
//!
//! ### Reconcile Module (`reconcile`)
//! Applies snapshots to a [`reconcile::ClientWorld`] and reports which
//! projectiles appeared or vanished.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{ClientEvent, GameClient};
//! use client::reconcile::ClientWorld;
//! use shared::NetConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = GameClient::new(NetConfig::default())?;
//!     client.connect("192.168.1.20:12346".parse()?, "Bob").await?;
//!
//!     let mut world = ClientWorld::new();
//!     client.press("W");
//!
//!     loop {
//!         for event in client.poll_events() {
//!             if let ClientEvent::Disconnected { reason } = event {
//!                 println!("Disconnected: {}", reason);
//!                 return Ok(());
//!             }
//!         }
//!
//!         if let Some(snapshot) = client.take_snapshot() {
//!             world.apply_snapshot(&snapshot);
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(16)).await;
//!     }
//! }
//! ```

pub mod input;
pub mod network;
pub mod reconcile;
