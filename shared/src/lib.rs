//! # Shared Netplay Library
//!
//! Types and components used by both sides of a two-player LAN session: the
//! wire protocol, configuration, the error taxonomy, the state snapshot
//! model, the map checksum contract and room discovery.
//!
//! ## Module Organization
//!
//! ### Protocol Module (`protocol`)
//! The message envelope and its bincode codec. Every datagram carries exactly
//! one [`protocol::Message`]; its payload enum is the message kind.
//!
//! ### Snapshot Module (`snapshot`)
//! The host-authoritative state description: vehicles matched by slot,
//! projectiles matched by host-assigned id, plus scores and round info.
//!
//! ### Map Sync Module (`map_sync`)
//! Wall layouts sealed with a SHA-256 checksum that the receiver recomputes
//! before trusting the payload.
//!
//! ### Discovery Module (`discovery`)
//! UDP broadcast advertisement of an open room and the listener that collects
//! advertisements with expiry.
//!
//! ### Config and Error Modules (`config`, `error`)
//! [`config::NetConfig`] is passed explicitly to every manager.
//! [`error::NetError`] classifies protocol, capacity, timeout, transport and
//! integrity failures.

pub mod config;
pub mod discovery;
pub mod error;
pub mod map_sync;
pub mod protocol;
pub mod snapshot;

pub use config::NetConfig;
pub use error::NetError;
pub use protocol::{Message, MessageKind, Payload};
pub use snapshot::{GameStateSnapshot, ProjectileState, VehicleState};
