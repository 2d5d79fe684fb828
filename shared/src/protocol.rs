//! Wire message envelope and codec
//!
//! One [`Message`] travels per UDP datagram. The payload enum doubles as the
//! message kind, so handlers match on it exhaustively instead of comparing
//! string tags. Encoding is bincode with a hard size limit of
//! [`MAX_DATAGRAM_SIZE`].

use crate::error::NetError;
use crate::map_sync::MapPayload;
use crate::snapshot::GameStateSnapshot;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PROTOCOL_MAGIC: u32 = 0x54414E4B;
pub const PROTOCOL_VERSION: u16 = 1;
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Flat tag of every recognized message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    RoomAdvertise,
    JoinRequest,
    JoinResponse,
    Heartbeat,
    Disconnect,
    PlayerInput,
    StateSnapshot,
    SessionStart,
    SessionEnd,
    MapSync,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::RoomAdvertise => "room_advertise",
            MessageKind::JoinRequest => "join_request",
            MessageKind::JoinResponse => "join_response",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Disconnect => "disconnect",
            MessageKind::PlayerInput => "player_input",
            MessageKind::StateSnapshot => "state_snapshot",
            MessageKind::SessionStart => "session_start",
            MessageKind::SessionEnd => "session_end",
            MessageKind::MapSync => "map_sync",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of a room advertisement broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_name: String,
    pub host_name: String,
    pub player_count: u8,
    pub max_players: u8,
    pub mode_tag: String,
    /// Unicast port the host accepts joins on
    pub game_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStart {
    pub round: u32,
    pub map: Option<MapPayload>,
    /// player id -> tank skin chosen before the round
    pub skins: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub reason: String,
    pub winner: Option<String>,
    pub scores: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    RoomAdvertise(RoomInfo),
    JoinRequest {
        player_name: String,
    },
    JoinResponse {
        success: bool,
        client_id: Option<String>,
        reason: Option<String>,
    },
    Heartbeat,
    Disconnect {
        reason: String,
    },
    /// Key deltas since the previous flush; `held` is a periodic full resync
    PlayerInput {
        pressed: Vec<String>,
        released: Vec<String>,
        held: Option<Vec<String>>,
    },
    StateSnapshot(GameStateSnapshot),
    SessionStart(SessionStart),
    SessionEnd(SessionEnd),
    MapSync(MapPayload),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::RoomAdvertise(_) => MessageKind::RoomAdvertise,
            Payload::JoinRequest { .. } => MessageKind::JoinRequest,
            Payload::JoinResponse { .. } => MessageKind::JoinResponse,
            Payload::Heartbeat => MessageKind::Heartbeat,
            Payload::Disconnect { .. } => MessageKind::Disconnect,
            Payload::PlayerInput { .. } => MessageKind::PlayerInput,
            Payload::StateSnapshot(_) => MessageKind::StateSnapshot,
            Payload::SessionStart(_) => MessageKind::SessionStart,
            Payload::SessionEnd(_) => MessageKind::SessionEnd,
            Payload::MapSync(_) => MessageKind::MapSync,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub payload: Payload,
    pub sender_id: Option<String>,
    /// Seconds since the Unix epoch at construction
    pub sent_at: f64,
}

impl Message {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            sender_id: None,
            sent_at: now_secs(),
        }
    }

    pub fn with_sender(mut self, sender_id: Option<&str>) -> Self {
        self.sender_id = sender_id.map(str::to_string);
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn room_advertise(info: RoomInfo) -> Self {
        Self::new(Payload::RoomAdvertise(info))
    }

    pub fn join_request(player_name: &str) -> Self {
        Self::new(Payload::JoinRequest {
            player_name: player_name.to_string(),
        })
    }

    pub fn join_accepted(client_id: &str) -> Self {
        Self::new(Payload::JoinResponse {
            success: true,
            client_id: Some(client_id.to_string()),
            reason: None,
        })
    }

    pub fn join_rejected(reason: &str) -> Self {
        Self::new(Payload::JoinResponse {
            success: false,
            client_id: None,
            reason: Some(reason.to_string()),
        })
    }

    pub fn heartbeat() -> Self {
        Self::new(Payload::Heartbeat)
    }

    pub fn disconnect(reason: &str) -> Self {
        Self::new(Payload::Disconnect {
            reason: reason.to_string(),
        })
    }

    pub fn player_input(
        pressed: Vec<String>,
        released: Vec<String>,
        held: Option<Vec<String>>,
    ) -> Self {
        Self::new(Payload::PlayerInput {
            pressed,
            released,
            held,
        })
    }

    pub fn state_snapshot(snapshot: GameStateSnapshot) -> Self {
        Self::new(Payload::StateSnapshot(snapshot))
    }

    pub fn session_start(start: SessionStart) -> Self {
        Self::new(Payload::SessionStart(start))
    }

    pub fn session_end(end: SessionEnd) -> Self {
        Self::new(Payload::SessionEnd(end))
    }

    pub fn map_sync(map: MapPayload) -> Self {
        Self::new(Payload::MapSync(map))
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    magic: u32,
    version: u16,
    message: &'a Message,
}

#[derive(Deserialize)]
struct Envelope {
    magic: u32,
    version: u16,
    message: Message,
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_DATAGRAM_SIZE as u64)
}

pub fn encode(message: &Message) -> Result<Vec<u8>, NetError> {
    let envelope = EnvelopeRef {
        magic: PROTOCOL_MAGIC,
        version: PROTOCOL_VERSION,
        message,
    };

    let size = bincode::DefaultOptions::new()
        .serialized_size(&envelope)
        .map_err(|e| NetError::Protocol(format!("cannot size message: {}", e)))?
        as usize;
    if size > MAX_DATAGRAM_SIZE {
        return Err(NetError::PayloadTooLarge {
            size,
            limit: MAX_DATAGRAM_SIZE,
        });
    }

    wire_options()
        .serialize(&envelope)
        .map_err(|e| NetError::Protocol(format!("cannot encode {}: {}", message.kind(), e)))
}

pub fn decode(bytes: &[u8]) -> Result<Message, NetError> {
    let envelope: Envelope = wire_options()
        .deserialize(bytes)
        .map_err(|e| NetError::Protocol(format!("malformed envelope: {}", e)))?;

    if envelope.magic != PROTOCOL_MAGIC {
        return Err(NetError::Protocol(format!(
            "bad magic {:#010x}",
            envelope.magic
        )));
    }

    if envelope.version != PROTOCOL_VERSION {
        return Err(NetError::Protocol(format!(
            "unsupported protocol version {}",
            envelope.version
        )));
    }

    Ok(envelope.message)
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_sync::Wall;
    use crate::snapshot::{ProjectileState, VehicleState};

    fn sample_snapshot() -> GameStateSnapshot {
        let mut snapshot = GameStateSnapshot::new();
        snapshot.sequence = 17;
        snapshot.push_vehicle(VehicleState::new("host", 100.0, 200.0, 45.0, 5));
        snapshot.push_vehicle(VehicleState::new("client_0badf00d", 300.0, 400.0, 180.0, 3));
        snapshot.insert_projectile(ProjectileState::new(4, "host", 150.0, 250.0, 45.0));
        snapshot.meta.scores.insert("host".to_string(), 1);
        snapshot.meta.round.result_text = "Host wins".to_string();
        snapshot
    }

    fn all_messages() -> Vec<Message> {
        let map = MapPayload::seal(&[Wall::new(10.0, 10.0, 4.0, 4.0)]).unwrap();
        vec![
            Message::room_advertise(RoomInfo {
                room_name: "Room".to_string(),
                host_name: "Alice".to_string(),
                player_count: 1,
                max_players: 2,
                mode_tag: "1v1".to_string(),
                game_port: 12346,
            }),
            Message::join_request("X"),
            Message::join_accepted("client_1234abcd"),
            Message::join_rejected("room_full"),
            Message::heartbeat().with_sender(Some("client_1234abcd")),
            Message::disconnect("user_disconnect"),
            Message::player_input(vec!["W".into(), "SPACE".into()], vec!["A".into()], None)
                .with_sender(Some("client_1234abcd")),
            Message::player_input(vec![], vec![], Some(vec!["D".into()])),
            Message::state_snapshot(sample_snapshot()),
            Message::session_start(SessionStart {
                round: 2,
                map: Some(map.clone()),
                skins: BTreeMap::from([("host".to_string(), "green".to_string())]),
            }),
            Message::session_end(SessionEnd {
                reason: "match_over".to_string(),
                winner: Some("host".to_string()),
                scores: BTreeMap::from([("host".to_string(), 3)]),
            }),
            Message::map_sync(map),
        ]
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        for message in all_messages() {
            let bytes = encode(&message).unwrap();
            let decoded = decode(&bytes).unwrap();

            assert_eq!(decoded.kind(), message.kind());
            assert_eq!(decoded.payload, message.payload);
            assert_eq!(decoded.sender_id, message.sender_id);
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_every_kind_has_a_distinct_tag() {
        let tags: std::collections::HashSet<&str> =
            all_messages().iter().map(|m| m.kind().as_str()).collect();
        assert_eq!(tags.len(), 10);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        #[derive(Serialize)]
        struct ForeignEnvelope {
            magic: u32,
            version: u16,
            kind: u32,
        }

        let bytes = wire_options()
            .serialize(&ForeignEnvelope {
                magic: PROTOCOL_MAGIC,
                version: PROTOCOL_VERSION,
                kind: 99,
            })
            .unwrap();

        assert!(matches!(decode(&bytes), Err(NetError::Protocol(_))));
    }

    #[test]
    fn test_wrong_magic_and_version_are_rejected() {
        let message = Message::heartbeat();

        let bytes = wire_options()
            .serialize(&EnvelopeRef {
                magic: 0xDEADBEEF,
                version: PROTOCOL_VERSION,
                message: &message,
            })
            .unwrap();
        assert!(matches!(decode(&bytes), Err(NetError::Protocol(_))));

        let bytes = wire_options()
            .serialize(&EnvelopeRef {
                magic: PROTOCOL_MAGIC,
                version: PROTOCOL_VERSION + 1,
                message: &message,
            })
            .unwrap();
        assert!(matches!(decode(&bytes), Err(NetError::Protocol(_))));
    }

    #[test]
    fn test_garbage_and_truncation_are_rejected() {
        assert!(decode(&[]).is_err());
        assert!(decode(b"{\"type\": \"heartbeat\"}").is_err());

        let bytes = encode(&Message::join_request("Player")).unwrap();
        assert!(decode(&bytes[..bytes.len() - 2]).is_err());

        let mut padded = bytes.clone();
        padded.extend_from_slice(&[0, 1, 2]);
        assert!(decode(&padded).is_err());
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let mut snapshot = GameStateSnapshot::new();
        for id in 0..1000 {
            snapshot.insert_projectile(ProjectileState::new(id, "host", 1.0, 2.0, 3.0));
        }

        match encode(&Message::state_snapshot(snapshot)) {
            Err(NetError::PayloadTooLarge { size, limit }) => {
                assert!(size > limit);
                assert_eq!(limit, MAX_DATAGRAM_SIZE);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_typical_snapshot_fits_comfortably() {
        let bytes = encode(&Message::state_snapshot(sample_snapshot())).unwrap();
        assert!(bytes.len() < 512, "snapshot took {} bytes", bytes.len());
    }
}
