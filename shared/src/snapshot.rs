//! State snapshot carried host → client every sync tick

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

/// Wire form of a coordinate or angle.
///
/// Values on the one-decimal grid travel as integer tenths, which the varint
/// codec shrinks to one to three bytes. Anything else, non-finite values
/// included, keeps its full `f32` bits.
mod coord {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    // Largest magnitude where every integer is exact in an f32
    const MAX_TENTHS: f32 = 16_777_216.0;

    #[derive(Serialize, Deserialize)]
    enum Coord {
        Tenths(i32),
        Exact(f32),
    }

    fn to_wire(value: f32) -> Coord {
        let tenths = (value * 10.0).round();
        if tenths.abs() <= MAX_TENTHS && tenths / 10.0 == value {
            Coord::Tenths(tenths as i32)
        } else {
            Coord::Exact(value)
        }
    }

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        to_wire(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        Ok(match Coord::deserialize(deserializer)? {
            Coord::Tenths(tenths) => tenths as f32 / 10.0,
            Coord::Exact(value) => value,
        })
    }
}

/// Persistent entity (tank); its slot is its index in `GameStateSnapshot::vehicles`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub player_id: String,
    #[serde(with = "coord")]
    pub x: f32,
    #[serde(with = "coord")]
    pub y: f32,
    #[serde(with = "coord")]
    pub angle: f32,
    pub health: i32,
    /// Sprite identifier the client needs to draw the right tank
    pub skin: Option<String>,
}

impl VehicleState {
    pub fn new(player_id: &str, x: f32, y: f32, angle: f32, health: i32) -> Self {
        Self {
            player_id: player_id.to_string(),
            x,
            y,
            angle,
            health,
            skin: None,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.angle.is_finite()
    }
}

/// Transient entity (bullet), keyed by a host-assigned id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileState {
    pub id: u32,
    pub owner: String,
    #[serde(with = "coord")]
    pub x: f32,
    #[serde(with = "coord")]
    pub y: f32,
    #[serde(with = "coord")]
    pub angle: f32,
}

impl ProjectileState {
    pub fn new(id: u32, owner: &str, x: f32, y: f32, angle: f32) -> Self {
        Self {
            id,
            owner: owner.to_string(),
            x,
            y,
            angle,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.angle.is_finite()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub round_over: bool,
    #[serde(with = "coord")]
    pub round_over_timer: f32,
    pub result_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub scores: BTreeMap<String, u32>,
    pub round: RoundInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStateSnapshot {
    /// Stamped by the host synchronizer; wraps around
    pub sequence: u32,
    pub vehicles: Vec<VehicleState>,
    pub projectiles: BTreeMap<u32, ProjectileState>,
    pub meta: SnapshotMeta,
}

impl GameStateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_vehicle(&mut self, vehicle: VehicleState) {
        self.vehicles.push(vehicle);
    }

    pub fn insert_projectile(&mut self, projectile: ProjectileState) {
        self.projectiles.insert(projectile.id, projectile);
    }

    /// Copy with every coordinate and angle rounded to one decimal place,
    /// which lets the codec send them as compact integer tenths.
    pub fn quantized(&self) -> Self {
        let mut snapshot = self.clone();
        for vehicle in &mut snapshot.vehicles {
            vehicle.x = round1(vehicle.x);
            vehicle.y = round1(vehicle.y);
            vehicle.angle = round1(vehicle.angle);
        }
        for projectile in snapshot.projectiles.values_mut() {
            projectile.x = round1(projectile.x);
            projectile.y = round1(projectile.y);
            projectile.angle = round1(projectile.angle);
        }
        snapshot.meta.round.round_over_timer = round1(snapshot.meta.round.round_over_timer);
        snapshot
    }
}

fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

/// True when `s1` is newer than `s2`, tolerating wrap-around.
#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}
