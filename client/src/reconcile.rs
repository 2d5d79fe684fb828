//! Applies host snapshots to the client's local copy of the world
//!
//! Vehicles are matched by slot: index `i` of the snapshot overwrites local
//! vehicle `i`, and the client never creates vehicles on its own. Projectiles
//! are matched by their host-assigned id and diffed: ids missing locally are
//! created, known ids are moved, ids absent from the snapshot are removed.
//!
//! The world holds plain data only. The returned [`ReconcileReport`] tells the
//! render side which sprites to create or release.

use log::debug;
use shared::snapshot::RoundInfo;
use shared::{GameStateSnapshot, ProjectileState, VehicleState};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    pub player_id: String,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub health: i32,
    pub skin: Option<String>,
}

impl Vehicle {
    pub fn new(player_id: &str, x: f32, y: f32, angle: f32) -> Self {
        Self {
            player_id: player_id.to_string(),
            x,
            y,
            angle,
            health: 100,
            skin: None,
        }
    }

    fn apply(&mut self, state: &VehicleState) {
        self.player_id.clone_from(&state.player_id);
        self.x = state.x;
        self.y = state.y;
        self.angle = state.angle;
        self.health = state.health;
        if let Some(skin) = &state.skin {
            self.skin = Some(skin.clone());
        }
    }
}

impl From<&VehicleState> for Vehicle {
    fn from(state: &VehicleState) -> Self {
        Self {
            player_id: state.player_id.clone(),
            x: state.x,
            y: state.y,
            angle: state.angle,
            health: state.health,
            skin: state.skin.clone(),
        }
    }
}

/// Client-side projectile; drawn only, never simulated
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: u32,
    pub owner: String,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

impl From<&ProjectileState> for Projectile {
    fn from(state: &ProjectileState) -> Self {
        Self {
            id: state.id,
            owner: state.owner.clone(),
            x: state.x,
            y: state.y,
            angle: state.angle,
        }
    }
}

/// Outcome of one snapshot application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Projectile ids that appeared
    pub created: Vec<u32>,
    /// Vehicles and projectiles overwritten in place
    pub updated: usize,
    /// Projectile ids that disappeared
    pub removed: Vec<u32>,
    /// Malformed records and vehicles without a local slot
    pub skipped: usize,
}

impl ReconcileReport {
    /// True when sprites need to be created or released.
    pub fn changes_entities(&self) -> bool {
        !self.created.is_empty() || !self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientWorld {
    vehicles: Vec<Vehicle>,
    projectiles: BTreeMap<u32, Projectile>,
    scores: BTreeMap<String, u32>,
    round: RoundInfo,
}

impl ClientWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Round-start hook: installs the vehicle slots snapshots will address.
    pub fn spawn_vehicles(&mut self, vehicles: impl IntoIterator<Item = Vehicle>) {
        self.vehicles = vehicles.into_iter().collect();
        self.projectiles.clear();
        debug!("Spawned {} vehicles", self.vehicles.len());
    }

    pub fn apply_snapshot(&mut self, snapshot: &GameStateSnapshot) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for (slot, state) in snapshot.vehicles.iter().enumerate() {
            if !state.is_well_formed() {
                debug!("Skipping malformed vehicle in slot {}", slot);
                report.skipped += 1;
                continue;
            }

            match self.vehicles.get_mut(slot) {
                Some(vehicle) => {
                    vehicle.apply(state);
                    report.updated += 1;
                }
                None => {
                    debug!("No local vehicle for slot {}", slot);
                    report.skipped += 1;
                }
            }
        }

        let gone: Vec<u32> = self
            .projectiles
            .keys()
            .filter(|id| !snapshot.projectiles.contains_key(id))
            .copied()
            .collect();
        for id in gone {
            self.projectiles.remove(&id);
            report.removed.push(id);
        }

        for (&id, state) in &snapshot.projectiles {
            if !state.is_well_formed() || state.id != id {
                debug!("Skipping malformed projectile {}", id);
                report.skipped += 1;
                continue;
            }

            match self.projectiles.get_mut(&id) {
                Some(projectile) => {
                    projectile.x = state.x;
                    projectile.y = state.y;
                    projectile.angle = state.angle;
                    report.updated += 1;
                }
                None => {
                    self.projectiles.insert(id, Projectile::from(state));
                    report.created.push(id);
                }
            }
        }

        self.scores.clone_from(&snapshot.meta.scores);
        self.round.clone_from(&snapshot.meta.round);

        report
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn vehicle(&self, slot: usize) -> Option<&Vehicle> {
        self.vehicles.get(slot)
    }

    pub fn projectiles(&self) -> &BTreeMap<u32, Projectile> {
        &self.projectiles
    }

    pub fn projectile(&self, id: u32) -> Option<&Projectile> {
        self.projectiles.get(&id)
    }

    pub fn scores(&self) -> &BTreeMap<String, u32> {
        &self.scores
    }

    pub fn round(&self) -> &RoundInfo {
        &self.round
    }

    pub fn clear(&mut self) {
        self.vehicles.clear();
        self.projectiles.clear();
        self.scores.clear();
        self.round = RoundInfo::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn two_tank_world() -> ClientWorld {
        let mut world = ClientWorld::new();
        world.spawn_vehicles(vec![
            Vehicle::new("host", 0.0, 0.0, 0.0),
            Vehicle::new("client_1", 0.0, 0.0, 0.0),
        ]);
        world
    }

    fn snapshot_with(projectiles: &[(u32, f32)]) -> GameStateSnapshot {
        let mut snapshot = GameStateSnapshot::new();
        snapshot.push_vehicle(VehicleState::new("host", 100.0, 200.0, 45.0, 100));
        snapshot.push_vehicle(VehicleState::new("client_1", 300.0, 400.0, 90.0, 80));
        for &(id, x) in projectiles {
            snapshot.insert_projectile(ProjectileState::new(id, "host", x, 50.0, 0.0));
        }
        snapshot
    }

    #[test]
    fn test_vehicles_overwritten_by_slot() {
        let mut world = two_tank_world();
        let report = world.apply_snapshot(&snapshot_with(&[]));

        assert_eq!(report.updated, 2);
        let client = world.vehicle(1).unwrap();
        assert_approx_eq!(client.x, 300.0);
        assert_approx_eq!(client.y, 400.0);
        assert_approx_eq!(client.angle, 90.0);
        assert_eq!(client.health, 80);
    }

    #[test]
    fn test_out_of_range_slot_is_skipped() {
        let mut world = ClientWorld::new();
        world.spawn_vehicles(vec![Vehicle::new("host", 0.0, 0.0, 0.0)]);

        let report = world.apply_snapshot(&snapshot_with(&[]));

        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(world.vehicles().len(), 1);
    }

    #[test]
    fn test_skin_kept_when_snapshot_has_none() {
        let mut world = two_tank_world();
        let mut snapshot = snapshot_with(&[]);
        snapshot.vehicles[0].skin = Some("green".to_string());
        world.apply_snapshot(&snapshot);

        snapshot.vehicles[0].skin = None;
        world.apply_snapshot(&snapshot);

        assert_eq!(world.vehicle(0).unwrap().skin.as_deref(), Some("green"));
    }

    #[test]
    fn test_projectile_diff() {
        let mut world = two_tank_world();

        let report = world.apply_snapshot(&snapshot_with(&[(1, 10.0), (2, 20.0)]));
        assert_eq!(report.created, vec![1, 2]);
        assert!(report.removed.is_empty());

        let report = world.apply_snapshot(&snapshot_with(&[(2, 25.0), (3, 30.0)]));
        assert_eq!(report.created, vec![3]);
        assert_eq!(report.removed, vec![1]);
        assert_eq!(report.updated, 2 + 1);
        assert_approx_eq!(world.projectile(2).unwrap().x, 25.0);
        assert!(world.projectile(1).is_none());
        assert_eq!(world.projectile(3).unwrap().owner, "host");
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut world = two_tank_world();
        let snapshot = snapshot_with(&[(1, 10.0), (2, 20.0)]);

        world.apply_snapshot(&snapshot);
        let vehicles = world.vehicles().to_vec();
        let projectiles = world.projectiles().clone();

        let report = world.apply_snapshot(&snapshot);

        assert!(!report.changes_entities());
        assert_eq!(world.vehicles(), vehicles.as_slice());
        assert_eq!(world.projectiles(), &projectiles);
    }

    #[test]
    fn test_malformed_records_are_skipped_individually() {
        let mut world = two_tank_world();
        let mut snapshot = snapshot_with(&[(1, 10.0), (2, f32::NAN)]);
        snapshot.vehicles[0].x = f32::INFINITY;

        let report = world.apply_snapshot(&snapshot);

        assert_eq!(report.skipped, 2);
        assert_eq!(report.created, vec![1]);
        assert_approx_eq!(world.vehicle(0).unwrap().x, 0.0);
        assert_approx_eq!(world.vehicle(1).unwrap().x, 300.0);
    }

    #[test]
    fn test_meta_copied() {
        let mut world = two_tank_world();
        let mut snapshot = snapshot_with(&[]);
        snapshot.meta.scores.insert("host".to_string(), 3);
        snapshot.meta.round.round_over = true;
        snapshot.meta.round.result_text = "host wins".to_string();

        world.apply_snapshot(&snapshot);

        assert_eq!(world.scores().get("host"), Some(&3));
        assert!(world.round().round_over);
        assert_eq!(world.round().result_text, "host wins");
    }

    #[test]
    fn test_spawn_vehicles_resets_projectiles() {
        let mut world = two_tank_world();
        world.apply_snapshot(&snapshot_with(&[(1, 10.0)]));

        world.spawn_vehicles(snapshot_with(&[]).vehicles.iter().map(Vehicle::from));

        assert!(world.projectiles().is_empty());
        assert_eq!(world.vehicle(1).unwrap().health, 80);
    }
}
