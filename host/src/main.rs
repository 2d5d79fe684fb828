use clap::Parser;
use host::network::{GameHost, HostEvent};
use host::sync::ProjectileIdAllocator;
use log::{info, warn};
use shared::map_sync::Wall;
use shared::protocol::{SessionEnd, SessionStart};
use shared::{GameStateSnapshot, NetConfig, ProjectileState, VehicleState};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use tokio::time::{interval, Duration, MissedTickBehavior};

const TICK_RATE: u32 = 60;
const TANK_SPEED: f32 = 120.0;
const TURN_SPEED: f32 = 180.0;
const BULLET_SPEED: f32 = 300.0;
const BULLET_LIFETIME: f32 = 2.0;
const ARENA_WIDTH: f32 = 800.0;
const ARENA_HEIGHT: f32 = 600.0;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Room name shown to browsing players
    #[clap(short, long, default_value = "Tank Room")]
    room: String,
    /// Display name of the hosting player
    #[clap(short, long, default_value = "Host")]
    name: String,
    /// Local IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    bind: IpAddr,
    /// Destination of room advertisements
    #[clap(short, long, default_value = "255.255.255.255")]
    broadcast: IpAddr,
    /// Discovery port; the game port is the one above it
    #[clap(short, long, default_value_t = shared::config::DISCOVERY_PORT)]
    discovery_port: u16,
    /// Snapshot rate (updates per second)
    #[clap(short, long, default_value = "30")]
    sync_rate: u32,
}

impl Args {
    fn to_config(&self) -> NetConfig {
        let mut config = NetConfig::default().with_discovery_port(self.discovery_port);
        config.room_name = self.room.clone();
        config.display_name = self.name.clone();
        config.bind_address = self.bind;
        config.broadcast_address = self.broadcast;
        config.target_sync_hz = self.sync_rate;
        config
    }
}

struct DemoTank {
    player_id: String,
    x: f32,
    y: f32,
    angle: f32,
    health: i32,
}

struct DemoBullet {
    id: u32,
    owner: String,
    x: f32,
    y: f32,
    angle: f32,
    age: f32,
}

/// Minimal simulation: the host tank idles, the client tank follows its keys
struct DemoWorld {
    tanks: Vec<DemoTank>,
    bullets: Vec<DemoBullet>,
    ids: ProjectileIdAllocator,
    fire_held: bool,
    scores: BTreeMap<String, u32>,
}

impl DemoWorld {
    fn new(host_name: &str) -> Self {
        Self {
            tanks: vec![DemoTank {
                player_id: host_name.to_string(),
                x: 200.0,
                y: ARENA_HEIGHT / 2.0,
                angle: 0.0,
                health: 100,
            }],
            bullets: Vec::new(),
            ids: ProjectileIdAllocator::new(),
            fire_held: false,
            scores: BTreeMap::new(),
        }
    }

    fn spawn_client(&mut self, client_id: &str) {
        self.tanks.truncate(1);
        self.tanks.push(DemoTank {
            player_id: client_id.to_string(),
            x: ARENA_WIDTH - 200.0,
            y: ARENA_HEIGHT / 2.0,
            angle: 180.0,
            health: 100,
        });
        self.scores.entry(client_id.to_string()).or_insert(0);
    }

    fn remove_client(&mut self) {
        if let Some(tank) = self.tanks.get(1) {
            let owner = tank.player_id.clone();
            let ids = &mut self.ids;
            self.bullets.retain(|bullet| {
                let keep = bullet.owner != owner;
                if !keep {
                    ids.release(bullet.id);
                }
                keep
            });
        }
        self.tanks.truncate(1);
        self.fire_held = false;
    }

    fn update(&mut self, dt: f32, client_keys: &HashSet<String>) {
        if let Some(tank) = self.tanks.get_mut(1) {
            if client_keys.contains("A") {
                tank.angle -= TURN_SPEED * dt;
            }
            if client_keys.contains("D") {
                tank.angle += TURN_SPEED * dt;
            }

            let heading = tank.angle.to_radians();
            let mut speed = 0.0;
            if client_keys.contains("W") {
                speed += TANK_SPEED;
            }
            if client_keys.contains("S") {
                speed -= TANK_SPEED;
            }
            tank.x = (tank.x + heading.cos() * speed * dt).clamp(0.0, ARENA_WIDTH);
            tank.y = (tank.y + heading.sin() * speed * dt).clamp(0.0, ARENA_HEIGHT);

            let fire = client_keys.contains("SPACE");
            if fire && !self.fire_held {
                let bullet = DemoBullet {
                    id: self.ids.allocate(),
                    owner: tank.player_id.clone(),
                    x: tank.x,
                    y: tank.y,
                    angle: tank.angle,
                    age: 0.0,
                };
                self.bullets.push(bullet);
            }
            self.fire_held = fire;
        }

        let ids = &mut self.ids;
        self.bullets.retain_mut(|bullet| {
            let heading = bullet.angle.to_radians();
            bullet.x += heading.cos() * BULLET_SPEED * dt;
            bullet.y += heading.sin() * BULLET_SPEED * dt;
            bullet.age += dt;

            let alive = bullet.age < BULLET_LIFETIME
                && (0.0..=ARENA_WIDTH).contains(&bullet.x)
                && (0.0..=ARENA_HEIGHT).contains(&bullet.y);
            if !alive {
                ids.release(bullet.id);
            }
            alive
        });
    }

    fn snapshot(&self) -> GameStateSnapshot {
        let mut snapshot = GameStateSnapshot::new();
        for tank in &self.tanks {
            snapshot.push_vehicle(VehicleState::new(
                &tank.player_id,
                tank.x,
                tank.y,
                tank.angle,
                tank.health,
            ));
        }
        for bullet in &self.bullets {
            snapshot.insert_projectile(ProjectileState::new(
                bullet.id,
                &bullet.owner,
                bullet.x,
                bullet.y,
                bullet.angle,
            ));
        }
        snapshot.meta.scores = self.scores.clone();
        snapshot
    }
}

fn demo_layout() -> Vec<Wall> {
    vec![
        Wall::new(ARENA_WIDTH / 2.0, 10.0, ARENA_WIDTH, 20.0),
        Wall::new(ARENA_WIDTH / 2.0, ARENA_HEIGHT - 10.0, ARENA_WIDTH, 20.0),
        Wall::new(10.0, ARENA_HEIGHT / 2.0, 20.0, ARENA_HEIGHT),
        Wall::new(ARENA_WIDTH - 10.0, ARENA_HEIGHT / 2.0, 20.0, ARENA_HEIGHT),
        Wall::new(ARENA_WIDTH / 2.0, ARENA_HEIGHT / 2.0, 40.0, 200.0),
    ]
}

/// Main-method of the demo host.
/// Parses command-line arguments, opens the room and runs a 60Hz demo simulation.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let mut host = GameHost::new(args.to_config())?;
    let addr = host.start(&args.room).await?;
    info!("Room '{}' open on {}", args.room, addr);

    let layout = demo_layout();
    let mut world = DemoWorld::new(&args.name);
    let mut round = 0;

    let dt = 1.0 / TICK_RATE as f32;
    let mut ticker = interval(Duration::from_secs_f32(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }

        for event in host.poll_events() {
            match event {
                HostEvent::ClientJoined {
                    client_id,
                    player_name,
                } => {
                    info!("{} joined as {}", player_name, client_id);
                    world.spawn_client(&client_id);
                    round += 1;

                    if let Err(e) = host.send_map(&layout).await {
                        warn!("Failed to send map: {}", e);
                    }
                    let start = SessionStart {
                        round,
                        ..Default::default()
                    };
                    if let Err(e) = host.start_session(start).await {
                        warn!("Failed to start session: {}", e);
                    }
                }
                HostEvent::ClientLeft {
                    player_name,
                    reason,
                    ..
                } => {
                    info!("{} left ({})", player_name, reason);
                    world.remove_client();
                }
                HostEvent::InputReceived { .. } => {}
            }
        }

        let client_keys = host.get_client_input().await;
        world.update(dt, &client_keys);

        if let Err(e) = host.send_state(&world.snapshot()).await {
            warn!("Failed to send state: {}", e);
        }
    }

    if host.is_room_full().await {
        let end = SessionEnd {
            reason: "host_shutdown".to_string(),
            ..Default::default()
        };
        if let Err(e) = host.end_session(end).await {
            warn!("Failed to end session: {}", e);
        }
    }
    host.stop(true).await?;

    Ok(())
}
