use clap::Parser;
use client::network::{ClientEvent, GameClient};
use client::reconcile::{ClientWorld, Vehicle};
use log::{info, warn};
use shared::discovery::RoomListener;
use shared::NetConfig;
use std::collections::HashSet;
use std::net::SocketAddr;
use tokio::time::{interval, timeout, Duration, Instant, MissedTickBehavior};

const TICK_RATE: u32 = 60;
const SCRIPT_PERIOD: f32 = 6.0;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Host game address; searches the LAN when omitted
    #[clap(short = 'H', long)]
    host: Option<SocketAddr>,

    /// Display name sent with the join request
    #[clap(short, long, default_value = "Player")]
    name: String,

    /// Discovery port to listen on while searching
    #[clap(short, long, default_value_t = shared::config::DISCOVERY_PORT)]
    discovery_port: u16,

    /// Seconds to search for an open room
    #[clap(short, long, default_value = "5")]
    search_secs: u64,

    /// Seconds to stay in the game
    #[clap(short = 't', long, default_value = "30")]
    duration: u64,
}

impl Args {
    fn to_config(&self) -> NetConfig {
        let mut config = NetConfig::default().with_discovery_port(self.discovery_port);
        config.display_name = self.name.clone();
        config
    }
}

async fn discover(config: &NetConfig, wait: Duration) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let mut listener = RoomListener::start(config).await?;
    let mut updates = listener.subscribe();

    let found = timeout(wait, async {
        loop {
            let open = updates
                .borrow_and_update()
                .iter()
                .find(|room| !room.is_full())
                .cloned();
            if open.is_some() {
                return open;
            }
            if updates.changed().await.is_err() {
                return None;
            }
        }
    })
    .await;

    listener.stop().await;

    match found {
        Ok(Some(room)) => {
            info!("Joining {}", room);
            Ok(room.host_address)
        }
        _ => Err(format!("no open room found within {:?}", wait).into()),
    }
}

/// Keys a scripted player holds at `t` seconds into the loop
fn scripted_keys(t: f32) -> HashSet<String> {
    let phase = t % SCRIPT_PERIOD;
    let mut keys = HashSet::new();
    if (0.5..4.0).contains(&phase) {
        keys.insert("W".to_string());
    }
    if (2.0..2.5).contains(&phase) {
        keys.insert("D".to_string());
    }
    if (3.0..3.1).contains(&phase) || (5.0..5.1).contains(&phase) {
        keys.insert("SPACE".to_string());
    }
    keys
}

/// Main-method of the demo client.
/// Finds or dials a host, then drives a scripted tank and logs the reconciled world.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.to_config();

    let host_addr = match args.host {
        Some(addr) => addr,
        None => discover(&config, Duration::from_secs(args.search_secs)).await?,
    };

    let mut client = GameClient::new(config)?;
    client.connect(host_addr, &args.name).await?;

    let mut world = ClientWorld::new();
    let started = Instant::now();
    let mut last_report = Instant::now();

    let mut ticker = interval(Duration::from_secs_f32(1.0 / TICK_RATE as f32));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    'game: loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving");
                break;
            }
        }

        for event in client.poll_events() {
            match event {
                ClientEvent::Disconnected { reason } => {
                    warn!("Disconnected: {}", reason);
                    break 'game;
                }
                ClientEvent::SessionStarted { round, map, .. } => {
                    info!(
                        "Round {} started ({} walls)",
                        round,
                        map.map(|walls| walls.len()).unwrap_or(0)
                    );
                    world.clear();
                }
                ClientEvent::MapSynced { walls, checksum } => {
                    info!("Map with {} walls ({})", walls.len(), checksum);
                }
                ClientEvent::MapRejected { reason } => warn!("Map rejected: {}", reason),
                ClientEvent::SessionEnded(end) => info!("Session ended: {}", end.reason),
                ClientEvent::Connected { .. } => {}
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= Duration::from_secs(args.duration) {
            break;
        }

        let wanted = scripted_keys(elapsed.as_secs_f32());
        let held = client.current_keys();
        for key in wanted.difference(&held) {
            client.press(key);
        }
        for key in held.difference(&wanted) {
            client.release(key);
        }

        if let Some(snapshot) = client.take_snapshot() {
            if world.vehicles().len() < snapshot.vehicles.len() {
                world.spawn_vehicles(snapshot.vehicles.iter().map(Vehicle::from));
            }
            let report = world.apply_snapshot(&snapshot);
            if report.changes_entities() {
                info!(
                    "Projectiles +{:?} -{:?}",
                    report.created, report.removed
                );
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            for vehicle in world.vehicles() {
                info!(
                    "{}: ({:.1}, {:.1}) {:.0} deg, {} hp",
                    vehicle.player_id, vehicle.x, vehicle.y, vehicle.angle, vehicle.health
                );
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
