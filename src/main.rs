//! sxm-link - demo device for a shared touch table
//!
//! Joins a room on the configured MQTT broker and publishes the status of a
//! simulated handheld device that is repeatedly picked up, tilted and laid
//! down. Control messages from the table are logged.
//!
//! ## Threads
//!
//! - **Main**: session loop (classifier tick, status timer, broker events)
//! - **mqtt-link**: broker socket, keep-alive and reconnect
//! - **sensor-sim**: simulated motion/orientation feed

use clap::Parser;
use crossbeam_channel::Sender;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use sxm_link::config::AppConfig;
use sxm_link::error::{Error, Result};
use sxm_link::motion::{GrantAll, HandheldSimulator, PermissionProvider, SensorEvent};
use sxm_link::session::Session;
use sxm_link::transport::TcpLink;

/// Config file picked up from the working directory when --config is absent
const DEFAULT_CONFIG: &str = "sxm-link.toml";

/// Sensor events buffered between the feed and the session loop
const SENSOR_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(author, version, about = "Handheld device link for a shared touch table")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Room to join (overrides session.room_id)
    #[arg(short, long)]
    room: Option<String>,

    /// Broker host (overrides broker.host)
    #[arg(long)]
    host: Option<String>,

    /// Broker port (overrides broker.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Fixed device id (overrides device.id)
    #[arg(long)]
    device_id: Option<String>,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => AppConfig::from_file(DEFAULT_CONFIG)?,
        None => AppConfig::default(),
    };

    if let Some(room) = &args.room {
        config.session.room_id = room.clone();
    }
    if let Some(host) = &args.host {
        config.broker.host = host.clone();
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(id) = &args.device_id {
        config.device.id = Some(id.clone());
    }

    config.validate()?;
    Ok(config)
}

fn spawn_sensor_feed(
    config: &AppConfig,
    tx: Sender<SensorEvent>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let sim_config = config.simulation;
    thread::Builder::new()
        .name("sensor-sim".to_string())
        .spawn(move || {
            let mut sim = HandheldSimulator::new(sim_config);
            let period = Duration::from_secs_f64(1.0 / sim_config.rate_hz);
            let start = Instant::now();

            log::info!("Simulated sensor feed at {:.0} Hz", sim_config.rate_hz);
            while running.load(Ordering::Relaxed) {
                let t = start.elapsed().as_secs_f64();
                for event in sim.generate(t) {
                    // Drop samples rather than stall when the loop is busy
                    if tx.try_send(event).is_err() {
                        log::trace!("Sensor channel full, dropping sample");
                    }
                }
                thread::sleep(period);
            }
            log::info!("Sensor feed stopped");
        })
        .map_err(|e| Error::Other(format!("Failed to spawn sensor feed: {}", e)))
}

fn install_control_logging(session: &mut Session) {
    session.on_start(Box::new(|payload| {
        log::info!("Table started the session ({} bytes)", payload.len());
    }));
    session.on_shutdown(Box::new(|payload| {
        log::info!("Table shut the session down ({} bytes)", payload.len());
    }));
    session.on_down(Box::new(|payload| {
        log::info!("Down: {}", String::from_utf8_lossy(payload));
    }));
    session.on_up(Box::new(|payload| {
        log::info!("Up: {}", String::from_utf8_lossy(payload));
    }));
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("sxm-link v{} starting...", env!("CARGO_PKG_VERSION"));

    let device_id = config.device_id();
    let client_id = config.broker.client_id(&device_id);
    log::info!("Device id: {}", device_id);
    log::info!(
        "Broker: {} (room '{}')",
        config.broker.address(),
        config.session.room_id
    );

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let grant = GrantAll.request_all();
    let (link, link_events) = TcpLink::new(config.broker.clone(), client_id);
    let mut session = Session::new(&config, device_id, Box::new(link), grant)?;
    install_control_logging(&mut session);

    let (sensor_tx, sensor_rx) = crossbeam_channel::bounded(SENSOR_CHANNEL_CAPACITY);
    let feed = spawn_sensor_feed(&config, sensor_tx, Arc::clone(&running))?;

    session.connect();
    log::info!("sxm-link running. Press Ctrl-C to stop.");
    session.run(&sensor_rx, &link_events, &running);

    running.store(false, Ordering::Relaxed);
    if feed.join().is_err() {
        log::error!("Sensor feed thread panicked");
    }

    log::info!(
        "Sent {} status updates ({} still queued)",
        session.statuses_sent(),
        session.client().queued_len()
    );
    log::info!("sxm-link stopped");
    Ok(())
}
