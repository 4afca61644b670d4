//! BLE provisioning tool for RoomBeacons
//!
//! Finds a beacon waiting for configuration, sends it WiFi credentials and a
//! room assignment, and waits for it to confirm the save.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use roombeacon_proto::{MinorId, ROOM_PRESETS, find_preset};
use roombeacon_provision::{
    BtleCentral, DiscoveredPeripheral, ProvisionRequest, ProvisionerConfig, ProvisioningState,
    Session, btle,
};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "roombeacon")]
#[command(about = "BLE provisioning tool for RoomBeacons")]
struct Cli {
    /// Config file (default: $ROOMBEACON_HOME/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for beacons waiting to be provisioned
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Send WiFi credentials and a room assignment to a beacon
    Provision {
        /// Peripheral id from `scan`; the first beacon found if omitted
        #[arg(short, long)]
        device: Option<String>,
        #[arg(long)]
        ssid: String,
        #[arg(long)]
        password: String,
        /// Room preset name, see `presets`
        #[arg(
            long,
            conflicts_with_all = ["room_name", "minor"],
            required_unless_present = "room_name"
        )]
        room: Option<String>,
        /// Custom room name
        #[arg(long, requires = "minor")]
        room_name: Option<String>,
        /// Custom minor id (1-65535)
        #[arg(long, requires = "room_name")]
        minor: Option<MinorId>,
        /// Give up after this many seconds
        #[arg(long, default_value = "60")]
        timeout: u64,
        /// Write the diagnostic log to this file
        #[arg(long)]
        diagnostics: Option<PathBuf>,
    },
    /// List the room presets
    Presets,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Presets => {
            for preset in &ROOM_PRESETS {
                println!("  {:<12} minor {}", preset.name, preset.minor_id);
            }
            Ok(())
        }
        Commands::Scan { duration } => {
            let config = load_config(cli.config)?;
            scan(config, duration).await
        }
        Commands::Provision {
            device,
            ssid,
            password,
            room,
            room_name,
            minor,
            timeout,
            diagnostics,
        } => {
            let request = match (room, room_name, minor) {
                (Some(room), _, _) => {
                    let preset = find_preset(&room).ok_or_else(|| {
                        format!("Unknown room preset {room:?}, see `roombeacon presets`")
                    })?;
                    ProvisionRequest::from_preset(ssid, password, preset)
                }
                (None, Some(name), Some(minor)) => {
                    ProvisionRequest::new(ssid, password, name, minor)
                }
                _ => return Err("Either --room or --room-name with --minor is required".into()),
            };
            let config = load_config(cli.config)?;
            provision(
                config,
                device,
                request,
                Duration::from_secs(timeout),
                diagnostics,
            )
            .await
        }
    }
}

/// $ROOMBEACON_HOME, or ~/.roombeacon
fn roombeacon_home() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(home) = std::env::var("ROOMBEACON_HOME") {
        return Ok(PathBuf::from(home));
    }
    let home = dirs::home_dir().ok_or("No home directory, set ROOMBEACON_HOME")?;
    Ok(home.join(".roombeacon"))
}

fn load_config(path: Option<PathBuf>) -> Result<ProvisionerConfig, Box<dyn std::error::Error>> {
    let path = match path {
        Some(path) => path,
        None => roombeacon_home()?.join("config.json"),
    };
    log::debug!("config: {}", path.display());
    Ok(ProvisionerConfig::load_or_create(&path)?)
}

async fn start_session(config: ProvisionerConfig) -> Result<Session, Box<dyn std::error::Error>> {
    let adapter = btle::default_adapter().await?;
    Ok(Session::spawn(config, |sink| BtleCentral::new(adapter, sink)))
}

fn describe(peripheral: &DiscoveredPeripheral) -> String {
    let rssi = peripheral
        .rssi
        .map(|r| format!("{r} dBm"))
        .unwrap_or_else(|| "N/A".to_string());
    format!("{} ({}) RSSI: {}", peripheral.name, peripheral.id, rssi)
}

async fn scan(config: ProvisionerConfig, duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Scanning for {} beacons ({} seconds)...",
        config.device_name, duration
    );
    let session = start_session(config).await?;

    session.start_scanning()?;
    tokio::time::sleep(Duration::from_secs(duration)).await;
    session.stop_scanning()?;

    let peripherals = session.peripherals().await?;
    if let ProvisioningState::Error(message) = session.state() {
        session.shutdown().await;
        return Err(message.into());
    }

    println!("\nFound {} beacons:", peripherals.len());
    for peripheral in &peripherals {
        println!("  {}", describe(peripheral));
    }

    session.shutdown().await;
    Ok(())
}

/// Poll the discovered list until a beacon (the given one, if any) shows up
async fn find_beacon(
    session: &Session,
    device: Option<&str>,
) -> Result<DiscoveredPeripheral, Box<dyn std::error::Error>> {
    loop {
        let found = session
            .peripherals()
            .await?
            .into_iter()
            .find(|p| device.is_none_or(|id| p.id == id));
        if let Some(peripheral) = found {
            return Ok(peripheral);
        }
        if let ProvisioningState::Error(message) = session.state() {
            return Err(message.into());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Print every state change until `done` holds
async fn follow(
    states: &mut watch::Receiver<ProvisioningState>,
    done: impl Fn(&ProvisioningState) -> bool,
) -> Result<ProvisioningState, Box<dyn std::error::Error>> {
    loop {
        let state = states.borrow_and_update().clone();
        if done(&state) {
            return Ok(state);
        }
        states.changed().await?;
        println!("  {}", *states.borrow());
    }
}

async fn run_flow(
    session: &Session,
    device: Option<String>,
    request: ProvisionRequest,
) -> Result<ProvisioningState, Box<dyn std::error::Error>> {
    let mut states = session.subscribe();

    session.start_scanning()?;
    let beacon = find_beacon(session, device.as_deref()).await?;
    println!("Found beacon: {}", describe(&beacon));

    session.connect(beacon.id)?;
    let state = follow(&mut states, |s| {
        *s == ProvisioningState::Ready || s.is_terminal()
    })
    .await?;
    if state != ProvisioningState::Ready {
        return Ok(state);
    }

    println!(
        "Sending room {:?} (minor {}) and network {:?}...",
        request.room_name, request.minor_id, request.ssid
    );
    session.provision(request)?;
    follow(&mut states, ProvisioningState::is_terminal).await
}

async fn provision(
    config: ProvisionerConfig,
    device: Option<String>,
    request: ProvisionRequest,
    timeout: Duration,
    diagnostics: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = start_session(config).await?;

    let outcome = match tokio::time::timeout(timeout, run_flow(&session, device, request)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(format!("Gave up after {} seconds", timeout.as_secs()).into()),
    };
    let provisioned = session.provisioned().await?;
    let report = session.export_diagnostic_log().await?;
    session.shutdown().await;

    let failure = match outcome {
        Ok(ProvisioningState::Saved) => None,
        Ok(ProvisioningState::Disconnected) if !provisioned.is_empty() => None,
        Ok(ProvisioningState::Disconnected) => {
            println!(
                "Beacon restarted before confirming the save; check that it joined the network."
            );
            None
        }
        Ok(ProvisioningState::Error(message)) => Some(message),
        Ok(state) => Some(format!("Stopped in state {state}")),
        Err(e) => Some(e.to_string()),
    };

    if let Some(path) = &diagnostics {
        std::fs::write(path, &report)?;
        println!("Diagnostic log written to {}", path.display());
    } else if failure.is_some() {
        eprintln!("\n{report}");
    }

    match failure {
        None => {
            for device in &provisioned {
                println!(
                    "Provisioned {} ({}) as {} (minor {})",
                    device.name, device.id, device.room_name, device.minor_id
                );
            }
            Ok(())
        }
        Some(message) => Err(format!("Provisioning failed: {message}").into()),
    }
}
