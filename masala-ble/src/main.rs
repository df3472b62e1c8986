//! Masala dispenser CLI
//!
//! Scans for dispensers, sends dispense jobs from recipe files, and
//! prints inventory readouts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use masala_ble_controller::BleLink;
use masala_session::{Coordinator, CoordinatorState, DispenseInstruction, SessionConfig};

/// Covers the configured scan timeout across all connection attempts.
const CONNECT_DEADLINE: Duration = Duration::from_secs(45);
const READOUT_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "masala-ble")]
#[command(about = "Companion tool for the Masala spice dispenser")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby BLE devices and flag Masala dispensers
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Send a dispense job from a recipe file
    Dispense {
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
        /// Recipe file: a JSON list of {"slot": 1, "amount": 2.5} records
        #[arg(short, long, default_value = "recipe.json")]
        recipe: String,
    },
    /// Connect and print the inventory readout
    Watch {
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { duration } => scan_devices(duration).await,
        Commands::Dispense { device, recipe } => dispense(device, &recipe).await,
        Commands::Watch { device } => watch(device).await,
    }
}

async fn scan_devices(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
    use btleplug::platform::Manager;

    println!("Scanning for dispensers ({duration} seconds)...");

    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    let adapter = adapters
        .into_iter()
        .next()
        .ok_or("No Bluetooth adapter found")?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(duration)).await;

    let peripherals = adapter.peripherals().await?;

    println!("\nFound {} devices:", peripherals.len());
    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let addr = peripheral.address();
            let rssi = props
                .rssi
                .map(|r| format!("{r} dBm"))
                .unwrap_or_else(|| "N/A".to_string());

            let is_dispenser = name.starts_with(masala_proto::ble::NAME_PREFIX)
                || props.services.contains(&masala_proto::ble::SERVICE_UUID);
            let marker = if is_dispenser { " [MASALA]" } else { "" };

            println!("  {name} ({addr}) RSSI: {rssi}{marker}");
        }
    }

    adapter.stop_scan().await?;
    Ok(())
}

async fn dispense(device: Option<String>, recipe: &str) -> Result<(), Box<dyn std::error::Error>> {
    let instructions = read_recipe(recipe)?;
    println!("Loaded {} instructions from {recipe}", instructions.len());

    let config = SessionConfig::default();
    let link = build_link(device, &config).await?;
    let coordinator = Coordinator::new(link, config);

    println!("Connecting...");
    coordinator.start().await?;
    wait_until_ready(&coordinator).await?;
    println!("Connected!");

    let report = coordinator.send(&instructions).await?;
    println!("Dispense job sent in {} chunks.", report.chunks_sent);
    Ok(())
}

async fn watch(device: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = SessionConfig::default();
    let expected = config.expected_readings;
    let link = build_link(device, &config).await?;
    let coordinator = Coordinator::new(link, config);

    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    coordinator.on_reading(move |reading| {
        println!("  slot {:>2}: {:>7.2}", reading.slot, reading.amount);
        seen.fetch_add(1, Ordering::SeqCst);
    });

    println!("Connecting...");
    coordinator.start().await?;
    wait_until_ready(&coordinator).await?;
    println!("Connected, waiting for the inventory readout...");

    let deadline = tokio::time::Instant::now() + READOUT_DEADLINE;
    while count.load(Ordering::SeqCst) < expected {
        if tokio::time::Instant::now() >= deadline {
            return Err("readout incomplete, dispenser stopped sending".into());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("Readout complete.");
    Ok(())
}

async fn build_link(
    device: Option<String>,
    config: &SessionConfig,
) -> Result<BleLink, Box<dyn std::error::Error>> {
    let mut link = BleLink::create()
        .await
        .map_err(|err| format!("Bluetooth unavailable: {err}"))?;
    link = link.write_with_response(config.write_with_response);
    if let Some(device) = device {
        link = link.with_device_filter(device);
    }
    Ok(link)
}

async fn wait_until_ready(coordinator: &Coordinator) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = coordinator.watch_state();
    let outcome = tokio::time::timeout(CONNECT_DEADLINE, async move {
        let mut attempted = false;
        loop {
            match *state.borrow_and_update() {
                CoordinatorState::Ready => return Ok(()),
                CoordinatorState::Connecting => attempted = true,
                CoordinatorState::Unavailable if attempted => {
                    return Err("dispenser unreachable, try again");
                }
                CoordinatorState::Unavailable => {}
            }
            if state.changed().await.is_err() {
                return Err("session stopped");
            }
        }
    })
    .await;

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(msg)) => Err(msg.into()),
        Err(_) => Err("timed out waiting for the dispenser".into()),
    }
}

#[derive(serde::Deserialize)]
struct RecipeEntry {
    slot: u8,
    amount: f32,
}

fn read_recipe(path: &str) -> Result<Vec<DispenseInstruction>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<RecipeEntry> = serde_json::from_str(&content)?;

    let mut instructions = Vec::with_capacity(entries.len());
    for entry in entries {
        instructions.push(DispenseInstruction::new(entry.slot, entry.amount)?);
    }
    if instructions.is_empty() {
        return Err("recipe is empty".into());
    }
    Ok(instructions)
}
