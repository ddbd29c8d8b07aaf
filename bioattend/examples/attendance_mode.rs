//! Continuous attendance from a serial sensor
//!
//! Reads `bioattend.toml` (created with defaults on first run), connects to
//! the sensor and records every match until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use bioattend::{AttendanceSystem, Config, MatchResolution, MemoryStorage, Storage};
use bioattend_transport::SerialTransport;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> bioattend::Result<()> {
    let path = std::env::var("BIOATTEND_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("bioattend.toml"));

    let config = Config::load_or_create(&path)?;
    let _guard = bioattend::logging::init(&config.logging)?;

    let transport = SerialTransport::new(config.device.baud_rate)
        .with_settle_delay(config.device.settle_delay());

    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "Ada Lovelace");
    storage.add_user(2, "Alan Turing");

    let system = Arc::new(AttendanceSystem::new(&config, Box::new(transport), storage));
    system.connect().await?;
    println!("Connected, waiting for fingers...");

    let mut resolutions = system.subscribe();
    tokio::spawn(async move {
        while let Ok(resolution) = resolutions.recv().await {
            match resolution {
                MatchResolution::Marked(user) => println!("✓ {} marked present", user.name),
                MatchResolution::AlreadyMarked(user) => println!("{} already marked today", user.name),
                MatchResolution::Unregistered(id) => println!("✗ Fingerprint {} not registered", id),
                MatchResolution::Duplicate(_) => {}
            }
        }
    });

    system.start_attendance_mode()?;

    let shutdown = CancellationToken::new();
    let runner = tokio::spawn({
        let system = Arc::clone(&system);
        let shutdown = shutdown.clone();
        async move { system.run(shutdown).await }
    });

    let _ = tokio::signal::ctrl_c().await;
    shutdown.cancel();
    let _ = runner.await;

    for record in system.today_attendance() {
        println!("{}", record);
    }

    system.shutdown().await;
    println!("✓ Disconnected");

    Ok(())
}
