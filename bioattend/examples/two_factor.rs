//! Two-factor attendance with a stand-in face recognizer
//!
//! Pretends the camera recognized the user given in `FACE_ID` and asks the
//! sensor to confirm with a fingerprint scan.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bioattend::config::ProtocolVariant;
use bioattend::{AttendanceOutcome, AttendanceSystem, Config, FaceId, FaceRecognizer, MemoryStorage, Storage};
use bioattend_transport::SerialTransport;

struct EnvRecognizer;

#[async_trait]
impl FaceRecognizer for EnvRecognizer {
    async fn recognize(&self) -> Option<FaceId> {
        std::env::var("FACE_ID").ok()?.parse().ok().map(FaceId)
    }

    async fn train(&self, _name: &str, _samples: &[Vec<u8>]) -> FaceId {
        FaceId(0)
    }
}

#[tokio::main]
async fn main() -> bioattend::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut config = Config::default();
    config.device.port = std::env::var("SENSOR_PORT").ok();
    config.device.protocol = ProtocolVariant::Both;
    config.correlator.scan_timeout_ms = Duration::from_secs(15).as_millis() as u64;

    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(3, "Grace Hopper");

    let transport = SerialTransport::new(config.device.baud_rate);
    let system = AttendanceSystem::new(&config, Box::new(transport), storage);
    system.connect().await?;

    println!("Place your finger on the sensor...");
    match system.mark_attendance_two_factor(&EnvRecognizer).await? {
        AttendanceOutcome::Matched(id) => println!("✓ User {} verified", id),
        AttendanceOutcome::Mismatch { expected, got } => {
            println!("✗ Fingerprint {} does not match {}", got, expected)
        }
        AttendanceOutcome::Exhausted => println!("✗ No matching fingerprint"),
    }

    system.shutdown().await;
    Ok(())
}
