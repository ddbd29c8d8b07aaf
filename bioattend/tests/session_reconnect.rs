//! Link failure and recovery against a simulated sensor board

use std::time::Duration;

use bioattend::{
    CommandCode, CommandSet, DeviceNotification, DeviceSession, ReconnectPolicy, SessionOptions,
    SessionState,
};
use bioattend_transport::mock::MockDevice;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

fn options(max_attempts: Option<u32>) -> SessionOptions {
    SessionOptions {
        command_set: CommandSet::CHARACTER,
        poll_interval: Duration::from_millis(100),
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            max_attempts,
        },
    }
}

/// Collect notifications up to and including the first one accepted by `last`
async fn collect_until(
    rx: &mut broadcast::Receiver<DeviceNotification>,
    last: impl Fn(&DeviceNotification) -> bool,
) -> Vec<DeviceNotification> {
    let mut seen = Vec::new();
    loop {
        let notification = rx.recv().await.unwrap();
        let done = last(&notification);
        seen.push(notification);
        if done {
            return seen;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_reports_one_drop_and_one_recovery() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let session = DeviceSession::new(Box::new(device.transport()), options(Some(3)));
    session.connect(Some("/dev/ttyUSB0")).await?;
    let mut rx = session.subscribe();

    device.fail_reads(1);

    let seen = collect_until(&mut rx, |n| *n == DeviceNotification::ConnectionStatus(true)).await;
    assert_eq!(
        seen,
        vec![
            DeviceNotification::ConnectionStatus(false),
            DeviceNotification::ReconnectAttempt {
                attempt: 1,
                delay: Duration::from_millis(500),
            },
            DeviceNotification::ConnectionStatus(true),
        ]
    );
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(device.open_count(), 2);

    // Sensor pinged after each open
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(device.count(CommandCode::CheckSensor), 2);

    // Still serving lines after recovery
    device.push_line("F:MATCH:12");
    assert_eq!(rx.recv().await?, DeviceNotification::MatchFound(12));

    session.disconnect().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_max_attempts() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let session = DeviceSession::new(Box::new(device.transport()), options(Some(3)));
    session.connect(None).await?;
    let mut rx = session.subscribe();

    device.fail_opens(3);
    device.fail_reads(1);

    let seen = collect_until(&mut rx, |n| {
        matches!(n, DeviceNotification::ConnectionLost { .. })
    })
    .await;

    let delays: Vec<Duration> = seen
        .iter()
        .filter_map(|n| match n {
            DeviceNotification::ReconnectAttempt { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![Duration::from_millis(500), Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert_eq!(seen.first(), Some(&DeviceNotification::ConnectionStatus(false)));
    assert_eq!(
        seen.last(),
        Some(&DeviceNotification::ConnectionLost { attempts: 3 })
    );
    assert!(!seen.contains(&DeviceNotification::ConnectionStatus(true)));
    assert_eq!(session.state(), SessionState::Disconnected);

    // A fresh connect works once the port is back
    session.connect(None).await?;
    assert!(session.is_connected());

    session.disconnect().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn write_failure_recovers_through_handle() -> anyhow::Result<()> {
    let device = MockDevice::new();
    device.respond_always(CommandCode::Verify, ["F:MATCH:2"]);
    let session = DeviceSession::new(Box::new(device.transport()), options(None));
    session.connect(None).await?;
    let handle = session.handle();

    device.fail_writes(1);
    let err = handle.verify_once(Duration::from_secs(2)).await.unwrap_err();
    assert!(err.requires_reconnect());

    handle.reconnect().await?;
    assert_eq!(handle.verify_once(Duration::from_secs(2)).await?, Some(2));

    session.disconnect().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn disconnect_twice_publishes_once() {
    let device = MockDevice::new();
    let session = DeviceSession::new(Box::new(device.transport()), options(Some(3)));
    session.connect(None).await.unwrap();
    let mut rx = session.subscribe();

    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(rx.recv().await.unwrap(), DeviceNotification::ConnectionStatus(false));
    assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    assert!(!device.is_open());
}

#[tokio::test(start_paused = true)]
async fn disconnect_stops_recovery() {
    let device = MockDevice::new();
    let session = DeviceSession::new(Box::new(device.transport()), options(None));
    session.connect(None).await.unwrap();
    let mut rx = session.subscribe();

    device.fail_opens(100);
    device.fail_reads(1);

    // Wait for the recovery loop to be running
    collect_until(&mut rx, |n| {
        matches!(n, DeviceNotification::ReconnectFailed { attempt: 2, .. })
    })
    .await;

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    while rx.try_recv().is_ok() {}

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    assert_eq!(device.open_count(), 1);
}
