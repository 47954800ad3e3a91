use std::time::Duration;

use crossbeam_channel::Receiver;
use pmogrbl::{
    GrblError, PlaybackState, Position, Program, SenderEvent, SenderHandle, SenderOptions,
    SenderWorker, SerialChannel,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{sleep, timeout};

async fn attached_worker() -> anyhow::Result<(SenderWorker, SenderHandle, DuplexStream)> {
    let (worker, handle) = SenderWorker::spawn(SenderOptions::default());
    let (host, device) = tokio::io::duplex(4096);
    let (channel, chunks) = SerialChannel::from_stream("duplex", host);
    handle.attach(Box::new(channel), chunks).await?;
    Ok((worker, handle, device))
}

/// Reads from the device side until `needle` shows up; returns everything read.
async fn read_until(device: &mut DuplexStream, needle: &str) -> anyhow::Result<String> {
    let mut seen = String::new();
    let mut buf = [0u8; 256];
    while !seen.contains(needle) {
        let n = timeout(Duration::from_secs(5), device.read(&mut buf)).await??;
        anyhow::ensure!(n > 0, "link closed before {needle:?}");
        seen.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    Ok(seen)
}

async fn wait_for_event<F>(rx: &Receiver<SenderEvent>, mut pred: F) -> Option<SenderEvent>
where
    F: FnMut(&SenderEvent) -> bool,
{
    for _ in 0..200 {
        while let Ok(event) = rx.try_recv() {
            if pred(&event) {
                return Some(event);
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    None
}

#[tokio::test]
async fn program_streams_as_the_device_answers() -> anyhow::Result<()> {
    let (worker, handle, mut device) = attached_worker().await?;
    handle
        .load_program(Program::from_lines(["G21", "G0 X5", "M2"]))
        .await?;
    handle.play().await?;

    read_until(&mut device, "G21\n").await?;
    device.write_all(b"ok\r\n").await?;
    read_until(&mut device, "G0 X5\n").await?;
    device.write_all(b"ok\r\n").await?;
    read_until(&mut device, "M2\n").await?;

    let status = handle.status().await?;
    assert_eq!(status.machine.last_sent(), Some(2));
    assert_eq!(status.playback, PlaybackState::Playing);

    handle.shutdown().await?;
    worker.wait().await
}

#[tokio::test]
async fn fetch_settings_resolves_on_acknowledgement() -> anyhow::Result<()> {
    let (worker, handle, mut device) = attached_worker().await?;

    let fetch = tokio::spawn({
        let handle = handle.clone();
        async move { handle.fetch_settings().await }
    });

    read_until(&mut device, "$$\n").await?;
    device.write_all(b"$0=10\r\n$1=25\r\n").await?;
    device.write_all(b"ok\r\n").await?;

    let snapshot = fetch.await??;
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.get("$1").map(|s| s.value.as_str()), Some("25"));

    let applied = handle
        .apply_settings([("$1".to_string(), "30".to_string())].into())
        .await?;
    assert_eq!(applied, vec!["$1=30"]);
    read_until(&mut device, "$1=30\n").await?;

    handle.shutdown().await?;
    worker.wait().await
}

#[tokio::test]
async fn newer_fetch_supersedes_pending_one() -> anyhow::Result<()> {
    let (worker, handle, mut device) = attached_worker().await?;

    let first = tokio::spawn({
        let handle = handle.clone();
        async move { handle.fetch_settings().await }
    });
    read_until(&mut device, "$$\n").await?;

    let second = tokio::spawn({
        let handle = handle.clone();
        async move { handle.fetch_settings().await }
    });
    read_until(&mut device, "$$\n").await?;
    device.write_all(b"$0=10\r\nok\r\n").await?;

    assert!(matches!(first.await?, Err(GrblError::FetchSuperseded)));
    assert_eq!(second.await??.len(), 1);

    handle.shutdown().await?;
    worker.wait().await
}

#[tokio::test(start_paused = true)]
async fn status_polling_is_suspended_during_fetch() -> anyhow::Result<()> {
    let (worker, handle, mut device) = attached_worker().await?;

    // Le polling tourne dès que le lien est attaché
    read_until(&mut device, "?").await?;

    let fetch = tokio::spawn({
        let handle = handle.clone();
        async move { handle.fetch_settings().await }
    });
    let seen = read_until(&mut device, "$$\n").await?;
    let after_dump = seen.rsplit("$$\n").next().unwrap_or_default();
    assert!(!after_dump.contains('?'));

    // Plusieurs périodes de polling sans aucune requête
    sleep(Duration::from_secs(2)).await;
    let mut buf = [0u8; 64];
    assert!(
        timeout(Duration::from_millis(50), device.read(&mut buf))
            .await
            .is_err()
    );

    device.write_all(b"$0=10\r\nok\r\n").await?;
    fetch.await??;
    read_until(&mut device, "?").await?;

    handle.shutdown().await?;
    worker.wait().await
}

#[tokio::test]
async fn status_reports_update_position() -> anyhow::Result<()> {
    let (worker, handle, mut device) = attached_worker().await?;
    let events = handle.subscribe();

    device
        .write_all(b"<Idle|MPos:12.500,-3.000,4.250|FS:0,0>\r\n")
        .await?;

    let event = wait_for_event(&events, |e| matches!(e, SenderEvent::PositionChanged(_))).await;
    assert_eq!(
        event,
        Some(SenderEvent::PositionChanged(Position::new(12.5, -3.0, 4.25)))
    );
    assert_eq!(
        handle.status().await?.machine.position(),
        Position::new(12.5, -3.0, 4.25)
    );

    handle.shutdown().await?;
    worker.wait().await
}

#[tokio::test]
async fn losing_the_link_fails_pending_fetch() -> anyhow::Result<()> {
    let (worker, handle, mut device) = attached_worker().await?;
    let events = handle.subscribe();

    let fetch = tokio::spawn({
        let handle = handle.clone();
        async move { handle.fetch_settings().await }
    });
    read_until(&mut device, "$$\n").await?;
    drop(device);

    let result = fetch.await?;
    assert!(matches!(result, Err(ref e) if e.is_link_error()));
    assert!(
        wait_for_event(&events, |e| matches!(e, SenderEvent::LinkError(_)))
            .await
            .is_some()
    );
    assert!(!handle.status().await?.connected);

    handle.shutdown().await?;
    worker.wait().await
}

#[tokio::test]
async fn connect_to_missing_port_reports_failure() -> anyhow::Result<()> {
    let (worker, handle) = SenderWorker::spawn(SenderOptions::default());
    let events = handle.subscribe();

    let result = handle.connect("/dev/pmogrbl-does-not-exist", 115_200).await;
    assert!(result.is_err());

    let logged = wait_for_event(
        &events,
        |e| matches!(e, SenderEvent::LogLine(line) if line == "Failed to connect"),
    )
    .await;
    assert!(logged.is_some());
    assert!(!handle.status().await?.connected);

    handle.shutdown().await?;
    worker.wait().await
}

#[tokio::test]
async fn zero_poll_interval_keeps_the_worker_alive() -> anyhow::Result<()> {
    let (worker, handle) = SenderWorker::spawn(SenderOptions {
        poll_interval: Duration::ZERO,
        ..SenderOptions::default()
    });

    // Laisse le ticker tourner quelques périodes
    sleep(Duration::from_millis(50)).await;
    let status = handle.status().await?;
    assert!(!status.connected);
    assert_eq!(status.playback, PlaybackState::Idle);

    handle.shutdown().await?;
    worker.wait().await
}
