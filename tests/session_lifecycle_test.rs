//! Session lifecycle tests driving the ScaleManager against the mock transport.

use scale_reader::{
    adapters::{MockScale, MockTransport},
    app_actor::ScaleManager,
    config::ScaleSettings,
    core::{SessionState, WeightEvent},
    error::ScaleError,
    framing::{FramingMode, ENQ},
    session::SessionStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const PORT: &str = "COM4";

fn settings(mode: FramingMode) -> ScaleSettings {
    ScaleSettings {
        port: PORT.to_string(),
        mode,
        poll_interval: Duration::from_millis(20),
        test_command_delay: Duration::from_millis(20),
        ..ScaleSettings::default()
    }
}

fn manager(mode: FramingMode) -> (ScaleManager, MockTransport) {
    let transport = MockTransport::new();
    let manager = ScaleManager::spawn(settings(mode), Arc::new(transport.clone()));
    (manager, transport)
}

async fn start(manager: &ScaleManager, transport: &MockTransport) -> MockScale {
    let status = manager.start(None).await.expect("start failed");
    assert_eq!(status.state, SessionState::Active);
    transport.take_scale(PORT).expect("no link was opened")
}

async fn next_event(events: &mut broadcast::Receiver<WeightEvent>) -> WeightEvent {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for a weight event")
        .expect("event channel closed")
}

async fn assert_no_event(events: &mut broadcast::Receiver<WeightEvent>) {
    let result = tokio::time::timeout(Duration::from_millis(150), events.recv()).await;
    assert!(result.is_err(), "unexpected event: {:?}", result);
}

async fn wait_for_status(
    manager: &ScaleManager,
    condition: impl Fn(&SessionStatus) -> bool,
) -> SessionStatus {
    for _ in 0..100 {
        let statuses = manager.status().await.unwrap();
        if let Some(status) = statuses.into_iter().find(|s| s.endpoint == PORT) {
            if condition(&status) {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached the expected status");
}

#[tokio::test]
async fn test_identical_readings_emit_once() {
    let (manager, transport) = manager(FramingMode::TextToken);
    let mut events = manager.subscribe();
    let mut scale = start(&manager, &transport).await;

    scale.send(b"+0012502\r+0012502\r").await.unwrap();
    let event = next_event(&mut events).await;
    assert_eq!(event.endpoint, PORT);
    assert!((event.value - 12.5).abs() < 1e-9);
    assert_eq!(event.decimal_places, 2);
    assert_no_event(&mut events).await;

    let status = wait_for_status(&manager, |s| s.diagnostics.frames_decoded == 2).await;
    assert_eq!(status.diagnostics.weights_emitted, 1);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unterminated_noise_is_capped() {
    let (manager, transport) = manager(FramingMode::DelimitedAscii);
    let mut events = manager.subscribe();
    let mut scale = start(&manager, &transport).await;

    let mut noise = vec![0x02];
    noise.extend(std::iter::repeat(b'4').take(149));
    scale.send(&noise).await.unwrap();

    let status = wait_for_status(&manager, |s| s.diagnostics.bytes_received == 150).await;
    assert!(status.diagnostics.buffered_bytes <= 100);
    assert_eq!(status.diagnostics.buffer_trims, 1);

    // The start marker was discarded with the prefix; closing it yields nothing.
    scale.send(&[0x03]).await.unwrap();
    assert_no_event(&mut events).await;
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bad_binary_frame_does_not_corrupt_next() {
    let (manager, transport) = manager(FramingMode::DelimitedBinary);
    let mut events = manager.subscribe();
    let mut scale = start(&manager, &transport).await;

    scale
        .send(b"\x02+00a0002\x03\x02+0010002\x03")
        .await
        .unwrap();
    let event = next_event(&mut events).await;
    assert!((event.value - 10.0).abs() < 1e-9);
    assert_eq!(event.decimal_places, 2);
    assert_no_event(&mut events).await;

    let status = wait_for_status(&manager, |s| s.diagnostics.frames_decoded == 1).await;
    assert_eq!(status.diagnostics.frames_dropped, 1);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_clears_change_baseline() {
    let (manager, transport) = manager(FramingMode::TextToken);
    let mut events = manager.subscribe();

    let mut scale = start(&manager, &transport).await;
    scale.send(b"-0004251\r").await.unwrap();
    let before = next_event(&mut events).await;
    assert!((before.value + 42.5).abs() < 1e-9);

    manager.stop().await.unwrap();
    let mut scale = start(&manager, &transport).await;
    scale.send(b"-0004251\r").await.unwrap();
    let after = next_event(&mut events).await;
    assert_eq!(after.value, before.value);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_forced_decimals_apply_to_implicit_frames() {
    let (manager, transport) = manager(FramingMode::DelimitedAscii);
    let mut events = manager.subscribe();
    manager
        .start_with_forced_decimal_places(None, 3)
        .await
        .unwrap();
    let mut scale = transport.take_scale(PORT).unwrap();

    scale.send(b"\x02+000012345\x03").await.unwrap();
    let event = next_event(&mut events).await;
    assert!((event.value - 12.345).abs() < 1e-9);
    assert_eq!(event.decimal_places, 3);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_open_failure_registers_no_session() {
    let (manager, transport) = manager(FramingMode::DelimitedAscii);
    transport.set_unavailable(PORT);

    match manager.start(None).await {
        Err(ScaleError::Open { endpoint, source }) => {
            assert_eq!(endpoint, PORT);
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected an open error, got {:?}", other),
    }
    assert!(manager.status().await.unwrap().is_empty());
    assert_eq!(transport.open_count(), 0);

    // No automatic retry: only an explicit start opens again.
    transport.set_available(PORT);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.call_log().len(), 1);
    start(&manager, &transport).await;
    assert_eq!(transport.open_count(), 1);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_start_closes_first_link() {
    let (manager, transport) = manager(FramingMode::TextToken);
    let mut first = start(&manager, &transport).await;
    let first_id = manager.status().await.unwrap()[0].session_id;

    let _second = start(&manager, &transport).await;
    assert!(first.closed_within(Duration::from_millis(500)).await);
    assert_eq!(transport.open_count(), 2);

    let statuses = manager.status().await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_ne!(statuses[0].session_id, first_id);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_polled_session_sends_poll_byte() {
    let (manager, transport) = manager(FramingMode::DelimitedAscii);
    let mut scale = start(&manager, &transport).await;

    let written = scale
        .read_exact_within(3, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(written, vec![ENQ; 3]);

    let status = wait_for_status(&manager, |s| s.diagnostics.polls_sent >= 3).await;
    assert_eq!(status.line.baud_rate, 9600);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_text_token_session_never_polls() {
    let (manager, transport) = manager(FramingMode::TextToken);
    let mut scale = start(&manager, &transport).await;
    assert_eq!(scale.line().baud_rate, 1200);
    assert_eq!(scale.line().data_bits, 7);

    assert!(scale.drain_for(Duration::from_millis(150)).await.is_empty());
    let status = manager.status().await.unwrap().remove(0);
    assert_eq!(status.diagnostics.polls_sent, 0);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_no_poll_after_stop() {
    let (manager, transport) = manager(FramingMode::DelimitedBinary);
    let mut scale = start(&manager, &transport).await;
    scale
        .read_exact_within(1, Duration::from_secs(1))
        .await
        .unwrap();

    manager.stop().await.unwrap();
    // The link is already closed, so any pending poll bytes end in EOF.
    assert!(scale.closed_within(Duration::from_millis(100)).await);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_transport_error_degrades_until_restart() {
    let (manager, transport) = manager(FramingMode::TextToken);
    let mut events = manager.subscribe();
    let mut scale = start(&manager, &transport).await;

    scale.inject_read_fault().await.unwrap();
    let status = wait_for_status(&manager, |s| s.state == SessionState::Closed).await;
    assert!(status
        .last_error
        .as_deref()
        .unwrap()
        .contains("injected transport fault"));

    // Degraded: still registered, not reopened, diagnostics refused.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(manager.status().await.unwrap().len(), 1);
    assert!(matches!(manager.test().await, Err(ScaleError::NotConnected)));

    let stopped = manager.stop().await.unwrap();
    assert_eq!(stopped.len(), 1);
    assert!(stopped[0].last_error.is_some());

    let mut scale = start(&manager, &transport).await;
    scale.send(b"+0000100\r").await.unwrap();
    assert!((next_event(&mut events).await.value - 10.0).abs() < 1e-9);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_diagnostic_sequence_is_written_in_order() {
    let (manager, transport) = manager(FramingMode::TextToken);
    let mut scale = start(&manager, &transport).await;

    let endpoints = manager.test().await.unwrap();
    assert_eq!(endpoints, vec![PORT.to_string()]);

    let written = scale
        .read_exact_within(10, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(written, b"\x05Z\r\nT\r\nP\r\n".to_vec());
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_diagnostics_stop_with_session() {
    let transport = MockTransport::new();
    let slow = ScaleSettings {
        test_command_delay: Duration::from_millis(200),
        ..settings(FramingMode::TextToken)
    };
    let manager = ScaleManager::spawn(slow, Arc::new(transport.clone()));
    let mut scale = start(&manager, &transport).await;

    manager.test().await.unwrap();
    let first = scale
        .read_exact_within(1, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(first, vec![ENQ]);

    manager.stop().await.unwrap();
    assert!(scale.closed_within(Duration::from_millis(100)).await);
    assert!(matches!(manager.test().await, Err(ScaleError::NotConnected)));
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sessions_on_separate_endpoints() {
    let (manager, transport) = manager(FramingMode::TextToken);
    let mut events = manager.subscribe();

    manager.start(Some("COM4")).await.unwrap();
    manager.start(Some("COM5")).await.unwrap();
    let mut com4 = transport.take_scale("COM4").unwrap();
    let mut com5 = transport.take_scale("COM5").unwrap();

    com5.send(b"+0000302\r").await.unwrap();
    let event = next_event(&mut events).await;
    assert_eq!(event.endpoint, "COM5");
    assert!((event.value - 0.3).abs() < 1e-9);

    let stopped = manager.stop_endpoint("COM4").await.unwrap().unwrap();
    assert_eq!(stopped.endpoint, "COM4");
    assert!(com4.closed_within(Duration::from_millis(200)).await);

    let remaining = manager.status().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].endpoint, "COM5");
    manager.shutdown().await.unwrap();
}
