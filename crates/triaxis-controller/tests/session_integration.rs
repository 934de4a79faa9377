//! Integration tests for the session lifecycle over the simulated transport.
//!
//! These drive `SessionManager`, `DiscoveryService` and `CommandDispatcher`
//! through their public API the way the UI bridge does, with a
//! `SimulatedTransport` standing in for the boards.  Tests that depend on
//! connect delays or timeouts run with the Tokio clock paused, so they are
//! instant and deterministic.
//!
//! They verify:
//!
//! - scan ranking for both transport kinds,
//! - the single-session invariant (count 1 after connect, 0 after disconnect),
//! - the busy gate (a second connect while the first is pending fails fast),
//! - timeout, refusal and link loss all end back in `Idle`,
//! - a caller that gives up on a connect or disconnect never wedges the gate,
//! - keepalive pings keep a live board connected and drop a silent one,
//! - an emergency stop overtakes moves that are still queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};
use triaxis_controller::application::discovery::DiscoveryService;
use triaxis_controller::application::dispatch::CommandDispatcher;
use triaxis_controller::application::errors::ControlError;
use triaxis_controller::application::events::ControllerEvent;
use triaxis_controller::application::session::{
    SessionManager, SessionPhase, SessionSettings, SessionState, StopOutcome,
};
use triaxis_controller::application::transport::TransportSet;
use triaxis_controller::infrastructure::transport::{
    local_network_fixtures, short_range_fixtures, SimulatedBehaviour, SimulatedTransport,
};
use triaxis_core::protocol::messages::RejectReason;
use triaxis_core::{Axis, AxisBank, ControlMessage, Device, TransportKind};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn settings() -> SessionSettings {
    SessionSettings {
        connect_timeout: Duration::from_secs(5),
        keepalive_interval: None,
        ..SessionSettings::default()
    }
}

fn manager(transport: SimulatedTransport) -> Arc<SessionManager> {
    let (events, _) = broadcast::channel(64);
    Arc::new(SessionManager::new(
        TransportSet::new().with(Arc::new(transport)),
        settings(),
        events,
    ))
}

fn board(index: usize) -> Device {
    short_range_fixtures().remove(index)
}

/// Waits (on the paused clock, so instantly) for the first event matching
/// `pred`.
async fn next_event<F>(rx: &mut broadcast::Receiver<ControllerEvent>, pred: F) -> ControllerEvent
where
    F: Fn(&ControllerEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event did not arrive")
}

// ── Discovery ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_short_range_scan_ranks_fixture_boards_strongest_first() {
    // Arrange
    let (events, _) = broadcast::channel(16);
    let transports = TransportSet::new().with(Arc::new(SimulatedTransport::short_range()));
    let (service, _rx) = DiscoveryService::new(transports, events);

    // Act
    let devices = service.scan(TransportKind::ShortRange).await;

    // Assert
    let signals: Vec<i16> = devices.iter().map(|d| d.signal_dbm).collect();
    assert_eq!(signals, vec![-38, -45, -62]);
}

#[tokio::test(start_paused = true)]
async fn test_local_network_scan_ranks_fixture_boards_strongest_first() {
    let (events, _) = broadcast::channel(16);
    let transports = TransportSet::new().with(Arc::new(SimulatedTransport::local_network()));
    let (service, _rx) = DiscoveryService::new(transports, events);

    let devices = service.scan(TransportKind::LocalNetwork).await;

    let signals: Vec<i16> = devices.iter().map(|d| d.signal_dbm).collect();
    assert_eq!(signals, vec![-35, -42, -50]);
    assert_eq!(devices[0].id, local_network_fixtures()[0].id);
}

#[tokio::test(start_paused = true)]
async fn test_scan_with_no_boards_is_empty_not_an_error() {
    let (events, _) = broadcast::channel(16);
    let empty = SimulatedTransport::with_fixtures(TransportKind::ShortRange, Vec::new());
    let (service, _rx) = DiscoveryService::new(TransportSet::new().with(Arc::new(empty)), events);

    assert!(service.scan(TransportKind::ShortRange).await.is_empty());
}

// ── Session lifecycle ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_exactly_one_session_after_connect_and_none_after_disconnect() {
    // Arrange
    let manager = manager(SimulatedTransport::short_range());

    // Act
    let info = assert_ok!(manager.connect(board(0)).await);
    let connected_count = manager.session_count().await;
    assert_ok!(manager.disconnect().await);

    // Assert
    assert_eq!(info.device.name, "StepperController_BT01");
    assert_eq!(connected_count, 1);
    assert_eq!(manager.session_count().await, 0);
    assert_eq!(manager.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_second_connect_while_first_is_pending_is_already_busy() {
    // Arrange: a 2 s connect delay keeps the first attempt in flight
    let manager = manager(SimulatedTransport::short_range());
    let mut state = manager.subscribe_state();
    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(board(0)).await })
    };
    assert_ok!(
        state
            .wait_for(|s| s.phase() == SessionPhase::Connecting)
            .await
    );

    // Act
    let second = manager.connect(board(1)).await;

    // Assert
    assert!(matches!(second, Err(ControlError::AlreadyBusy)));
    let info = assert_ok!(first.await.unwrap());
    assert_eq!(info.device.id, board(0).id);
    assert_eq!(manager.session_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_is_already_busy() {
    let manager = manager(SimulatedTransport::short_range());
    let mut state = manager.subscribe_state();
    let pending = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(board(2)).await })
    };
    assert_ok!(
        state
            .wait_for(|s| s.phase() == SessionPhase::Connecting)
            .await
    );

    assert!(matches!(
        manager.disconnect().await,
        Err(ControlError::AlreadyBusy)
    ));
    assert_ok!(pending.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_board_that_never_answers_times_out_back_to_idle() {
    // Arrange
    let transport = SimulatedTransport::short_range()
        .with_behaviour("AA:BB:CC:DD:EE:FF", SimulatedBehaviour::Hang);
    let manager = manager(transport);
    let mut events = manager.subscribe_events();

    // Act
    let err = assert_err!(manager.connect(board(1)).await);

    // Assert
    assert!(matches!(err, ControlError::ConnectTimeout { after, .. } if after == Duration::from_secs(5)));
    assert_eq!(manager.state(), SessionState::Idle);
    let failed = next_event(&mut events, |e| {
        matches!(e, ControllerEvent::ConnectFailed { .. })
    })
    .await;
    assert!(matches!(failed, ControllerEvent::ConnectFailed { reason, .. } if reason.contains("timed out")));
}

#[tokio::test(start_paused = true)]
async fn test_refusal_and_unreachable_are_distinguishable() {
    // Arrange
    let transport = SimulatedTransport::short_range()
        .with_behaviour(
            "00:11:22:33:44:55",
            SimulatedBehaviour::Reject(RejectReason::Occupied),
        )
        .with_behaviour("12:34:56:78:90:AB", SimulatedBehaviour::Unreachable);
    let manager = manager(transport);

    // Act
    let refused = assert_err!(manager.connect(board(0)).await);
    let unreachable = assert_err!(manager.connect(board(2)).await);

    // Assert
    assert!(matches!(refused, ControlError::ConnectRejected { .. }));
    assert!(refused.to_string().contains("in use by another controller"));
    assert!(matches!(unreachable, ControlError::Unreachable { .. }));
    assert_eq!(manager.session_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_connected_is_rejected_without_replacing_session() {
    let manager = manager(SimulatedTransport::short_range());
    let first = assert_ok!(manager.connect(board(0)).await);

    let err = assert_err!(manager.connect(board(1)).await);

    assert!(matches!(err, ControlError::AlreadyConnected { device } if device == board(0).id));
    assert_eq!(manager.state().session(), Some(&first));
}

#[tokio::test(start_paused = true)]
async fn test_severed_link_drops_session_and_moves_report_link_lost() {
    // Arrange
    let transport = Arc::new(SimulatedTransport::short_range());
    let (events, _) = broadcast::channel(64);
    let manager = Arc::new(SessionManager::new(
        TransportSet::new().with(transport.clone()),
        settings(),
        events,
    ));
    let dispatcher = CommandDispatcher::new(Arc::clone(&manager), AxisBank::default(), 10);
    let mut events = manager.subscribe_events();
    assert_ok!(manager.connect(board(0)).await);

    // Act: the next write fails and the writer tears the session down
    transport.sever_links();
    assert_ok!(dispatcher.move_axis(Axis::Z, 40).await);
    let lost = next_event(&mut events, |e| matches!(e, ControllerEvent::LinkLost { .. })).await;
    let after = dispatcher.move_axis(Axis::Z, 40).await;
    assert_ok!(manager.disconnect().await);
    let acknowledged = dispatcher.move_axis(Axis::Z, 40).await;

    // Assert
    assert!(matches!(lost, ControllerEvent::LinkLost { device, .. } if device == board(0).id));
    assert_eq!(manager.state(), SessionState::Idle);
    assert_eq!(manager.session_count().await, 0);
    assert!(matches!(after, Err(ControlError::LinkLost { device, .. }) if device == board(0).id));
    assert!(matches!(acknowledged, Err(ControlError::NotConnected)));
    assert_eq!(dispatcher.axes().await.get(Axis::Z).position, 40);
}

// ── Abandoned calls ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_abandoned_connect_to_silent_board_times_out_and_frees_the_gate() {
    // Arrange
    let transport = SimulatedTransport::short_range()
        .with_behaviour("AA:BB:CC:DD:EE:FF", SimulatedBehaviour::Hang);
    let manager = manager(transport);
    let mut state = manager.subscribe_state();

    // Act: the caller gives up long before the 5 s connect timeout
    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), manager.connect(board(1))).await;
    assert_ok!(state.wait_for(|s| *s == SessionState::Idle).await);
    let retry = manager.connect(board(0)).await;

    // Assert
    assert!(abandoned.is_err());
    let info = assert_ok!(retry);
    assert_eq!(info.device.id, board(0).id);
    assert_eq!(manager.session_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_connect_to_answering_board_still_connects() {
    let manager = manager(SimulatedTransport::short_range());
    let mut state = manager.subscribe_state();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), manager.connect(board(0))).await;
    assert_ok!(state.wait_for(|s| s.is_connected()).await);

    assert!(abandoned.is_err());
    assert_eq!(manager.session_count().await, 1);
    assert_ok!(manager.disconnect().await);
    assert_eq!(manager.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_disconnect_still_reaches_idle() {
    // Arrange: the goodbye frame takes 100 ms to write
    let transport = SimulatedTransport::short_range().with_send_delay(Duration::from_millis(100));
    let recorder = transport.recorder();
    let manager = manager(transport);
    let mut state = manager.subscribe_state();
    assert_ok!(manager.connect(board(0)).await);

    // Act
    let abandoned =
        tokio::time::timeout(Duration::from_millis(1), manager.disconnect()).await;
    assert_ok!(state.wait_for(|s| *s == SessionState::Idle).await);
    let reconnect = manager.connect(board(0)).await;

    // Assert
    assert!(abandoned.is_err());
    assert_ok!(reconnect);
    assert!(recorder
        .messages_for(&board(0).id)
        .iter()
        .any(|m| matches!(m, ControlMessage::Disconnect { .. })));
}

// ── Keepalive ─────────────────────────────────────────────────────────────────

fn keepalive_manager(transport: SimulatedTransport) -> Arc<SessionManager> {
    let (events, _) = broadcast::channel(64);
    Arc::new(SessionManager::new(
        TransportSet::new().with(Arc::new(transport)),
        SessionSettings {
            keepalive_interval: Some(Duration::from_millis(500)),
            ..settings()
        },
        events,
    ))
}

#[tokio::test(start_paused = true)]
async fn test_board_answering_pings_stays_connected() {
    // Arrange
    let transport = SimulatedTransport::short_range();
    let recorder = transport.recorder();
    let manager = keepalive_manager(transport);
    assert_ok!(manager.connect(board(0)).await);

    // Act
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Assert
    assert!(manager.state().is_connected());
    let pings = recorder
        .messages_for(&board(0).id)
        .iter()
        .filter(|m| matches!(m, ControlMessage::Ping(_)))
        .count();
    assert!(pings >= 15, "only {pings} pings sent");
}

#[tokio::test(start_paused = true)]
async fn test_board_that_stops_answering_pings_is_dropped_as_link_lost() {
    // Arrange
    let transport = SimulatedTransport::short_range()
        .with_behaviour("00:11:22:33:44:55", SimulatedBehaviour::Silent);
    let manager = keepalive_manager(transport);
    let dispatcher = CommandDispatcher::new(Arc::clone(&manager), AxisBank::default(), 10);
    let mut events = manager.subscribe_events();
    assert_ok!(manager.connect(board(0)).await);

    // Act
    let lost = next_event(&mut events, |e| matches!(e, ControllerEvent::LinkLost { .. })).await;
    let after = dispatcher.move_axis(Axis::X, 10).await;

    // Assert
    assert!(matches!(lost, ControllerEvent::LinkLost { reason, .. } if reason.contains("keepalive")));
    assert_eq!(manager.state(), SessionState::Idle);
    assert!(matches!(after, Err(ControlError::LinkLost { .. })));
}

// ── Emergency stop ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_overtakes_queued_moves() {
    // Arrange: a slow board so moves pile up in the queue
    let transport = SimulatedTransport::short_range().with_send_delay(Duration::from_millis(100));
    let recorder = transport.recorder();
    let manager = manager(transport);
    let dispatcher = CommandDispatcher::new(Arc::clone(&manager), AxisBank::default(), 10);
    let mut events = manager.subscribe_events();
    let device = board(0);
    assert_ok!(manager.connect(device.clone()).await);

    // Act
    for _ in 0..5 {
        assert_ok!(dispatcher.move_axis(Axis::X, 100).await);
    }
    let outcome = dispatcher.emergency_stop().await;
    let sent = next_event(&mut events, |e| {
        matches!(e, ControllerEvent::EmergencyStopSent { .. })
    })
    .await;

    // Assert
    assert_eq!(outcome, StopOutcome::Dispatched { device: device.id.clone() });
    let ControllerEvent::EmergencyStopSent { discarded_moves, .. } = sent else {
        unreachable!()
    };
    let frames = recorder.messages_for(&device.id);
    let moves_written = frames
        .iter()
        .filter(|m| matches!(m, ControlMessage::MoveAxis(_)))
        .count();
    assert_eq!(frames.last(), Some(&ControlMessage::EmergencyStop));
    assert_eq!(moves_written + discarded_moves, 5);
    assert!(moves_written <= 1, "at most the in-flight move is written");
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_completes_while_connect_is_outstanding() {
    // Arrange
    let transport = SimulatedTransport::short_range()
        .with_behaviour("00:11:22:33:44:55", SimulatedBehaviour::Hang);
    let manager = manager(transport);
    let mut state = manager.subscribe_state();
    let pending = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(board(0)).await })
    };
    assert_ok!(
        state
            .wait_for(|s| s.phase() == SessionPhase::Connecting)
            .await
    );

    // Act
    let outcome = manager.emergency_stop().await;

    // Assert
    assert_eq!(outcome, StopOutcome::NotConnected);
    assert!(matches!(
        pending.await.unwrap(),
        Err(ControlError::ConnectTimeout { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_is_dispatched_while_a_scan_is_running() {
    // Arrange
    let transport = Arc::new(SimulatedTransport::short_range());
    let recorder = transport.recorder();
    let (events, _) = broadcast::channel(64);
    let transports = TransportSet::new().with(transport);
    let manager = SessionManager::new(transports.clone(), settings(), events.clone());
    let (discovery, mut scans) = DiscoveryService::new(transports, events);
    let discovery = Arc::new(discovery);
    assert_ok!(manager.connect(board(0)).await);

    // Act: the scan takes 1 s of simulated time; stop while it runs
    discovery.spawn_scan(TransportKind::ShortRange);
    let outcome = manager.emergency_stop().await;
    let scan = scans.recv().await.expect("scan result");

    // Assert
    assert!(matches!(outcome, StopOutcome::Dispatched { .. }));
    assert_eq!(scan.devices.len(), 3);
    assert!(manager.state().is_connected());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(recorder
        .messages_for(&board(0).id)
        .contains(&ControlMessage::EmergencyStop));
}
