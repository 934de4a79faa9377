//! In-process stand-in for real boards.
//!
//! [`SimulatedTransport`] answers scans with a fixed device list after a
//! fixed delay and opens links that decode and record every frame they are
//! handed.  It is what the console runs against when no hardware is around,
//! and what the integration tests drive the application layer with.
//!
//! Each device can be given a [`SimulatedBehaviour`] so a test can make one
//! board refuse the handshake, vanish, or never answer at all.  Accepted
//! links answer every `Ping` with a `Pong` unless the board is `Silent`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use triaxis_core::protocol::messages::{HelloMessage, RejectReason, PROTOCOL_VERSION};
use triaxis_core::{decode_message, ControlMessage, Device, DeviceId, TransportKind};

use crate::application::transport::{Link, Transport, TransportError};
use crate::infrastructure::storage::config::SimulationConfig;

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Boards a short-range scan finds.
pub fn short_range_fixtures() -> Vec<Device> {
    vec![
        Device::new("00:11:22:33:44:55", "StepperController_BT01", -45, TransportKind::ShortRange),
        Device::new("AA:BB:CC:DD:EE:FF", "TriAxis_Motor_Hub", -62, TransportKind::ShortRange),
        Device::new("12:34:56:78:90:AB", "Arduino_Stepper", -38, TransportKind::ShortRange),
    ]
}

/// Boards a local-network scan finds.
pub fn local_network_fixtures() -> Vec<Device> {
    vec![
        Device::new(
            "192.168.1.100:24810",
            "StepperController_192.168.1.100",
            -35,
            TransportKind::LocalNetwork,
        ),
        Device::new(
            "192.168.1.150:24810",
            "MotorHub_192.168.1.150",
            -50,
            TransportKind::LocalNetwork,
        ),
        Device::new(
            "192.168.1.200:24810",
            "TriAxis_192.168.1.200",
            -42,
            TransportKind::LocalNetwork,
        ),
    ]
}

// ── Frame recorder ────────────────────────────────────────────────────────────

/// One frame a simulated board received, already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub device: DeviceId,
    pub message: ControlMessage,
}

/// Shared log of every frame written to any link of one transport.
#[derive(Debug, Clone, Default)]
pub struct FrameRecorder {
    frames: Arc<Mutex<Vec<RecordedFrame>>>,
}

impl FrameRecorder {
    fn record(&self, device: &DeviceId, message: ControlMessage) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedFrame {
                device: device.clone(),
                message,
            });
    }

    /// Snapshot of everything recorded so far, in arrival order.
    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages received by `device`, in arrival order.
    pub fn messages_for(&self, device: &DeviceId) -> Vec<ControlMessage> {
        self.frames()
            .into_iter()
            .filter(|f| &f.device == device)
            .map(|f| f.message)
            .collect()
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// How a simulated board answers an `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedBehaviour {
    /// Completes the handshake after the connect delay.
    Accept,
    /// Answers the handshake with a refusal.
    Reject(RejectReason),
    /// Fails as if nothing is listening.
    Unreachable,
    /// Never answers.
    Hang,
    /// Completes the handshake, then never sends anything back.
    Silent,
}

pub struct SimulatedTransport {
    kind: TransportKind,
    devices: Vec<Device>,
    scan_delay: Duration,
    connect_delay: Duration,
    send_delay: Duration,
    behaviours: HashMap<DeviceId, SimulatedBehaviour>,
    recorder: FrameRecorder,
    severed: Arc<AtomicBool>,
}

impl SimulatedTransport {
    /// Short-range fixtures: 1 s scan, 2 s connect.
    pub fn short_range() -> Self {
        Self::with_fixtures(TransportKind::ShortRange, short_range_fixtures())
            .with_connect_delay(Duration::from_millis(2_000))
    }

    /// Local-network fixtures: 1 s scan, 1.5 s connect.
    pub fn local_network() -> Self {
        Self::with_fixtures(TransportKind::LocalNetwork, local_network_fixtures())
            .with_connect_delay(Duration::from_millis(1_500))
    }

    /// Fixture transport of `kind` with delays taken from `config`.
    pub fn from_config(kind: TransportKind, config: &SimulationConfig) -> Self {
        let (devices, connect_ms) = match kind {
            TransportKind::ShortRange => (short_range_fixtures(), config.short_range_connect_ms),
            TransportKind::LocalNetwork => {
                (local_network_fixtures(), config.local_network_connect_ms)
            }
        };
        Self::with_fixtures(kind, devices)
            .with_scan_delay(Duration::from_millis(config.scan_delay_ms))
            .with_connect_delay(Duration::from_millis(connect_ms))
    }

    /// A transport of `kind` that finds exactly `devices`.
    pub fn with_fixtures(kind: TransportKind, devices: Vec<Device>) -> Self {
        Self {
            kind,
            devices,
            scan_delay: Duration::from_millis(1_000),
            connect_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
            behaviours: HashMap::new(),
            recorder: FrameRecorder::default(),
            severed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Time each `send` takes, to make a slow board.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// Overrides how one device answers `open`; others accept.
    pub fn with_behaviour(mut self, device: impl Into<DeviceId>, behaviour: SimulatedBehaviour) -> Self {
        self.behaviours.insert(device.into(), behaviour);
        self
    }

    pub fn recorder(&self) -> FrameRecorder {
        self.recorder.clone()
    }

    /// Makes every open link fail its next send, as if the board went dark.
    pub fn sever_links(&self) {
        info!(transport = %self.kind, "severing simulated links");
        self.severed.store(true, Ordering::SeqCst);
    }

    fn behaviour_for(&self, device: &DeviceId) -> SimulatedBehaviour {
        if let Some(behaviour) = self.behaviours.get(device) {
            return *behaviour;
        }
        if self.devices.iter().any(|d| &d.id == device) {
            SimulatedBehaviour::Accept
        } else {
            SimulatedBehaviour::Unreachable
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn discover(&self) -> Result<Vec<Device>, TransportError> {
        pause(self.scan_delay).await;
        debug!(transport = %self.kind, count = self.devices.len(), "simulated scan answered");
        Ok(self.devices.clone())
    }

    async fn open(
        &self,
        device: &Device,
        hello: &HelloMessage,
    ) -> Result<Box<dyn Link>, TransportError> {
        pause(self.connect_delay).await;

        match self.behaviour_for(&device.id) {
            SimulatedBehaviour::Hang => std::future::pending().await,
            SimulatedBehaviour::Unreachable => Err(TransportError::Unreachable {
                device: device.id.to_string(),
                reason: "no answer from simulated board".to_string(),
            }),
            SimulatedBehaviour::Reject(reason) => Err(TransportError::Rejected {
                device: device.id.to_string(),
                reason,
            }),
            SimulatedBehaviour::Accept | SimulatedBehaviour::Silent
                if hello.protocol_version != PROTOCOL_VERSION =>
            {
                Err(TransportError::Rejected {
                    device: device.id.to_string(),
                    reason: RejectReason::VersionMismatch,
                })
            }
            behaviour @ (SimulatedBehaviour::Accept | SimulatedBehaviour::Silent) => {
                self.recorder
                    .record(&device.id, ControlMessage::Hello(hello.clone()));
                // A board that was severed earlier comes back for a fresh link.
                self.severed.store(false, Ordering::SeqCst);
                Ok(Box::new(SimulatedLink {
                    device: device.id.clone(),
                    recorder: self.recorder.clone(),
                    severed: Arc::clone(&self.severed),
                    send_delay: self.send_delay,
                    answers_pings: behaviour == SimulatedBehaviour::Accept,
                    replies: VecDeque::new(),
                    closed: false,
                }))
            }
        }
    }
}

// ── Link ──────────────────────────────────────────────────────────────────────

struct SimulatedLink {
    device: DeviceId,
    recorder: FrameRecorder,
    severed: Arc<AtomicBool>,
    send_delay: Duration,
    answers_pings: bool,
    /// Frames the board has "sent" and the session has not read yet.
    replies: VecDeque<ControlMessage>,
    closed: bool,
}

#[async_trait]
impl Link for SimulatedLink {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.severed.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "simulated board went away",
            )));
        }
        pause(self.send_delay).await;

        let (message, _) = decode_message(frame)?;
        if let (ControlMessage::Ping(token), true) = (&message, self.answers_pings) {
            self.replies.push_back(ControlMessage::Pong(*token));
        }
        self.recorder.record(&self.device, message);
        Ok(())
    }

    async fn recv(&mut self) -> Result<ControlMessage, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        match self.replies.pop_front() {
            Some(message) => Ok(message),
            // Replies are only queued by `send`, which the caller runs
            // between polls, so waiting here cannot miss one.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use triaxis_core::protocol::encode_message;
    use uuid::Uuid;

    impl std::fmt::Debug for dyn Link {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("Link")
        }
    }

    fn hello() -> HelloMessage {
        HelloMessage {
            protocol_version: PROTOCOL_VERSION,
            controller_id: Uuid::new_v4(),
            controller_name: "bench".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_range_scan_returns_fixtures_after_delay() {
        // Arrange
        let transport = SimulatedTransport::short_range();
        let started = tokio::time::Instant::now();

        // Act
        let devices = assert_ok!(transport.discover().await);

        // Assert
        assert_eq!(devices.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(1_000));
        assert!(devices.iter().all(|d| d.transport == TransportKind::ShortRange));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_records_hello_and_frames() {
        // Arrange
        let transport = SimulatedTransport::local_network();
        let recorder = transport.recorder();
        let device = local_network_fixtures().remove(0);

        // Act
        let mut link = assert_ok!(transport.open(&device, &hello()).await);
        let frame = encode_message(&ControlMessage::EmergencyStop, 1, 0).unwrap();
        assert_ok!(link.send(&frame).await);

        // Assert
        let messages = recorder.messages_for(&device.id);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ControlMessage::Hello(_)));
        assert_eq!(messages[1], ControlMessage::EmergencyStop);
    }

    #[tokio::test]
    async fn test_rejecting_device_returns_reason() {
        let transport = SimulatedTransport::short_range()
            .with_connect_delay(Duration::ZERO)
            .with_behaviour("AA:BB:CC:DD:EE:FF", SimulatedBehaviour::Reject(RejectReason::Occupied));
        let device = short_range_fixtures().remove(1);

        let err = assert_err!(transport.open(&device, &hello()).await);

        assert!(matches!(
            err,
            TransportError::Rejected {
                reason: RejectReason::Occupied,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_device_is_unreachable() {
        let transport = SimulatedTransport::short_range().with_connect_delay(Duration::ZERO);
        let stranger = Device::new("FE:ED:00:00:BE:EF", "Ghost", -90, TransportKind::ShortRange);

        let err = assert_err!(transport.open(&stranger, &hello()).await);

        assert!(matches!(err, TransportError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let transport = SimulatedTransport::short_range().with_connect_delay(Duration::ZERO);
        let device = short_range_fixtures().remove(0);
        let old = HelloMessage {
            protocol_version: 0x7F,
            ..hello()
        };

        let err = assert_err!(transport.open(&device, &old).await);

        assert!(matches!(
            err,
            TransportError::Rejected {
                reason: RejectReason::VersionMismatch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_severed_link_fails_sends_and_closed_link_refuses() {
        // Arrange
        let transport = SimulatedTransport::short_range().with_connect_delay(Duration::ZERO);
        let device = short_range_fixtures().remove(0);
        let mut first = assert_ok!(transport.open(&device, &hello()).await);
        let frame = encode_message(&ControlMessage::Ping(1), 1, 0).unwrap();

        // Act
        transport.sever_links();
        let severed = first.send(&frame).await;
        let mut second = assert_ok!(transport.open(&device, &hello()).await);
        assert_ok!(second.close().await);
        let closed = second.send(&frame).await;

        // Assert
        assert!(matches!(severed, Err(TransportError::Io(_))));
        assert!(matches!(closed, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_accepting_board_answers_ping_and_silent_board_does_not() {
        // Arrange
        let transport = SimulatedTransport::short_range()
            .with_connect_delay(Duration::ZERO)
            .with_behaviour("AA:BB:CC:DD:EE:FF", SimulatedBehaviour::Silent);
        let fixtures = short_range_fixtures();
        let mut chatty = assert_ok!(transport.open(&fixtures[0], &hello()).await);
        let mut silent = assert_ok!(transport.open(&fixtures[1], &hello()).await);
        let ping = encode_message(&ControlMessage::Ping(7), 1, 0).unwrap();

        // Act
        assert_ok!(chatty.send(&ping).await);
        assert_ok!(silent.send(&ping).await);
        let reply = assert_ok!(chatty.recv().await);
        let nothing =
            tokio::time::timeout(Duration::from_millis(20), silent.recv()).await;

        // Assert
        assert_eq!(reply, ControlMessage::Pong(7));
        assert!(nothing.is_err());
    }

    #[test]
    fn test_from_config_uses_configured_kind() {
        let transport =
            SimulatedTransport::from_config(TransportKind::LocalNetwork, &SimulationConfig::default());
        assert_eq!(transport.kind(), TransportKind::LocalNetwork);
        assert_eq!(transport.connect_delay, Duration::from_millis(1_500));
    }
}
