//! Notifications published to observers (UI bridge, console).
//!
//! The current session state is available at any time through a `watch`
//! channel; these events describe what happened, in order, over a
//! `broadcast` channel.  A slow observer may miss events (it receives
//! `Lagged`) but never blocks the publisher.

use serde::Serialize;
use triaxis_core::{Axis, Device, DeviceId, Pattern, TransportKind};
use uuid::Uuid;

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    ScanCompleted {
        transport: TransportKind,
        generation: u64,
        devices: Vec<Device>,
    },
    Connecting {
        device: Device,
    },
    Connected {
        session_id: Uuid,
        device: Device,
    },
    ConnectFailed {
        device: DeviceId,
        reason: String,
    },
    Disconnected {
        session_id: Uuid,
        device: DeviceId,
    },
    /// The link failed while connected; the session is gone.
    LinkLost {
        session_id: Uuid,
        device: DeviceId,
        reason: String,
    },
    MoveQueued {
        axis: Axis,
        steps: i32,
        position: i64,
    },
    /// The stop frame was written; `discarded_moves` queued moves were dropped.
    EmergencyStopSent {
        device: DeviceId,
        discarded_moves: usize,
    },
    /// A stop was requested with no session.
    EmergencyStopWithoutSession,
    PatternFinished {
        pattern: Pattern,
        moves: usize,
        interrupted: bool,
    },
}
