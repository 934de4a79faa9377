//! All TriAxis link message types.
//!
//! This is a placeholder contract between the controller application and the
//! board firmware: no firmware framing exists yet, so the layout below is the
//! one the controller speaks and the one a firmware implementation must match.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::axis::Axis;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common message header in bytes.
pub const HEADER_SIZE: usize = 24;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Session control (0x00–0x3F)
    Hello = 0x01,
    HelloAck = 0x02,
    Ping = 0x03,
    Pong = 0x04,
    Disconnect = 0x05,
    // Motion (0x40–0x7F)
    MoveAxis = 0x40,
    EmergencyStop = 0x4F,
    // Discovery (0x80–0x8F)
    DiscoveryRequest = 0x80,
    DiscoveryAnnounce = 0x81,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Hello),
            0x02 => Ok(MessageType::HelloAck),
            0x03 => Ok(MessageType::Ping),
            0x04 => Ok(MessageType::Pong),
            0x05 => Ok(MessageType::Disconnect),
            0x40 => Ok(MessageType::MoveAxis),
            0x4F => Ok(MessageType::EmergencyStop),
            0x80 => Ok(MessageType::DiscoveryRequest),
            0x81 => Ok(MessageType::DiscoveryAnnounce),
            _ => Err(()),
        }
    }
}

/// Delivery priority carried in the header.
///
/// Firmware must act on a `Critical` frame before any `Normal` frame it has
/// buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Normal = 0x00,
    Critical = 0xFF,
}

impl TryFrom<u8> for Priority {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(Priority::Normal),
            0xFF => Ok(Priority::Critical),
            _ => Err(()),
        }
    }
}

// ── Common message header ─────────────────────────────────────────────────────

/// 24-byte header prepended to every message on the wire.
///
/// ```text
/// [version:1][msg_type:1][priority:1][reserved:1][payload_len:4][seq:8][timestamp_us:8]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub version: u8,
    pub message_type: MessageType,
    pub priority: Priority,
    pub payload_length: u32,
    pub sequence_number: u64,
    pub timestamp_us: u64,
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// Sent by the controller right after the link opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub protocol_version: u8,
    /// Stable id of the controller install; lets a board recognise a
    /// reconnect from the controller that already holds it.
    pub controller_id: Uuid,
    /// Display name of the controlling application instance.
    pub controller_name: String,
}

/// Why a board refused a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RejectReason {
    None = 0x00,
    VersionMismatch = 0x01,
    /// Another controller already holds the board.
    Occupied = 0x02,
    /// The board is in a fault or e-stop latch and refuses new sessions.
    Faulted = 0x03,
}

impl TryFrom<u8> for RejectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(RejectReason::None),
            0x01 => Ok(RejectReason::VersionMismatch),
            0x02 => Ok(RejectReason::Occupied),
            0x03 => Ok(RejectReason::Faulted),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RejectReason::None => "no reason given",
            RejectReason::VersionMismatch => "protocol version mismatch",
            RejectReason::Occupied => "device is in use by another controller",
            RejectReason::Faulted => "device is faulted",
        };
        f.write_str(text)
    }
}

/// Board reply to [`HelloMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAckMessage {
    pub accepted: bool,
    pub reject_reason: RejectReason,
    /// Firmware-reported board name.
    pub device_name: String,
}

/// Relative move of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveAxisMessage {
    pub axis: Axis,
    /// Signed step delta.
    pub steps: i32,
    pub speed: u16,
    pub torque: u8,
}

/// Reason byte carried in a `Disconnect` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DisconnectReason {
    UserInitiated = 0x00,
    Shutdown = 0x01,
    Timeout = 0x02,
}

impl TryFrom<u8> for DisconnectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(DisconnectReason::UserInitiated),
            0x01 => Ok(DisconnectReason::Shutdown),
            0x02 => Ok(DisconnectReason::Timeout),
            _ => Err(()),
        }
    }
}

/// A board's answer to a discovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryAnnounceMessage {
    /// TCP port the board accepts control sessions on.
    pub control_port: u16,
    /// Link quality the board measured for the request.
    pub signal_dbm: i16,
    pub device_name: String,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Every message that can travel over a TriAxis link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    Hello(HelloMessage),
    HelloAck(HelloAckMessage),
    Ping(u64),
    Pong(u64),
    Disconnect { reason: DisconnectReason },
    MoveAxis(MoveAxisMessage),
    EmergencyStop,
    DiscoveryRequest,
    DiscoveryAnnounce(DiscoveryAnnounceMessage),
}

impl ControlMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ControlMessage::Hello(_) => MessageType::Hello,
            ControlMessage::HelloAck(_) => MessageType::HelloAck,
            ControlMessage::Ping(_) => MessageType::Ping,
            ControlMessage::Pong(_) => MessageType::Pong,
            ControlMessage::Disconnect { .. } => MessageType::Disconnect,
            ControlMessage::MoveAxis(_) => MessageType::MoveAxis,
            ControlMessage::EmergencyStop => MessageType::EmergencyStop,
            ControlMessage::DiscoveryRequest => MessageType::DiscoveryRequest,
            ControlMessage::DiscoveryAnnounce(_) => MessageType::DiscoveryAnnounce,
        }
    }

    /// Header priority for this message; only the stop command is critical.
    pub fn priority(&self) -> Priority {
        match self {
            ControlMessage::EmergencyStop => Priority::Critical,
            _ => Priority::Normal,
        }
    }
}
