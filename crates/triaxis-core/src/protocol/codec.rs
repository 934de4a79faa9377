//! Binary codec for TriAxis link messages.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][priority:1][reserved:1][payload_len:4][seq:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 24 bytes. All multi-byte integers are big-endian.
//!
//! Stream transports read the header first with [`decode_header`], then read
//! exactly `payload_length` more bytes and hand the whole frame to
//! [`decode_message`].

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

use crate::domain::axis::Axis;
use crate::protocol::messages::{
    ControlMessage, DisconnectReason, DiscoveryAnnounceMessage, HelloAckMessage, HelloMessage,
    MessageHeader, MessageType, MoveAxisMessage, Priority, RejectReason, HEADER_SIZE,
    PROTOCOL_VERSION,
};

/// Largest payload a decoder will accept.  Nothing in the message set comes
/// close; the cap stops a corrupt length field from forcing a huge read.
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// A field value is out of range, a string is not UTF-8, and so on.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    #[error("payload of {0} bytes exceeds the 4096-byte limit")]
    PayloadTooLarge(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`ControlMessage`] into a byte vector including the 24-byte header.
///
/// The sequence number is **not** assigned here; pass the next value from a
/// [`crate::protocol::SequenceCounter`].
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if a string field makes the
/// payload exceed [`MAX_PAYLOAD_SIZE`].
///
/// # Examples
///
/// ```rust
/// use triaxis_core::protocol::{decode_message, encode_message, ControlMessage};
///
/// let msg = ControlMessage::Ping(42);
/// let bytes = encode_message(&msg, 0, 0).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(
    msg: &ControlMessage,
    sequence_number: u64,
    timestamp_us: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg);
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(msg.priority() as u8);
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&timestamp_us.to_be_bytes());
    buf.extend_from_slice(&payload);

    trace!(
        msg_type = ?msg.message_type(),
        seq = sequence_number,
        len = buf.len(),
        "encoded frame"
    );
    Ok(buf)
}

/// Encodes a [`ControlMessage`] stamped with the current wall-clock time.
///
/// # Errors
///
/// Same as [`encode_message`].
pub fn encode_message_now(
    msg: &ControlMessage,
    sequence_number: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let timestamp_us = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    encode_message(msg, sequence_number, timestamp_us)
}

/// Parses and validates the 24-byte header at the start of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if fewer than [`HEADER_SIZE`] bytes are given,
/// or if the version, type, priority or length fields are invalid.
pub fn decode_header(bytes: &[u8]) -> Result<MessageHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let message_type =
        MessageType::try_from(bytes[1]).map_err(|_| ProtocolError::UnknownMessageType(bytes[1]))?;
    let priority = Priority::try_from(bytes[2]).map_err(|_| {
        ProtocolError::MalformedPayload(format!("unknown priority: 0x{:02X}", bytes[2]))
    })?;
    // bytes[3] is reserved and ignored on decode

    let payload_length = read_u32(bytes, 4)?;
    if payload_length as usize > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload_length as usize));
    }

    Ok(MessageHeader {
        version,
        message_type,
        priority,
        payload_length,
        sequence_number: read_u64(bytes, 8)?,
        timestamp_us: read_u64(bytes, 16)?,
    })
}

/// Decodes one [`ControlMessage`] from the beginning of `bytes`.
///
/// Returns the message and the number of bytes consumed (header + payload),
/// so the caller can advance its read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(ControlMessage, usize), ProtocolError> {
    let header = decode_header(bytes)?;
    let payload_len = header.payload_length as usize;

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let msg = decode_payload(header.message_type, payload)?;
    Ok((msg, total_needed))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &ControlMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        ControlMessage::Hello(m) => encode_hello(&mut buf, m),
        ControlMessage::HelloAck(m) => encode_hello_ack(&mut buf, m),
        ControlMessage::Ping(token) | ControlMessage::Pong(token) => {
            buf.extend_from_slice(&token.to_be_bytes())
        }
        ControlMessage::Disconnect { reason } => buf.push(*reason as u8),
        ControlMessage::MoveAxis(m) => encode_move_axis(&mut buf, m),
        ControlMessage::EmergencyStop | ControlMessage::DiscoveryRequest => {}
        ControlMessage::DiscoveryAnnounce(m) => encode_announce(&mut buf, m),
    }
    buf
}

fn encode_hello(buf: &mut Vec<u8>, m: &HelloMessage) {
    buf.push(m.protocol_version);
    buf.extend_from_slice(m.controller_id.as_bytes());
    write_length_prefixed_string(buf, &m.controller_name);
}

fn encode_hello_ack(buf: &mut Vec<u8>, m: &HelloAckMessage) {
    buf.push(u8::from(m.accepted));
    buf.push(m.reject_reason as u8);
    write_length_prefixed_string(buf, &m.device_name);
}

fn encode_move_axis(buf: &mut Vec<u8>, m: &MoveAxisMessage) {
    buf.push(m.axis as u8);
    buf.extend_from_slice(&m.steps.to_be_bytes());
    buf.extend_from_slice(&m.speed.to_be_bytes());
    buf.push(m.torque);
}

fn encode_announce(buf: &mut Vec<u8>, m: &DiscoveryAnnounceMessage) {
    buf.extend_from_slice(&m.control_port.to_be_bytes());
    buf.extend_from_slice(&m.signal_dbm.to_be_bytes());
    write_length_prefixed_string(buf, &m.device_name);
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MessageType, p: &[u8]) -> Result<ControlMessage, ProtocolError> {
    match msg_type {
        MessageType::Hello => decode_hello(p).map(ControlMessage::Hello),
        MessageType::HelloAck => decode_hello_ack(p).map(ControlMessage::HelloAck),
        MessageType::Ping => read_u64(p, 0).map(ControlMessage::Ping),
        MessageType::Pong => read_u64(p, 0).map(ControlMessage::Pong),
        MessageType::Disconnect => {
            require_len(p, 1, "Disconnect")?;
            let reason = DisconnectReason::try_from(p[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown disconnect reason: {}", p[0]))
            })?;
            Ok(ControlMessage::Disconnect { reason })
        }
        MessageType::MoveAxis => decode_move_axis(p).map(ControlMessage::MoveAxis),
        MessageType::EmergencyStop => Ok(ControlMessage::EmergencyStop),
        MessageType::DiscoveryRequest => Ok(ControlMessage::DiscoveryRequest),
        MessageType::DiscoveryAnnounce => {
            decode_announce(p).map(ControlMessage::DiscoveryAnnounce)
        }
    }
}

fn decode_hello(p: &[u8]) -> Result<HelloMessage, ProtocolError> {
    // 1 (version) + 16 (uuid) + 2 (name_len) + name
    require_len(p, 19, "Hello")?;
    let protocol_version = p[0];
    let controller_id = read_uuid(p, 1)?;
    let (controller_name, _) = read_length_prefixed_string(p, 17)?;
    Ok(HelloMessage {
        protocol_version,
        controller_id,
        controller_name,
    })
}

fn decode_hello_ack(p: &[u8]) -> Result<HelloAckMessage, ProtocolError> {
    // 1 (accepted) + 1 (reason) + 2 (name_len) + name
    require_len(p, 4, "HelloAck")?;
    let accepted = p[0] != 0;
    let reject_reason = RejectReason::try_from(p[1]).map_err(|_| {
        ProtocolError::MalformedPayload(format!("unknown reject reason: {}", p[1]))
    })?;
    let (device_name, _) = read_length_prefixed_string(p, 2)?;
    Ok(HelloAckMessage {
        accepted,
        reject_reason,
        device_name,
    })
}

fn decode_move_axis(p: &[u8]) -> Result<MoveAxisMessage, ProtocolError> {
    // 1 (axis) + 4 (steps) + 2 (speed) + 1 (torque)
    require_len(p, 8, "MoveAxis")?;
    let axis = Axis::try_from(p[0])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown axis: {}", p[0])))?;
    let steps = i32::from_be_bytes([p[1], p[2], p[3], p[4]]);
    let speed = u16::from_be_bytes([p[5], p[6]]);
    let torque = p[7];
    Ok(MoveAxisMessage {
        axis,
        steps,
        speed,
        torque,
    })
}

fn decode_announce(p: &[u8]) -> Result<DiscoveryAnnounceMessage, ProtocolError> {
    // 2 (port) + 2 (dbm) + 2 (name_len) + name
    require_len(p, 6, "DiscoveryAnnounce")?;
    let control_port = u16::from_be_bytes([p[0], p[1]]);
    let signal_dbm = i16::from_be_bytes([p[2], p[3]]);
    let (device_name, _) = read_length_prefixed_string(p, 4)?;
    Ok(DiscoveryAnnounceMessage {
        control_port,
        signal_dbm,
        device_name,
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

/// Returns the `N` bytes at `offset`, or `InsufficientData`.
fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], ProtocolError> {
    buf.get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(ProtocolError::InsufficientData {
            needed: offset + N,
            available: buf.len(),
        })
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    read_array::<4>(buf, offset).map(u32::from_be_bytes)
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    read_array::<8>(buf, offset).map(u64::from_be_bytes)
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    read_array::<16>(buf, offset).map(Uuid::from_bytes).map_err(|_| {
        ProtocolError::MalformedPayload(format!(
            "need 16 bytes for UUID at offset {offset}, got {}",
            buf.len().saturating_sub(offset)
        ))
    })
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
///
/// Strings longer than `u16::MAX` bytes are cut at the last char boundary
/// that fits.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let mut len = s.len().min(u16::MAX as usize);
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&s.as_bytes()[..len]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after it.
fn read_length_prefixed_string(
    buf: &[u8],
    offset: usize,
) -> Result<(String, usize), ProtocolError> {
    let len = read_array::<2>(buf, offset)
        .map(u16::from_be_bytes)
        .map_err(|_| {
            ProtocolError::MalformedPayload(format!(
                "need 2 bytes for string length at offset {offset}"
            ))
        })? as usize;
    let start = offset + 2;
    let bytes = buf.get(start..start + len).ok_or_else(|| {
        ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        ))
    })?;
    let s = std::str::from_utf8(bytes)
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
