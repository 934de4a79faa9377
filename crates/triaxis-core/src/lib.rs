//! # triaxis-core
//!
//! Shared library for the TriAxis controller link containing the command
//! codec and the domain entities (devices, axes, motion patterns).
//!
//! This crate has zero dependencies on OS APIs, radio stacks, or network
//! sockets.  The controller application builds on top of it.
//!
//! # Architecture overview
//!
//! A TriAxis controller is a 3-axis stepper-motor driver board that can be
//! reached over a short-range radio link or over the local IP network.  The
//! controller application finds boards, holds a single session with one of
//! them, and streams motion commands to it.
//!
//! - **`protocol`** – How commands travel over a link.  Messages are encoded
//!   into a compact binary format (24-byte header + payload) and decoded back
//!   into typed Rust values on the other end.
//!
//! - **`domain`** – Pure data and rules: the [`Device`] record produced by
//!   discovery, per-axis motion state, and the pattern library that expands a
//!   named shape into relative axis moves.

pub mod domain;
pub mod protocol;

pub use domain::axis::{Axis, AxisBank, AxisError, AxisState};
pub use domain::device::{rank_devices, Device, DeviceId, SignalQuality, TransportKind};
pub use domain::pattern::{Pattern, PatternStep};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::ControlMessage;
