//! Domain entities for the TriAxis controller link.
//!
//! Everything in here is plain data plus the rules that govern it.  There is
//! no I/O, no async, and no knowledge of how a device is actually reached;
//! the controller crate layers transports and sessions on top.

/// Discovered devices, transport kinds, and signal ranking.
pub mod device;

/// Per-axis position, speed, and torque.
pub mod axis;

/// Named motion patterns expanded into relative axis moves.
pub mod pattern;
