//! Application layer use cases for the controller.
//!
//! The use cases here orchestrate domain types from `triaxis_core` to fulfil
//! a user goal.  They depend only on the [`transport::Transport`] and
//! [`transport::Link`] traits; the concrete radio/network/simulated
//! implementations are injected from the infrastructure layer.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Scans one transport for boards and ranks them by
//!   signal.  Background scans are generation-stamped so the latest wins.
//!
//! - **`session`** – The connect/disconnect state machine and the per-session
//!   writer task that owns the link.
//!
//! - **`dispatch`** – Manual-control commands (move, jog, speed, torque,
//!   patterns, emergency stop) checked against the axis state and queued on
//!   the active session.
//!
//! - **`events`** / **`errors`** – What observers are told, and what callers
//!   get back when something fails.

pub mod discovery;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod session;
pub mod transport;
