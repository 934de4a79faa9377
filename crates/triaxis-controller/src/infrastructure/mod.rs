//! Infrastructure layer for the controller application.
//!
//! Contains the outward-facing adapters: the simulated and network
//! transports, file-system config storage, the UI command bridge and the
//! console front end built on it.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `triaxis_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod console;
pub mod storage;
pub mod transport;
pub mod ui_bridge;
