//! Concrete [`Transport`](crate::application::transport::Transport)
//! implementations.

pub mod network;
pub mod simulated;

pub use network::{resolve_endpoint, NetworkTransport};
pub use simulated::{
    local_network_fixtures, short_range_fixtures, FrameRecorder, RecordedFrame,
    SimulatedBehaviour, SimulatedTransport,
};
