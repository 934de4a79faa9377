//! Error taxonomy shared by the session and dispatch use cases.
//!
//! Every variant is recoverable: the caller can show the message and carry
//! on.  An empty scan is not an error and has no variant here.

use std::time::Duration;

use thiserror::Error;
use triaxis_core::{AxisError, DeviceId};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("connecting to {device} timed out after {}ms", .after.as_millis())]
    ConnectTimeout { device: DeviceId, after: Duration },

    #[error("{device} rejected the connection: {reason}")]
    ConnectRejected { device: DeviceId, reason: String },

    #[error("{device} is unreachable: {reason}")]
    Unreachable { device: DeviceId, reason: String },

    /// A connect or disconnect is already in flight.
    #[error("another connect or disconnect is in progress")]
    AlreadyBusy,

    #[error("already connected to {device}; disconnect first")]
    AlreadyConnected { device: DeviceId },

    #[error("not connected to a device")]
    NotConnected,

    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] AxisError),

    #[error("lost the link to {device}: {reason}")]
    LinkLost { device: DeviceId, reason: String },

    /// The id was neither in the last scan nor a usable network address.
    #[error("unknown device {0}; run a scan first")]
    UnknownDevice(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_reports_milliseconds() {
        let err = ControlError::ConnectTimeout {
            device: DeviceId::from("AA:BB:CC:DD:EE:FF"),
            after: Duration::from_millis(1500),
        };
        assert_eq!(
            err.to_string(),
            "connecting to AA:BB:CC:DD:EE:FF timed out after 1500ms"
        );
    }

    #[test]
    fn test_axis_error_converts_to_invalid_parameter() {
        let err: ControlError = AxisError::SpeedOutOfRange(2000).into();
        assert!(matches!(err, ControlError::InvalidParameter(_)));
    }
}
