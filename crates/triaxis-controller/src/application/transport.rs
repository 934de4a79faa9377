//! Device transport boundary used by the application layer.
//!
//! The use cases in this layer talk to boards only through [`Transport`] and
//! [`Link`].  Concrete implementations (simulated fixtures, UDP/TCP) live in
//! `infrastructure::transport` and are injected at construction time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use triaxis_core::protocol::messages::{DisconnectReason, HelloMessage, RejectReason};
use triaxis_core::{ControlMessage, Device, ProtocolError, TransportKind};

/// Failures raised by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing answered at the device's address.
    #[error("device {device} is unreachable: {reason}")]
    Unreachable { device: String, reason: String },

    /// The device answered and refused the session.
    #[error("device {device} refused the session: {reason}")]
    Rejected { device: String, reason: RejectReason },

    /// The link was closed underneath us.
    #[error("link closed")]
    Closed,

    /// The board stopped answering keepalive pings.
    #[error("no reply to the last {missed} keepalive pings")]
    KeepaliveTimeout { missed: u32 },

    /// The board said goodbye on its own.
    #[error("board ended the session ({reason:?})")]
    ClosedByPeer { reason: DisconnectReason },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// An open, handshaken connection to one board.
#[async_trait]
pub trait Link: Send {
    /// Writes one encoded frame.
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Waits for the next frame from the board.
    ///
    /// Must be cancel-safe: the session polls it inside `select!`.  Links
    /// with no inbound direction keep the default, which never resolves.
    async fn recv(&mut self) -> Result<ControlMessage, TransportError> {
        std::future::pending().await
    }

    /// Closes the link.  Calling it twice is harmless.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// One way of reaching boards (short-range radio or local network).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Lists the boards currently reachable, in no particular order.
    async fn discover(&self) -> Result<Vec<Device>, TransportError>;

    /// Opens a link to `device` and performs the `Hello`/`HelloAck` exchange.
    ///
    /// Implementations do not apply their own overall timeout; the session
    /// manager bounds the whole call.
    async fn open(
        &self,
        device: &Device,
        hello: &HelloMessage,
    ) -> Result<Box<dyn Link>, TransportError>;
}

/// The transports available to the application, one per kind.
#[derive(Clone, Default)]
pub struct TransportSet {
    by_kind: HashMap<TransportKind, Arc<dyn Transport>>,
}

impl TransportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transport` under its own kind, replacing any earlier one.
    pub fn with(mut self, transport: Arc<dyn Transport>) -> Self {
        self.by_kind.insert(transport.kind(), transport);
        self
    }

    pub fn get(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        self.by_kind.get(&kind).cloned()
    }
}
