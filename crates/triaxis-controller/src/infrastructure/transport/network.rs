//! Local-network transport: UDP broadcast discovery and a TCP control link.
//!
//! # Discovery
//!
//! The controller broadcasts one `DiscoveryRequest` datagram to the discovery
//! port and collects `DiscoveryAnnounce` replies until the scan window
//! closes.  Each reply becomes a [`Device`] whose id is the sender's IP plus
//! the control port the board announced (`192.168.1.150:24810`).
//!
//! The socket is a blocking `std::net::UdpSocket` with a short read timeout,
//! driven from `spawn_blocking` so the runtime threads never block on it.
//!
//! # Control link
//!
//! `open` connects a `tokio::net::TcpStream`, writes `Hello` and reads one
//! frame back: header first, then exactly the declared payload.  Anything
//! other than an accepting `HelloAck` ends the attempt.
//!
//! Once accepted, the stream is split.  A reader task owns the read half and
//! forwards every decoded frame (and finally the error or end of stream) over
//! a channel, which is what [`Link::recv`] waits on.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use triaxis_core::protocol::messages::{HelloMessage, HEADER_SIZE};
use triaxis_core::protocol::{decode_header, encode_message_now, SequenceCounter};
use triaxis_core::{decode_message, ControlMessage, Device, DeviceId, ProtocolError, TransportKind};

use crate::application::transport::{Link, Transport, TransportError};
use crate::infrastructure::storage::config::NetworkConfig;

/// How long one `recv_from` blocks before the scan deadline is rechecked.
const RECV_POLL: Duration = Duration::from_millis(100);

/// Receive buffer for announce datagrams.
const DATAGRAM_BUF_SIZE: usize = 1024;

/// Inbound frames buffered between the reader task and the session.
const INBOUND_DEPTH: usize = 32;

pub struct NetworkTransport {
    config: NetworkConfig,
}

impl NetworkTransport {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalNetwork
    }

    async fn discover(&self) -> Result<Vec<Device>, TransportError> {
        let target = format!(
            "{}:{}",
            self.config.broadcast_address, self.config.discovery_port
        );
        let window = self.config.scan_window();

        tokio::task::spawn_blocking(move || query_boards(&target, window))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?
    }

    async fn open(
        &self,
        device: &Device,
        hello: &HelloMessage,
    ) -> Result<Box<dyn Link>, TransportError> {
        let addr = resolve_endpoint(&device.id, self.config.control_port)?;
        let mut stream =
            TcpStream::connect(addr)
                .await
                .map_err(|e| TransportError::Unreachable {
                    device: device.id.to_string(),
                    reason: e.to_string(),
                })?;
        stream.set_nodelay(true)?;

        let sequence = SequenceCounter::new();
        let frame = encode_message_now(&ControlMessage::Hello(hello.clone()), sequence.next())?;
        stream.write_all(&frame).await?;

        match read_frame(&mut stream).await? {
            ControlMessage::HelloAck(ack) if ack.accepted => {
                info!(%addr, board = %ack.device_name, "handshake accepted");
                Ok(Box::new(TcpLink::start(stream, addr)))
            }
            ControlMessage::HelloAck(ack) => Err(TransportError::Rejected {
                device: device.id.to_string(),
                reason: ack.reject_reason,
            }),
            other => Err(TransportError::Protocol(ProtocolError::MalformedPayload(
                format!("expected HelloAck, got {:?}", other.message_type()),
            ))),
        }
    }
}

/// Maps a device id to a socket address.  A bare IP gets `default_port`.
///
/// # Errors
///
/// Returns [`TransportError::Unreachable`] if the id is neither `ip:port`
/// nor an IP address.
pub fn resolve_endpoint(id: &DeviceId, default_port: u16) -> Result<SocketAddr, TransportError> {
    let raw = id.as_str().trim();
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    raw.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| TransportError::Unreachable {
            device: id.to_string(),
            reason: "not an IP address or ip:port".to_string(),
        })
}

/// Sends one discovery request to `target` and gathers announcements until `window`
/// has passed.
fn query_boards(target: &str, window: Duration) -> Result<Vec<Device>, TransportError> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(RECV_POLL))?;

    let frame = encode_message_now(&ControlMessage::DiscoveryRequest, 0)?;
    socket.send_to(&frame, target)?;
    debug!(%target, "discovery request sent");

    let deadline = Instant::now() + window;
    let mut buf = [0u8; DATAGRAM_BUF_SIZE];
    let mut found = Vec::new();

    while Instant::now() < deadline {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                warn!("discovery recv error: {e}");
                continue;
            }
        };

        match decode_message(&buf[..len]) {
            Ok((ControlMessage::DiscoveryAnnounce(announce), _)) => {
                debug!(%src, name = %announce.device_name, dbm = announce.signal_dbm, "announce");
                found.push(Device::new(
                    SocketAddr::new(src.ip(), announce.control_port).to_string(),
                    announce.device_name,
                    announce.signal_dbm,
                    TransportKind::LocalNetwork,
                ));
            }
            Ok((other, _)) => {
                debug!(%src, msg_type = ?other.message_type(), "ignoring datagram on discovery socket");
            }
            Err(e) => debug!(%src, "undecodable discovery datagram: {e}"),
        }
    }

    Ok(found)
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Reads exactly one frame from `stream`.
async fn read_frame<R>(stream: &mut R) -> Result<ControlMessage, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut frame = vec![0u8; HEADER_SIZE];
    stream.read_exact(&mut frame).await?;
    let header = decode_header(&frame)?;

    frame.resize(HEADER_SIZE + header.payload_length as usize, 0);
    stream.read_exact(&mut frame[HEADER_SIZE..]).await?;

    let (msg, _) = decode_message(&frame)?;
    Ok(msg)
}

/// Forwards frames from the board until the stream ends or the link is
/// dropped.
async fn pump_inbound(
    mut read_half: OwnedReadHalf,
    peer: SocketAddr,
    tx: mpsc::Sender<Result<ControlMessage, TransportError>>,
) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(msg) => {
                if tx.send(Ok(msg)).await.is_err() {
                    return;
                }
            }
            Err(TransportError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(%peer, "board closed the stream");
                let _ = tx.send(Err(TransportError::Closed)).await;
                return;
            }
            Err(e) => {
                debug!(%peer, "inbound stream failed: {e}");
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

struct TcpLink {
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<Result<ControlMessage, TransportError>>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl TcpLink {
    fn start(stream: TcpStream, peer: SocketAddr) -> Self {
        let (read_half, writer) = stream.into_split();
        let (tx, inbound) = mpsc::channel(INBOUND_DEPTH);
        let reader = tokio::spawn(pump_inbound(read_half, peer, tx));
        Self {
            writer,
            inbound,
            reader,
            closed: false,
        }
    }
}

#[async_trait]
impl Link for TcpLink {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.writer.write_all(frame).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<ControlMessage, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.inbound.recv().await.unwrap_or(Err(TransportError::Closed))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.reader.abort();
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_endpoint_accepts_ip_and_port() {
        let addr = resolve_endpoint(&DeviceId::from("192.168.1.150:24810"), 1).unwrap();
        assert_eq!(addr, "192.168.1.150:24810".parse().unwrap());
    }

    #[test]
    fn test_resolve_endpoint_fills_in_default_port_for_bare_ip() {
        let addr = resolve_endpoint(&DeviceId::from("10.0.0.7"), 24810).unwrap();
        assert_eq!(addr.port(), 24810);
    }

    #[test]
    fn test_resolve_endpoint_rejects_radio_address() {
        let err = resolve_endpoint(&DeviceId::from("00:11:22:33:44:55"), 24810).unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));
    }

    #[test]
    fn test_is_timeout_error_recognises_timeouts_only() {
        // Arrange
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let would_block = std::io::Error::new(std::io::ErrorKind::WouldBlock, "would block");
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");

        // Act / Assert
        assert!(is_timeout_error(&timed_out));
        assert!(is_timeout_error(&would_block));
        assert!(!is_timeout_error(&refused));
    }

    #[tokio::test]
    async fn test_scan_with_no_boards_returns_empty_after_window() {
        // Arrange: nothing listens on the discovery target
        let config = NetworkConfig {
            broadcast_address: "127.0.0.1".to_string(),
            discovery_port: 9,
            scan_window_ms: 150,
            ..NetworkConfig::default()
        };
        let transport = NetworkTransport::new(config);

        // Act
        let devices = transport.discover().await.unwrap();

        // Assert
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn test_open_refused_port_is_unreachable() {
        // Arrange: bind then drop so the port is (almost certainly) closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let transport = NetworkTransport::new(NetworkConfig::default());
        let device = Device::new(
            format!("127.0.0.1:{port}"),
            "Nobody",
            -40,
            TransportKind::LocalNetwork,
        );
        let hello = HelloMessage {
            protocol_version: triaxis_core::protocol::PROTOCOL_VERSION,
            controller_id: uuid::Uuid::new_v4(),
            controller_name: "bench".to_string(),
        };

        // Act
        let result = transport.open(&device, &hello).await;

        // Assert
        assert!(matches!(result, Err(TransportError::Unreachable { .. })));
    }
}
