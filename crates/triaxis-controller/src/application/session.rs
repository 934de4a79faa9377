//! SessionManager: owns the single active link to a board.
//!
//! # State machine
//!
//! ```text
//!            connect()                  open ok
//!   Idle ───────────────► Connecting ───────────► Connected
//!    ▲                        │                      │  │
//!    │   timeout / refused    │                      │  │ link lost
//!    ├────────────────────────┘                      │  │
//!    │                              disconnect()     │  │
//!    ├──────────── Disconnecting ◄───────────────────┘  │
//!    └──────────────────────────────────────────────────┘
//! ```
//!
//! The current state lives in a `watch` channel and every change goes
//! through a compare-and-set ([`watch::Sender::send_if_modified`]), so two
//! callers can never both leave `Idle`.  A call that finds a transition
//! already in flight fails with [`ControlError::AlreadyBusy`] instead of
//! waiting.
//!
//! # Writer task
//!
//! Each session gets one writer task that owns the [`Link`].  Callers never
//! touch the link; they push onto one of two queues:
//!
//! - the **stop** queue, polled first on every iteration, and
//! - the **move** queue, bounded by `move_queue_depth`.
//!
//! When a stop is taken off its queue, every move still waiting is dropped
//! before the stop frame is written.
//!
//! The writer also reads whatever the board sends.  A `Ping` is answered, a
//! `Disconnect` or end of stream ends the session, and any frame counts as
//! a sign of life.  With keepalive on, the session is dropped once
//! `KEEPALIVE_MISSES` pings in a row go unanswered.
//!
//! The `active` mutex guards the handle to that task.  It is held only for
//! short bookkeeping and never across `Transport::open`, so an emergency
//! stop can always reach the queue even while a connect is outstanding.
//!
//! # Cancellation
//!
//! The work behind `connect` and `disconnect` runs on a spawned task that
//! the caller only awaits.  A caller that gives up (a `select!`, a
//! `timeout`) never strands the state in `Connecting` or `Disconnecting`.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use triaxis_core::protocol::messages::{
    DisconnectReason, HelloMessage, MoveAxisMessage, PROTOCOL_VERSION,
};
use triaxis_core::protocol::{encode_message_now, SequenceCounter};
use triaxis_core::{ControlMessage, Device, DeviceId};
use uuid::Uuid;

use crate::application::errors::ControlError;
use crate::application::events::ControllerEvent;
use crate::application::transport::{Link, TransportError, TransportSet};

/// Capacity of the stop queue.  Stops coalesce, so a handful is plenty.
const STOP_QUEUE_DEPTH: usize = 4;

/// Unanswered keepalive pings after which the link counts as lost.
const KEEPALIVE_MISSES: u32 = 3;

// ── Settings ──────────────────────────────────────────────────────────────────

/// Runtime knobs for the session manager.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub controller_id: Uuid,
    pub controller_name: String,
    /// Upper bound on the whole open + handshake.
    pub connect_timeout: Duration,
    /// `None` disables keepalive pings.
    pub keepalive_interval: Option<Duration>,
    pub move_queue_depth: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            controller_id: Uuid::new_v4(),
            controller_name: "TriAxis Controller".to_string(),
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: None,
            move_queue_depth: 64,
        }
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

/// The session observers see while a board is connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub device: Device,
}

/// Phase of the state machine without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting { device: Device },
    Connected { session: SessionInfo },
    Disconnecting { session: SessionInfo },
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Connecting { .. } => SessionPhase::Connecting,
            SessionState::Connected { .. } => SessionPhase::Connected,
            SessionState::Disconnecting { .. } => SessionPhase::Disconnecting,
        }
    }

    /// The session, only while fully connected.
    pub fn session(&self) -> Option<&SessionInfo> {
        match self {
            SessionState::Connected { session } => Some(session),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session().is_some()
    }
}

/// Result of an emergency stop request.  Never an error: with no session
/// the request still completes and says so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    /// The stop is at the head of the session's outbound queue.
    Dispatched { device: DeviceId },
    NotConnected,
}

// ── Shared internals ──────────────────────────────────────────────────────────

/// Handle to a running writer task.
struct ActiveSession {
    info: SessionInfo,
    stop_tx: mpsc::Sender<()>,
    move_tx: mpsc::Sender<MoveAxisMessage>,
    shutdown_tx: Option<oneshot::Sender<DisconnectReason>>,
    writer: JoinHandle<()>,
}

impl ActiveSession {
    /// Asks the writer to say goodbye and close the link, then waits for it.
    async fn shutdown(mut self, reason: DisconnectReason) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(reason);
        }
        if let Err(e) = (&mut self.writer).await {
            warn!(session_id = %self.info.session_id, "writer task ended abnormally: {e}");
        }
    }
}

/// A link that dropped on its own and has not been acknowledged yet.
#[derive(Debug, Clone)]
struct LostLink {
    device: DeviceId,
    reason: String,
}

struct Shared {
    transports: TransportSet,
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<ControllerEvent>,
    active: Mutex<Option<ActiveSession>>,
    /// Cleared by the next connect or disconnect.
    lost: StdMutex<Option<LostLink>>,
}

impl Shared {
    /// Compare-and-set on the state.
    ///
    /// `decide` sees the current state and returns the next one, or `None`
    /// to leave it alone.  Returns the replaced state on success and the
    /// untouched current state on refusal.
    fn transition<F>(&self, decide: F) -> Result<SessionState, SessionState>
    where
        F: FnOnce(&SessionState) -> Option<SessionState>,
    {
        let mut outcome = None;
        self.state.send_if_modified(|current| match decide(current) {
            Some(next) => {
                outcome = Some(Ok(std::mem::replace(current, next)));
                true
            }
            None => {
                outcome = Some(Err(current.clone()));
                false
            }
        });
        outcome.unwrap_or(Err(SessionState::Idle))
    }

    fn publish(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_lost(&self, lost: Option<LostLink>) {
        *self.lost.lock().unwrap_or_else(PoisonError::into_inner) = lost;
    }

    fn lost(&self) -> Option<LostLink> {
        self.lost.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Runs a claimed connect attempt to completion.
    ///
    /// Expects the state to be `Connecting { device }` already.
    async fn establish(self: Arc<Self>, device: Device) -> Result<SessionInfo, ControlError> {
        info!(device = %device.id, transport = %device.transport, "connecting");
        self.publish(ControllerEvent::Connecting {
            device: device.clone(),
        });

        match self.open_link(&device).await {
            Ok(link) => Ok(self.activate(device, link).await),
            Err(err) => {
                warn!(device = %device.id, "connect failed: {err}");
                self.state.send_replace(SessionState::Idle);
                self.publish(ControllerEvent::ConnectFailed {
                    device: device.id.clone(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Runs a claimed disconnect to completion.
    ///
    /// Expects the state to be `Disconnecting { session }` already.
    async fn release(self: Arc<Self>, session: SessionInfo) {
        info!(device = %session.device.id, session_id = %session.session_id, "disconnecting");
        let handle = self.active.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown(DisconnectReason::UserInitiated).await;
        }

        self.state.send_replace(SessionState::Idle);
        self.publish(ControllerEvent::Disconnected {
            session_id: session.session_id,
            device: session.device.id.clone(),
        });
        info!(device = %session.device.id, "disconnected");
    }

    async fn open_link(&self, device: &Device) -> Result<Box<dyn Link>, ControlError> {
        let transport =
            self.transports
                .get(device.transport)
                .ok_or_else(|| ControlError::Unreachable {
                    device: device.id.clone(),
                    reason: format!("no {} transport is configured", device.transport),
                })?;

        let hello = HelloMessage {
            protocol_version: PROTOCOL_VERSION,
            controller_id: self.settings.controller_id,
            controller_name: self.settings.controller_name.clone(),
        };

        let timeout = self.settings.connect_timeout;
        match tokio::time::timeout(timeout, transport.open(device, &hello)).await {
            Err(_) => Err(ControlError::ConnectTimeout {
                device: device.id.clone(),
                after: timeout,
            }),
            Ok(Err(TransportError::Rejected { reason, .. })) => Err(ControlError::ConnectRejected {
                device: device.id.clone(),
                reason: reason.to_string(),
            }),
            Ok(Err(other)) => Err(ControlError::Unreachable {
                device: device.id.clone(),
                reason: other.to_string(),
            }),
            Ok(Ok(link)) => Ok(link),
        }
    }

    /// Starts the writer for a freshly opened link and moves to `Connected`.
    async fn activate(self: &Arc<Self>, device: Device, link: Box<dyn Link>) -> SessionInfo {
        let info = SessionInfo {
            session_id: Uuid::new_v4(),
            device,
        };

        let (stop_tx, stop_rx) = mpsc::channel(STOP_QUEUE_DEPTH);
        let (move_tx, move_rx) = mpsc::channel(self.settings.move_queue_depth.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // Hold the lock across spawn + state change so a writer that fails
        // immediately cannot tear down before the session is registered.
        let mut active = self.active.lock().await;
        let writer = tokio::spawn(
            Writer {
                link,
                info: info.clone(),
                sequence: SequenceCounter::new(),
                shared: Arc::clone(self),
            }
            .run(
                stop_rx,
                move_rx,
                shutdown_rx,
                self.settings.keepalive_interval,
            ),
        );
        *active = Some(ActiveSession {
            info: info.clone(),
            stop_tx,
            move_tx,
            shutdown_tx: Some(shutdown_tx),
            writer,
        });
        self.set_lost(None);
        self.state.send_replace(SessionState::Connected {
            session: info.clone(),
        });
        drop(active);

        info!(device = %info.device.id, session_id = %info.session_id, "connected");
        self.publish(ControllerEvent::Connected {
            session_id: info.session_id,
            device: info.device.clone(),
        });
        info
    }
}

// ── SessionManager ────────────────────────────────────────────────────────────

/// Owns at most one session process-wide.
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Creates an idle manager that publishes onto `events`.
    pub fn new(
        transports: TransportSet,
        settings: SessionSettings,
        events: broadcast::Sender<ControllerEvent>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                transports,
                settings,
                state,
                events,
                active: Mutex::new(None),
                lost: StdMutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.shared.events.subscribe()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.shared.settings
    }

    /// Number of live sessions: always 0 or 1.
    pub async fn session_count(&self) -> usize {
        usize::from(self.shared.active.lock().await.is_some())
    }

    /// Connects to `device`.
    ///
    /// The attempt itself runs on its own task.  Dropping the returned
    /// future does not abandon it: it still ends in `Connected` or `Idle`
    /// within the connect timeout, and observers get the usual events.
    ///
    /// # Errors
    ///
    /// - [`ControlError::AlreadyBusy`] if a connect or disconnect is in flight.
    /// - [`ControlError::AlreadyConnected`] if a session already exists.
    /// - [`ControlError::ConnectTimeout`], [`ControlError::ConnectRejected`] or
    ///   [`ControlError::Unreachable`] if the attempt fails; the manager is
    ///   back in `Idle` in each case.
    pub async fn connect(&self, device: Device) -> Result<SessionInfo, ControlError> {
        let claimed = self.shared.transition(|current| match current {
            SessionState::Idle => Some(SessionState::Connecting {
                device: device.clone(),
            }),
            _ => None,
        });
        if let Err(current) = claimed {
            return Err(match current {
                SessionState::Connected { session } => ControlError::AlreadyConnected {
                    device: session.device.id,
                },
                _ => ControlError::AlreadyBusy,
            });
        }
        self.shared.set_lost(None);

        let target = device.id.clone();
        match tokio::spawn(Arc::clone(&self.shared).establish(device)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(device = %target, "connect task failed: {e}");
                let _ = self.shared.transition(|current| match current {
                    SessionState::Connecting { device } if device.id == target => {
                        Some(SessionState::Idle)
                    }
                    _ => None,
                });
                Err(ControlError::Unreachable {
                    device: target,
                    reason: format!("connect task failed: {e}"),
                })
            }
        }
    }

    /// Disconnects the active session.  Succeeds as a no-op when idle.
    ///
    /// Like [`connect`](Self::connect), the teardown runs on its own task
    /// and finishes even if this future is dropped.
    ///
    /// # Errors
    ///
    /// [`ControlError::AlreadyBusy`] if a connect or disconnect is in flight.
    pub async fn disconnect(&self) -> Result<(), ControlError> {
        let claimed = self.shared.transition(|current| match current {
            SessionState::Connected { session } => Some(SessionState::Disconnecting {
                session: session.clone(),
            }),
            _ => None,
        });
        let session = match claimed {
            Ok(SessionState::Connected { session }) => session,
            Err(SessionState::Idle) => {
                self.shared.set_lost(None);
                return Ok(());
            }
            _ => return Err(ControlError::AlreadyBusy),
        };

        let session_id = session.session_id;
        if let Err(e) = tokio::spawn(Arc::clone(&self.shared).release(session)).await {
            warn!(%session_id, "disconnect task failed: {e}");
            let _ = self.shared.transition(|current| match current {
                SessionState::Disconnecting { session } if session.session_id == session_id => {
                    Some(SessionState::Idle)
                }
                _ => None,
            });
        }
        Ok(())
    }

    /// Puts a stop at the head of the outbound queue.
    ///
    /// Not subject to the busy gate: it only needs the `active` lock, which
    /// connect and disconnect hold for bookkeeping only.
    pub async fn emergency_stop(&self) -> StopOutcome {
        let active = self.shared.active.lock().await;
        let outcome = match active.as_ref() {
            Some(session) => match session.stop_tx.try_send(()) {
                // Full means a stop is already pending; this one coalesces.
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => StopOutcome::Dispatched {
                    device: session.info.device.id.clone(),
                },
                Err(mpsc::error::TrySendError::Closed(())) => StopOutcome::NotConnected,
            },
            None => StopOutcome::NotConnected,
        };
        drop(active);

        match &outcome {
            StopOutcome::Dispatched { device } => info!(%device, "emergency stop queued"),
            StopOutcome::NotConnected => {
                warn!("emergency stop requested with no session");
                self.shared
                    .publish(ControllerEvent::EmergencyStopWithoutSession);
            }
        }
        outcome
    }

    /// Sender for the active session's move queue.
    ///
    /// The sender is cloned out so callers can wait for queue space without
    /// holding the `active` lock.
    ///
    /// # Errors
    ///
    /// See [`inactive_error`](Self::inactive_error).
    pub(crate) async fn move_sender(&self) -> Result<mpsc::Sender<MoveAxisMessage>, ControlError> {
        self.shared
            .active
            .lock()
            .await
            .as_ref()
            .map(|s| s.move_tx.clone())
            .ok_or_else(|| self.inactive_error())
    }

    /// Error for a command that needs a session and found none:
    /// [`ControlError::LinkLost`] while a dropped link is unacknowledged,
    /// [`ControlError::NotConnected`] otherwise.
    pub fn inactive_error(&self) -> ControlError {
        match self.shared.lost() {
            Some(LostLink { device, reason }) => ControlError::LinkLost { device, reason },
            None => ControlError::NotConnected,
        }
    }

    pub(crate) fn publish(&self, event: ControllerEvent) {
        self.shared.publish(event);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // Dropping the handle drops its shutdown sender; the writer sees that
        // and closes the link on its own.
        if let Ok(mut active) = self.shared.active.try_lock() {
            active.take();
        }
    }
}

// ── Writer task ───────────────────────────────────────────────────────────────

struct Writer {
    link: Box<dyn Link>,
    info: SessionInfo,
    sequence: SequenceCounter,
    shared: Arc<Shared>,
}

impl Writer {
    async fn run(
        mut self,
        mut stop_rx: mpsc::Receiver<()>,
        mut move_rx: mpsc::Receiver<MoveAxisMessage>,
        mut shutdown_rx: oneshot::Receiver<DisconnectReason>,
        keepalive: Option<Duration>,
    ) {
        let mut ticker = keepalive.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut ping_token: u64 = 0;
        // Pings sent since the board was last heard from.
        let mut unanswered: u32 = 0;

        let result: Result<(), TransportError> = loop {
            tokio::select! {
                biased;

                Some(()) = stop_rx.recv() => {
                    while stop_rx.try_recv().is_ok() {}
                    let mut discarded = 0;
                    while move_rx.try_recv().is_ok() {
                        discarded += 1;
                    }
                    if let Err(e) = self.write(&ControlMessage::EmergencyStop).await {
                        break Err(e);
                    }
                    info!(device = %self.info.device.id, discarded, "emergency stop sent");
                    self.shared.publish(ControllerEvent::EmergencyStopSent {
                        device: self.info.device.id.clone(),
                        discarded_moves: discarded,
                    });
                }

                reason = &mut shutdown_rx => {
                    let reason = reason.unwrap_or(DisconnectReason::Shutdown);
                    if let Err(e) = self.write(&ControlMessage::Disconnect { reason }).await {
                        debug!("goodbye frame not delivered: {e}");
                    }
                    if let Err(e) = self.link.close().await {
                        debug!("error closing link: {e}");
                    }
                    return;
                }

                inbound = self.link.recv() => {
                    unanswered = 0;
                    match inbound {
                        Ok(ControlMessage::Ping(token)) => {
                            if let Err(e) = self.write(&ControlMessage::Pong(token)).await {
                                break Err(e);
                            }
                        }
                        Ok(ControlMessage::Disconnect { reason }) => {
                            break Err(TransportError::ClosedByPeer { reason });
                        }
                        Ok(msg) => {
                            debug!(device = %self.info.device.id, msg_type = ?msg.message_type(), "frame received");
                        }
                        Err(e) => break Err(e),
                    }
                }

                Some(mv) = move_rx.recv() => {
                    if let Err(e) = self.write(&ControlMessage::MoveAxis(mv)).await {
                        break Err(e);
                    }
                }

                _ = next_tick(&mut ticker) => {
                    if unanswered >= KEEPALIVE_MISSES {
                        break Err(TransportError::KeepaliveTimeout { missed: unanswered });
                    }
                    ping_token = ping_token.wrapping_add(1);
                    if let Err(e) = self.write(&ControlMessage::Ping(ping_token)).await {
                        break Err(e);
                    }
                    unanswered += 1;
                }
            }
        };

        if let Err(err) = result {
            self.tear_down(err).await;
        }
    }

    async fn write(&mut self, msg: &ControlMessage) -> Result<(), TransportError> {
        let seq = self.sequence.next();
        let frame = encode_message_now(msg, seq)?;
        debug!(device = %self.info.device.id, seq, msg_type = ?msg.message_type(), "sending frame");
        self.link.send(&frame).await
    }

    /// The link failed on its own: drop the session and tell observers.
    async fn tear_down(mut self, err: TransportError) {
        warn!(device = %self.info.device.id, "link lost: {err}");
        let _ = self.link.close().await;

        let session_id = self.info.session_id;
        let reason = err.to_string();
        let mut active = self.shared.active.lock().await;
        let changed = self
            .shared
            .transition(|current| match current {
                SessionState::Connected { session } if session.session_id == session_id => {
                    Some(SessionState::Idle)
                }
                _ => None,
            })
            .is_ok();
        if changed {
            self.shared.set_lost(Some(LostLink {
                device: self.info.device.id.clone(),
                reason: reason.clone(),
            }));
        }
        if active.as_ref().map(|s| s.info.session_id) == Some(session_id) {
            // Our own handle; dropping its JoinHandle just detaches us.
            active.take();
        }
        drop(active);

        if changed {
            self.shared.publish(ControllerEvent::LinkLost {
                session_id,
                device: self.info.device.id.clone(),
                reason,
            });
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
