//! UI bridge: the command surface a front end drives the controller through.
//!
//! Every operation is an async function that takes the shared [`AppState`]
//! and returns a [`CommandResult<T>`], a plain `{ success, data, error }`
//! wrapper that serializes to JSON the same way whether the caller is the
//! console, a desktop shell or a test.
//!
//! # Observer model
//!
//! The bridge never polls the board.  Front ends subscribe to
//! [`AppState::subscribe_events`] for what happened and
//! [`AppState::subscribe_state`] for the current session state, and call the
//! commands below to make things happen.
//!
//! # DTOs
//!
//! Domain types stay in `triaxis_core`; the `*Dto` structs here are the
//! flattened, string-friendly shapes a UI renders (signal bars, phase names,
//! stringified ids).

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info};
use triaxis_core::{Axis, AxisBank, AxisState, Device, DeviceId, Pattern, TransportKind};

use crate::application::discovery::{DiscoveryService, ScanResult};
use crate::application::dispatch::{CommandDispatcher, Direction, PatternRun};
use crate::application::errors::ControlError;
use crate::application::events::{ControllerEvent, EVENT_CHANNEL_CAPACITY};
use crate::application::session::{
    SessionManager, SessionPhase, SessionSettings, SessionState, StopOutcome,
};
use crate::application::transport::TransportSet;
use crate::infrastructure::storage::config::AppConfig;
use crate::infrastructure::transport::{resolve_endpoint, NetworkTransport, SimulatedTransport};

/// Shared application state handed to every command.
pub struct AppState {
    pub session: Arc<SessionManager>,
    pub discovery: Arc<DiscoveryService>,
    pub dispatcher: CommandDispatcher,
    /// The configuration the state was built from.
    pub config: Mutex<AppConfig>,
}

impl AppState {
    /// Builds the state with the transports `config` asks for.
    ///
    /// Must be called inside a Tokio runtime: it spawns the task that
    /// accepts background scan results.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidParameter`] if the configured axis
    /// defaults are out of range.
    pub fn from_config(config: AppConfig) -> Result<Arc<Self>, ControlError> {
        let transports = build_transports(&config);
        Self::with_transports(config, transports)
    }

    /// Builds the state around explicitly supplied transports.
    ///
    /// # Errors
    ///
    /// Same as [`AppState::from_config`].
    pub fn with_transports(
        config: AppConfig,
        transports: TransportSet,
    ) -> Result<Arc<Self>, ControlError> {
        let axes = AxisBank::with_targets(config.axes.default_speed, config.axes.default_torque)?;
        let settings = SessionSettings {
            controller_id: config.controller.id,
            controller_name: config.controller.name.clone(),
            connect_timeout: config.session.connect_timeout(),
            keepalive_interval: config.session.keepalive_interval(),
            move_queue_depth: config.session.move_queue_depth,
        };

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let session = Arc::new(SessionManager::new(
            transports.clone(),
            settings,
            events.clone(),
        ));
        let (discovery, scan_rx) = DiscoveryService::new(transports, events);
        let discovery = Arc::new(discovery);
        spawn_scan_acceptor(Arc::downgrade(&discovery), scan_rx);

        let dispatcher =
            CommandDispatcher::new(Arc::clone(&session), axes, config.controller.jog_step);

        Ok(Arc::new(Self {
            session,
            discovery,
            dispatcher,
            config: Mutex::new(config),
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.session.subscribe_events()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe_state()
    }
}

/// Simulated boards for both kinds when simulation is on; otherwise the real
/// network transport plus simulated short-range boards, since there is no
/// radio stack to drive.
fn build_transports(config: &AppConfig) -> TransportSet {
    let short_range = SimulatedTransport::from_config(TransportKind::ShortRange, &config.simulation);
    if config.simulation.enabled {
        info!("using simulated transports");
        TransportSet::new()
            .with(Arc::new(short_range))
            .with(Arc::new(SimulatedTransport::from_config(
                TransportKind::LocalNetwork,
                &config.simulation,
            )))
    } else {
        info!(
            discovery_port = config.network.discovery_port,
            "using network transport"
        );
        TransportSet::new()
            .with(Arc::new(short_range))
            .with(Arc::new(NetworkTransport::new(config.network.clone())))
    }
}

/// Feeds background scan results through the latest-wins check.  Ends when
/// the discovery service is dropped.
fn spawn_scan_acceptor(discovery: Weak<DiscoveryService>, mut rx: mpsc::Receiver<ScanResult>) {
    tokio::spawn(async move {
        while let Some(result) = rx.recv().await {
            let Some(service) = discovery.upgrade() else {
                break;
            };
            service.accept(result);
        }
        debug!("scan acceptor stopped");
    });
}

// ── Data Transfer Objects (Presentation layer) ────────────────────────────────

/// One discovered board as a UI lists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDto {
    pub id: String,
    pub name: String,
    pub signal_dbm: i16,
    /// Three-dot strength indicator, e.g. `●●○`.
    pub signal_bars: String,
    pub transport: TransportKind,
}

impl From<&Device> for DeviceDto {
    fn from(d: &Device) -> Self {
        Self {
            id: d.id.to_string(),
            name: d.name.clone(),
            signal_dbm: d.signal_dbm,
            signal_bars: d.signal_quality().bars().to_string(),
            transport: d.transport,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDto {
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub device: Option<DeviceDto>,
}

impl From<&SessionState> for SessionDto {
    fn from(state: &SessionState) -> Self {
        let (session_id, device) = match state {
            SessionState::Idle => (None, None),
            SessionState::Connecting { device } => (None, Some(DeviceDto::from(device))),
            SessionState::Connected { session } | SessionState::Disconnecting { session } => (
                Some(session.session_id.to_string()),
                Some(DeviceDto::from(&session.device)),
            ),
        };
        Self {
            phase: state.phase(),
            session_id,
            device,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisDto {
    pub axis: String,
    pub position: i64,
    pub speed: u16,
    pub torque: u8,
}

impl AxisDto {
    fn new(axis: Axis, state: AxisState) -> Self {
        Self {
            axis: axis.to_string(),
            position: state.position,
            speed: state.speed,
            torque: state.torque,
        }
    }
}

/// Everything a status screen shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDto {
    pub session: SessionDto,
    pub axes: Vec<AxisDto>,
    pub jog_step: i32,
    pub last_scan: Vec<DeviceDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDto {
    pub name: String,
    pub description: String,
}

/// Unified response wrapper returned by every command.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl<T: Serialize> From<Result<T, ControlError>> for CommandResult<T> {
    fn from(result: Result<T, ControlError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Scans `transport` ("bluetooth" or "wifi") and waits for the result.
///
/// If a newer scan is started before this one finishes, this one reports an
/// error instead of returning a stale list.
pub async fn scan(state: Arc<AppState>, transport: String) -> CommandResult<Vec<DeviceDto>> {
    let kind = match transport.parse::<TransportKind>() {
        Ok(kind) => kind,
        Err(e) => return CommandResult::err(e.to_string()),
    };

    // Subscribe before spawning so the completion cannot be missed.
    let mut events = state.subscribe_events();
    let generation = state.discovery.spawn_scan(kind);
    loop {
        match events.recv().await {
            Ok(ControllerEvent::ScanCompleted {
                generation: done,
                devices,
                ..
            }) if done >= generation => {
                if done > generation {
                    return CommandResult::err("scan was superseded by a newer scan");
                }
                return CommandResult::ok(devices.iter().map(DeviceDto::from).collect());
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // The completion may have been among the skipped events.
                debug!(skipped, generation, "scan waiter lagged");
                if let Some(outcome) = settled_scan(&state.discovery, generation) {
                    return outcome;
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                return CommandResult::err("event channel closed")
            }
        }
    }
}

/// The outcome of scan `generation` as recorded by the discovery service,
/// or `None` while nothing at or past it has been accepted.
fn settled_scan(
    discovery: &DiscoveryService,
    generation: u64,
) -> Option<CommandResult<Vec<DeviceDto>>> {
    let accepted = discovery.accepted_scan()?;
    match accepted.generation.cmp(&generation) {
        std::cmp::Ordering::Less => None,
        std::cmp::Ordering::Equal => Some(CommandResult::ok(
            accepted.devices.iter().map(DeviceDto::from).collect(),
        )),
        std::cmp::Ordering::Greater => {
            Some(CommandResult::err("scan was superseded by a newer scan"))
        }
    }
}

/// Starts a background scan and returns its generation immediately.  The
/// result arrives as a `scan_completed` event.
pub async fn start_scan(state: Arc<AppState>, transport: String) -> CommandResult<u64> {
    match transport.parse::<TransportKind>() {
        Ok(kind) => CommandResult::ok(state.discovery.spawn_scan(kind)),
        Err(e) => CommandResult::err(e.to_string()),
    }
}

/// Devices from the last accepted scan.
pub async fn get_devices(state: Arc<AppState>) -> CommandResult<Vec<DeviceDto>> {
    let devices = state.discovery.last_devices();
    CommandResult::ok(devices.iter().map(DeviceDto::from).collect())
}

/// Connects to a board named by its 1-based position in the last scan, its
/// id, or (for the local network) a bare IP address.
pub async fn connect(state: Arc<AppState>, target: String) -> CommandResult<SessionDto> {
    let device = match lookup_device(&state, &target).await {
        Ok(device) => device,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state
        .session
        .connect(device)
        .await
        .map(|info| SessionDto::from(&SessionState::Connected { session: info }))
        .into()
}

pub async fn disconnect(state: Arc<AppState>) -> CommandResult<()> {
    state.session.disconnect().await.into()
}

pub async fn move_axis(state: Arc<AppState>, axis: String, steps: i32) -> CommandResult<AxisDto> {
    let axis = match parse_axis(&axis) {
        Ok(axis) => axis,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state
        .dispatcher
        .move_axis(axis, steps)
        .await
        .map(|s| AxisDto::new(axis, s))
        .into()
}

/// Moves one jog step; `direction` is `+` or `-`.
pub async fn jog(state: Arc<AppState>, axis: String, direction: String) -> CommandResult<AxisDto> {
    let axis = match parse_axis(&axis) {
        Ok(axis) => axis,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    let direction = match direction.parse::<Direction>() {
        Ok(direction) => direction,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state
        .dispatcher
        .jog(axis, direction)
        .await
        .map(|s| AxisDto::new(axis, s))
        .into()
}

pub async fn set_speed(state: Arc<AppState>, axis: String, speed: u16) -> CommandResult<AxisDto> {
    let axis = match parse_axis(&axis) {
        Ok(axis) => axis,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state
        .dispatcher
        .set_speed(axis, speed)
        .await
        .map(|s| AxisDto::new(axis, s))
        .into()
}

pub async fn set_torque(state: Arc<AppState>, axis: String, torque: u8) -> CommandResult<AxisDto> {
    let axis = match parse_axis(&axis) {
        Ok(axis) => axis,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state
        .dispatcher
        .set_torque(axis, torque)
        .await
        .map(|s| AxisDto::new(axis, s))
        .into()
}

pub async fn run_pattern(
    state: Arc<AppState>,
    pattern: String,
    size: u16,
) -> CommandResult<PatternRun> {
    let pattern = match pattern.parse::<Pattern>() {
        Ok(pattern) => pattern,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state.dispatcher.run_pattern(pattern, size).await.into()
}

/// Always succeeds; the outcome says whether a board was told to stop.
pub async fn emergency_stop(state: Arc<AppState>) -> CommandResult<StopOutcome> {
    CommandResult::ok(state.dispatcher.emergency_stop().await)
}

pub async fn get_status(state: Arc<AppState>) -> CommandResult<StatusDto> {
    let axes = state.dispatcher.axes().await;
    CommandResult::ok(StatusDto {
        session: SessionDto::from(&state.session.state()),
        axes: axes.iter().map(|(axis, s)| AxisDto::new(axis, s)).collect(),
        jog_step: state.dispatcher.jog_step(),
        last_scan: state
            .discovery
            .last_devices()
            .iter()
            .map(DeviceDto::from)
            .collect(),
    })
}

pub async fn list_patterns(_state: Arc<AppState>) -> CommandResult<Vec<PatternDto>> {
    CommandResult::ok(
        Pattern::ALL
            .iter()
            .map(|p| PatternDto {
                name: p.to_string(),
                description: p.description().to_string(),
            })
            .collect(),
    )
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_axis(raw: &str) -> Result<Axis, ControlError> {
    Ok(raw.parse::<Axis>()?)
}

async fn lookup_device(state: &AppState, target: &str) -> Result<Device, ControlError> {
    let target = target.trim();
    let known = state.discovery.last_devices();

    if let Ok(index) = target.parse::<usize>() {
        if let Some(device) = index.checked_sub(1).and_then(|i| known.get(i)) {
            return Ok(device.clone());
        }
    }
    if let Some(device) = state.discovery.find(&DeviceId::from(target)) {
        return Ok(device);
    }

    let control_port = state.config.lock().await.network.control_port;
    let addr = resolve_endpoint(&DeviceId::from(target), control_port)
        .map_err(|_| ControlError::UnknownDevice(target.to_string()))?;
    let id = DeviceId::from(addr.to_string());
    Ok(state.discovery.find(&id).unwrap_or_else(|| {
        Device::new(
            id,
            format!("TriAxis_{}", addr.ip()),
            0,
            TransportKind::LocalNetwork,
        )
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
