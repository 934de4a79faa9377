//! DiscoveryService: finds reachable boards on one transport at a time.
//!
//! [`DiscoveryService::scan`] is a pure query: it asks the transport for
//! candidates, collapses duplicates and ranks them strongest-signal first.
//! Finding nothing is not an error, and neither is a transport fault: the
//! fault is logged and the scan reports an empty list.
//!
//! [`DiscoveryService::spawn_scan`] runs the same query on a Tokio task and
//! posts a generation-stamped [`ScanResult`] to the channel returned by
//! [`DiscoveryService::new`].  Every spawn bumps the generation, so a newer
//! scan supersedes an older one without cancelling it.  The older result
//! still arrives, and [`DiscoveryService::accept`] turns it away.  The
//! device list of the last accepted result is kept for lookups by id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use triaxis_core::{rank_devices, Device, DeviceId, TransportKind};

use crate::application::events::ControllerEvent;
use crate::application::transport::TransportSet;

/// Capacity of the scan result channel.
const RESULT_CHANNEL_CAPACITY: usize = 16;

/// Outcome of one background scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub transport: TransportKind,
    /// Monotonic scan number; only the highest one issued is current.
    pub generation: u64,
    pub devices: Vec<Device>,
}

pub struct DiscoveryService {
    transports: TransportSet,
    generation: AtomicU64,
    results: mpsc::Sender<ScanResult>,
    events: broadcast::Sender<ControllerEvent>,
    accepted: Mutex<Option<ScanResult>>,
}

impl DiscoveryService {
    /// Creates the service and the receiver background scans report to.
    pub fn new(
        transports: TransportSet,
        events: broadcast::Sender<ControllerEvent>,
    ) -> (Self, mpsc::Receiver<ScanResult>) {
        let (results, rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        (
            Self {
                transports,
                generation: AtomicU64::new(0),
                results,
                events,
                accepted: Mutex::new(None),
            },
            rx,
        )
    }

    /// Lists reachable devices on `kind`, strongest signal first.
    pub async fn scan(&self, kind: TransportKind) -> Vec<Device> {
        let Some(transport) = self.transports.get(kind) else {
            warn!(transport = %kind, "no transport configured; scan finds nothing");
            return Vec::new();
        };

        debug!(transport = %kind, "scanning");
        match transport.discover().await {
            Ok(found) => {
                let ranked = rank_devices(found);
                info!(transport = %kind, count = ranked.len(), "scan finished");
                ranked
            }
            Err(e) => {
                warn!(transport = %kind, "scan failed, treating as no devices: {e}");
                Vec::new()
            }
        }
    }

    /// Starts a scan in the background and returns its generation.
    pub fn spawn_scan(self: &Arc<Self>, kind: TransportKind) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let devices = service.scan(kind).await;
            let result = ScanResult {
                transport: kind,
                generation,
                devices,
            };
            if service.results.send(result).await.is_err() {
                debug!(generation, "scan result receiver dropped");
            }
        });
        generation
    }

    /// Generation of the most recently spawned scan (0 before the first).
    pub fn latest_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns the result if it is still current, announcing it to
    /// observers; stale results are dropped.
    pub fn accept(&self, result: ScanResult) -> Option<ScanResult> {
        let latest = self.latest_generation();
        if result.generation != latest {
            debug!(
                generation = result.generation,
                latest, "discarding superseded scan result"
            );
            return None;
        }
        *self.accepted.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        let _ = self.events.send(ControllerEvent::ScanCompleted {
            transport: result.transport,
            generation: result.generation,
            devices: result.devices.clone(),
        });
        Some(result)
    }

    /// The last accepted scan, if any.
    pub fn accepted_scan(&self) -> Option<ScanResult> {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Devices from the last accepted scan, strongest first.
    pub fn last_devices(&self) -> Vec<Device> {
        self.accepted_scan()
            .map(|scan| scan.devices)
            .unwrap_or_default()
    }

    /// Looks `id` up in the last accepted scan.
    pub fn find(&self, id: &DeviceId) -> Option<Device> {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()?
            .devices
            .iter()
            .find(|d| &d.id == id)
            .cloned()
    }
}
