//! Multi-peripheral coordination.
//!
//! A [`Fleet`] runs bounded scan cycles. During a cycle every advertisement
//! offering the UART service under the expected name becomes a [`Session`]
//! that connects on its own task. Peers that drop are blacklisted until the
//! next cycle starts, and sessions that never completed the ping exchange
//! are cleaned up when the cycle ends.

pub(crate) mod registry;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::Result;
use crate::event::{Event, EventDispatcher, Subscription};
use crate::session::{Session, SessionConfig};
use crate::transport::{Central, ScanHandle};
use crate::types::{Advertisement, PeerAddress};

use registry::{Admission, Registry};

/// UART service advertised by supported peripherals.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ffe0_0000_1000_8000_0080_5f9b_34fb);

/// UART characteristic carrying both directions of the line protocol.
pub const UART_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_ffe1_0000_1000_8000_0080_5f9b_34fb);

/// Advertised name of supported peripherals.
pub const DEFAULT_DEVICE_NAME: &str = "BBQ3";

/// Default duration of one scan cycle.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(30);

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Buffer between the driver's discovery callback and the filter.
const ADVERTISEMENT_CAPACITY: usize = 64;

/// Configuration for a fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetConfig {
    /// Service a peripheral must advertise to be admitted.
    pub service_uuid: Uuid,
    /// Name a peripheral must advertise; `None` admits any name.
    pub device_name: Option<String>,
    /// How long discovery runs per cycle.
    pub scan_window: Duration,
    /// Configuration handed to every new session.
    pub session: SessionConfig,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            service_uuid: UART_SERVICE_UUID,
            device_name: Some(DEFAULT_DEVICE_NAME.to_owned()),
            scan_window: DEFAULT_SCAN_WINDOW,
            session: SessionConfig::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl FleetConfig {
    /// Creates a fleet configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the required service.
    #[must_use]
    pub const fn service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = uuid;
        self
    }

    /// Sets the required advertised name.
    #[must_use]
    pub fn device_name(mut self, name: Option<String>) -> Self {
        self.device_name = name;
        self
    }

    /// Sets the scan window.
    #[must_use]
    pub const fn scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    /// Sets the session configuration.
    #[must_use]
    pub const fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Returns true if an unknown advertiser should get a session.
    fn accepts(&self, advertisement: &Advertisement) -> bool {
        advertisement.has_service(&self.service_uuid)
            && self
                .device_name
                .as_deref()
                .is_none_or(|name| advertisement.name.as_deref() == Some(name))
    }
}

struct ActiveScan {
    handle: ScanHandle,
    task: JoinHandle<()>,
}

struct FleetInner {
    central: Arc<dyn Central>,
    config: FleetConfig,
    dispatcher: EventDispatcher,
    registry: Arc<Registry>,
    scanning: AtomicBool,
    scan: Mutex<Option<ActiveScan>>,
    cancel: watch::Sender<bool>,
}

impl Drop for FleetInner {
    fn drop(&mut self) {
        let scan = self.scan.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(scan) = scan.take() {
            scan.task.abort();
        }
    }
}

/// Coordinator of every peripheral session.
///
/// Cloning the handle shares the fleet.
#[derive(Clone)]
pub struct Fleet {
    inner: Arc<FleetInner>,
}

impl Fleet {
    /// Creates a fleet on top of a central driver.
    pub fn new<C: Central + 'static>(central: C, config: FleetConfig) -> Self {
        let dispatcher = EventDispatcher::new(config.event_capacity);

        Self {
            inner: Arc::new(FleetInner {
                central: Arc::new(central),
                config,
                dispatcher,
                registry: Arc::new(Registry::new()),
                scanning: AtomicBool::new(false),
                scan: Mutex::new(None),
                cancel: watch::channel(false).0,
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    /// Subscribes to fleet and session events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.inner.dispatcher.subscribe()
    }

    /// Returns the event dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Returns true while a scan cycle runs.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    /// Returns a snapshot of the open sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.registry.sessions()
    }

    /// Returns the session for `address`, if open.
    #[must_use]
    pub fn session(&self, address: &PeerAddress) -> Option<Session> {
        self.inner.registry.get(address)
    }

    /// Returns the number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns true if no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }

    /// Returns true if `address` dropped during the current cycle.
    #[must_use]
    pub fn is_blacklisted(&self, address: &PeerAddress) -> bool {
        self.inner.registry.is_blacklisted(address)
    }

    /// Runs one scan cycle.
    ///
    /// Does nothing if a cycle is already running. Otherwise the blacklist
    /// is cleared, discovery runs for the scan window (or until
    /// [`stop_scan`](Self::stop_scan)), and every session that has not
    /// pinged by then is disconnected.
    pub async fn start_scan(&self) -> Result<()> {
        if self.inner.scanning.swap(true, Ordering::SeqCst) {
            tracing::debug!("scan already running");
            return Ok(());
        }
        self.inner.cancel.send_replace(false);

        let result = self.run_scan().await;
        self.inner.scanning.store(false, Ordering::SeqCst);

        tracing::info!("finished scanning");
        self.inner.dispatcher.dispatch(Event::ScanFinished);
        result
    }

    async fn run_scan(&self) -> Result<()> {
        tracing::info!("scanning for devices");
        self.inner.registry.clear_blacklist();
        self.inner.dispatcher.dispatch(Event::ScanStarted);

        let discovery = self.begin_discovery().await;
        if discovery.is_ok() {
            tokio::select! {
                () = tokio::time::sleep(self.inner.config.scan_window) => {}
                () = self.cancelled() => {
                    tracing::debug!("scan window cut short");
                }
            }
        }

        let stopped = self.end_discovery().await;
        self.disconnect_trash().await;

        discovery.and(stopped)
    }

    /// Stops discovery and ends the running scan window early.
    ///
    /// A cycle whose discovery is still starting ends as soon as it has
    /// started.
    pub async fn stop_scan(&self) -> Result<()> {
        self.inner.cancel.send_replace(true);
        self.end_discovery().await
    }

    /// Resolves once the current cycle is cancelled.
    fn cancelled(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut cancel = self.inner.cancel.subscribe();
        async move {
            let _ = cancel.wait_for(|cancelled| *cancelled).await;
        }
    }

    async fn begin_discovery(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(ADVERTISEMENT_CAPACITY);
        let handle = self.inner.central.start_scan(tx).await?;

        let fleet: Weak<FleetInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(advertisement) = rx.recv().await {
                let Some(inner) = fleet.upgrade() else {
                    break;
                };
                Self { inner }.on_advertisement(&advertisement);
            }
        });

        *self.scan() = Some(ActiveScan { handle, task });
        Ok(())
    }

    async fn end_discovery(&self) -> Result<()> {
        let Some(scan) = self.scan().take() else {
            return Ok(());
        };

        tracing::debug!("stopping discovery");
        scan.task.abort();
        self.inner.central.stop_scan(scan.handle).await
    }

    /// Applies the discovery filter to one advertisement.
    fn on_advertisement(&self, advertisement: &Advertisement) {
        let inner = &self.inner;
        let admission = inner.registry.admit(
            advertisement,
            |adv| inner.config.accepts(adv),
            || {
                Session::new(
                    advertisement.address.clone(),
                    advertisement.name.clone().unwrap_or_default(),
                    inner.config.session.clone(),
                    Arc::clone(&inner.central),
                    inner.dispatcher.clone(),
                    Arc::downgrade(&inner.registry),
                )
            },
        );

        match admission {
            Admission::Known(session) => {
                if let Some(name) = &advertisement.name {
                    session.set_name(name.clone());
                }
            }
            Admission::Ignored => {}
            Admission::Admitted(session) => {
                tracing::info!("new device {} - {}", session.name(), session.address());
                // Claimed here so a disconnect before the task runs still stops it
                if session.mark_running() {
                    tokio::spawn(async move { session.run().await });
                }
            }
        }
    }

    /// Disconnects every session that has not pinged yet.
    pub async fn disconnect_trash(&self) {
        for session in self.sessions() {
            if !session.is_connected() {
                session.disconnect().await;
            }
        }
    }

    /// Disconnects every open session.
    pub async fn disconnect_all(&self) {
        self.inner.dispatcher.dispatch(Event::DisconnectStarted);

        // Sessions remove themselves; iterate a snapshot
        for session in self.sessions() {
            session.disconnect().await;
        }

        self.inner.dispatcher.dispatch(Event::DisconnectFinished);
    }

    fn scan(&self) -> MutexGuard<'_, Option<ActiveScan>> {
        self.inner
            .scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("scanning", &self.is_scanning())
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}
