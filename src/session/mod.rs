//! Per-peripheral protocol session.
//!
//! A [`Session`] owns everything about one connected peripheral: the
//! framed link, the outbound command queue, the pending-response registry
//! and the polled device state. Its lifecycle is
//!
//! ```text
//! Idle -> Connecting -> Polling -> Disconnecting -> Closed
//! ```
//!
//! and every background task it spawns (reader, dispatcher, disconnect
//! watcher) stops as soon as the session stops running.

pub mod pending;
pub mod queue;
mod poll;
mod router;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{oneshot, watch};

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::fleet::registry::Registry;
use crate::protocol::{Command, LineDecoder, UART_SAFE_SIZE};
use crate::transport::framer::DEFAULT_WRITE_PACING;
use crate::transport::{Central, Framer};
use crate::types::{DeviceState, PeerAddress, Settings};

pub use pending::{DEFAULT_RESPONSE_TIMEOUT, PendingResponse, PendingResponses};
pub use queue::CommandQueue;

/// Default duration of one polling tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Default number of ticks between battery requests.
pub const DEFAULT_BATTERY_EVERY: u64 = 4;

/// Default number of ticks between firmware requests.
pub const DEFAULT_FIRMWARE_EVERY: u64 = 10;

/// Configuration for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest single transport write.
    pub chunk_size: usize,
    /// Delay after every chunk and between queued commands.
    pub write_pacing: Duration,
    /// Duration of one polling tick.
    pub tick: Duration,
    /// How long a request waits for its response.
    pub response_timeout: Duration,
    /// Battery is polled every this many ticks.
    pub battery_every: u64,
    /// Firmware is polled every this many ticks.
    pub firmware_every: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    /// Creates a session configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunk_size: UART_SAFE_SIZE,
            write_pacing: DEFAULT_WRITE_PACING,
            tick: DEFAULT_TICK,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            battery_every: DEFAULT_BATTERY_EVERY,
            firmware_every: DEFAULT_FIRMWARE_EVERY,
        }
    }

    /// Sets the chunk size.
    #[must_use]
    pub const fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the write pacing.
    #[must_use]
    pub const fn write_pacing(mut self, pacing: Duration) -> Self {
        self.write_pacing = pacing;
        self
    }

    /// Sets the polling tick.
    #[must_use]
    pub const fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Sets the response timeout.
    #[must_use]
    pub const fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Sets the battery polling period in ticks (at least 1).
    #[must_use]
    pub const fn battery_every(mut self, ticks: u64) -> Self {
        self.battery_every = if ticks == 0 { 1 } else { ticks };
        self
    }

    /// Sets the firmware polling period in ticks (at least 1).
    #[must_use]
    pub const fn firmware_every(mut self, ticks: u64) -> Self {
        self.firmware_every = if ticks == 0 { 1 } else { ticks };
        self
    }
}

struct SessionInner {
    address: PeerAddress,
    config: SessionConfig,
    central: Arc<dyn Central>,
    dispatcher: EventDispatcher,
    registry: Weak<Registry>,
    running: watch::Sender<bool>,
    connected: AtomicBool,
    framer: RwLock<Option<Arc<Framer>>>,
    queue: CommandQueue,
    pending: PendingResponses,
    state: RwLock<DeviceState>,
}

/// Handle to one peripheral session.
///
/// Cloning the handle shares the session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        address: PeerAddress,
        name: impl Into<String>,
        config: SessionConfig,
        central: Arc<dyn Central>,
        dispatcher: EventDispatcher,
        registry: Weak<Registry>,
    ) -> Self {
        let (running, _) = watch::channel(false);
        let state = DeviceState::new(address.clone(), name);

        Self {
            inner: Arc::new(SessionInner {
                address,
                config,
                central,
                dispatcher,
                registry,
                running,
                connected: AtomicBool::new(false),
                framer: RwLock::new(None),
                queue: CommandQueue::new(),
                pending: PendingResponses::new(),
                state: RwLock::new(state),
            }),
        }
    }

    /// Returns the peer address.
    #[must_use]
    pub fn address(&self) -> &PeerAddress {
        &self.inner.address
    }

    /// Returns the advertised name.
    #[must_use]
    pub fn name(&self) -> String {
        self.read_state(|s| s.name.clone())
    }

    /// Returns true while the session is connecting or polling.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Returns true once the peripheral has pinged.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Returns a copy of the current device state.
    #[must_use]
    pub fn snapshot(&self) -> DeviceState {
        self.read_state(DeviceState::clone)
    }

    /// Returns the pending-response registry.
    #[must_use]
    pub fn pending(&self) -> &PendingResponses {
        &self.inner.pending
    }

    /// Returns the commands waiting for the dispatcher, head first.
    #[must_use]
    pub fn queued(&self) -> Vec<Command> {
        self.inner.queue.snapshot()
    }

    /// Updates the advertised name.
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.modify_state(|s| s.name = name);
        self.publish_update();
    }

    /// Clears the clock dirty flag once the reading has been consumed.
    pub fn acknowledge_clock(&self) {
        self.modify_state(|s| s.clock_changed = false);
    }

    /// Clears the settings dirty flag once the tuple has been consumed.
    pub fn acknowledge_settings(&self) {
        self.modify_state(|s| s.settings_changed = false);
    }

    /// Queues a command for the dispatcher.
    ///
    /// The command is dropped if the session is not running.
    pub fn send(&self, command: Command) {
        if !self.is_running() {
            tracing::debug!("{}: dropping '{}', not running", self.inner.address, command.encode());
            return;
        }
        self.inner.queue.push(command);
    }

    /// Queues a settings write.
    ///
    /// The peripheral acknowledges with `setsettings:ok`, after which the
    /// settings are read back.
    pub fn set_settings(&self, settings: Settings) {
        self.send(Command::SetSettings(settings));
    }

    /// Sends a command and waits for its response.
    ///
    /// Returns `Ok(None)` if nothing arrives within the response timeout.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotRunning` if the session is stopped,
    /// `Error::PendingExists` if the same response is already awaited, or
    /// the transport error if the write fails.
    pub async fn request(&self, command: Command) -> Result<Option<String>> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }

        let waiter = self.inner.pending.register(command.response_keyword())?;
        self.send_now(&command).await?;
        Ok(waiter.wait(self.inner.config.response_timeout).await)
    }

    /// Connects, performs the settings handshake and polls until stopped.
    ///
    /// Does nothing if the session is already running. Any failure runs
    /// the disconnect path; it is reported through events only.
    pub async fn connect(&self) {
        if self.mark_running() {
            self.run().await;
        }
    }

    /// Claims the session for a connect attempt.
    ///
    /// Returns false if it is already running. A claimed session is visible
    /// to `disconnect` before any connect work is scheduled.
    pub(crate) fn mark_running(&self) -> bool {
        self.inner.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        })
    }

    /// Runs a connect attempt claimed by [`Session::mark_running`].
    ///
    /// Returns at once if the session was stopped in between.
    pub(crate) async fn run(&self) {
        if !self.is_running() {
            tracing::debug!("{}: stopped before connecting", self.inner.address);
            return;
        }

        tracing::info!("connecting device {} ({})", self.name(), self.inner.address);
        self.inner.connected.store(false, Ordering::SeqCst);
        self.modify_state(|s| s.connected = false);
        self.publish_update();

        let result = async {
            self.establish().await?;
            self.handshake().await?;
            self.poll().await
        }
        .await;

        match result {
            Ok(()) => tracing::debug!("{}: polling stopped", self.inner.address),
            Err(Error::NotRunning) => tracing::debug!("{}: stopped while connecting", self.inner.address),
            Err(e) => {
                tracing::warn!("{}: session failed: {e}", self.inner.address);
                self.disconnect().await;
            }
        }
    }

    /// Stops the session and closes the link.
    ///
    /// Does nothing if the session is not running.
    pub async fn disconnect(&self) {
        let stopped = self.inner.running.send_if_modified(|running| {
            if *running {
                *running = false;
                true
            } else {
                false
            }
        });
        if !stopped {
            return;
        }

        tracing::info!("disconnecting device {}", self.inner.address);
        self.inner
            .dispatcher
            .dispatch(Event::DeviceDisconnecting(self.inner.address.clone()));

        self.inner.pending.clear();
        self.inner.queue.clear();

        if let Some(framer) = self.take_framer() {
            let link = framer.link();
            if link.is_connected() {
                if let Err(e) = link.disconnect().await {
                    tracing::warn!("{}: failed to close link: {e}", self.inner.address);
                }
            }
        }

        self.leave_fleet();
    }

    /// Opens the link and starts the reader, dispatcher and watcher tasks.
    async fn establish(&self) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }

        let (on_disconnect, disconnected) = oneshot::channel();
        let link = self
            .inner
            .central
            .connect(&self.inner.address, on_disconnect)
            .await?;

        if !self.is_running() {
            link.disconnect().await?;
            return Err(Error::NotRunning);
        }

        let watcher = self.clone();
        tokio::spawn(async move {
            if disconnected.await.is_ok() {
                watcher.handle_link_lost();
            }
        });

        // Stored first so a failed subscribe still closes the link
        let framer = Arc::new(Framer::new(
            Arc::clone(&link),
            self.inner.config.chunk_size,
            self.inner.config.write_pacing,
        ));
        *self
            .inner
            .framer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(framer);

        let inbound = link.subscribe().await?;

        let reader = self.clone();
        let stopped = self.stopped();
        tokio::spawn(async move {
            let lines = Framer::run_read_loop(inbound, LineDecoder::new(), |line| {
                let reader = reader.clone();
                async move { reader.handle_line(&line).await }
            });
            tokio::select! {
                () = lines => {}
                () = stopped => {}
            }
        });

        tokio::spawn(self.clone().run_dispatcher());

        Ok(())
    }

    /// Drains the command queue onto the link until the session stops.
    async fn run_dispatcher(self) {
        let stopped = self.stopped();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                () = self.inner.queue.notified() => {}
                () = &mut stopped => return,
            }

            while let Some(command) = self.inner.queue.pop() {
                if !self.is_running() {
                    return;
                }
                if let Err(e) = self.send_now(&command).await {
                    tracing::warn!("{}: failed to send queued command: {e}", self.inner.address);
                    self.disconnect().await;
                    return;
                }
                tokio::time::sleep(self.inner.config.write_pacing).await;
            }
        }
    }

    /// Handles the driver reporting that the peer dropped.
    fn handle_link_lost(&self) {
        self.inner.running.send_replace(false);
        self.inner.pending.clear();
        self.inner.queue.clear();
        self.take_framer();

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.blacklist(self.inner.address.clone());
        }
        tracing::info!("device {} was disconnected, goodbye", self.inner.address);

        self.leave_fleet();
    }

    /// Removes the session from the fleet, announcing it if it was present.
    fn leave_fleet(&self) {
        let removed = self
            .inner
            .registry
            .upgrade()
            .is_some_and(|registry| registry.remove(&self.inner.address).is_some());

        if removed {
            self.inner
                .dispatcher
                .dispatch(Event::DeviceDisconnected(self.inner.address.clone()));
        }
    }

    /// Writes a command immediately, bypassing the queue.
    ///
    /// Nothing is written once the session stopped.
    async fn send_now(&self, command: &Command) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        let framer = self.framer().ok_or(Error::NotConnected)?;
        let line = command.encode();
        tracing::debug!("{}: sending {line}", self.inner.address);
        framer.send_line(&line).await
    }

    fn framer(&self) -> Option<Arc<Framer>> {
        self.inner
            .framer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_framer(&self) -> Option<Arc<Framer>> {
        self.inner
            .framer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Resolves once the session stops running.
    fn stopped(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut running = self.inner.running.subscribe();
        async move {
            let _ = running.wait_for(|running| !*running).await;
        }
    }

    fn read_state<R>(&self, f: impl FnOnce(&DeviceState) -> R) -> R {
        let state = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn modify_state(&self, f: impl FnOnce(&mut DeviceState)) {
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }

    fn publish_update(&self) {
        self.inner
            .dispatcher
            .dispatch(Event::DeviceUpdated(Box::new(self.snapshot())));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.inner.address)
            .field("running", &self.is_running())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
