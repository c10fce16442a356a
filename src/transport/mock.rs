//! In-memory transport for tests and simulations.
//!
//! [`MockCentral`] hands out [`MockLink`]s that record every chunk written
//! to them. A responder closure can play the peripheral: it sees every
//! complete outbound line and returns the lines the peripheral answers with.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::protocol::LineDecoder;
use crate::transport::{Central, Link, ScanHandle};
use crate::types::{Advertisement, PeerAddress};

/// Capacity of the simulated notification stream.
const INBOUND_CAPACITY: usize = 256;

/// Produces the peripheral's reply lines for one received line.
pub type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Answers the polling commands the way a healthy peripheral does.
#[must_use]
pub fn simulated_peripheral(line: &str) -> Vec<String> {
    let reply = match line {
        "getsettings" => "getsettings:3,15",
        "gettime" => "time:12,30,00,19,10,26",
        "imudata" => "imudata:0.10,0.20,9.81,1.5,-2.5,0.0",
        "battery" => "battery:87",
        "firmware" => "firmware:1.4.2",
        l if l.starts_with("setsettings:") => "setsettings:ok",
        _ => return Vec::new(),
    };
    vec![reply.to_owned()]
}

struct MockLinkInner {
    connected: AtomicBool,
    fail_writes: AtomicBool,
    fail_subscribe: AtomicBool,
    written: Mutex<Vec<Bytes>>,
    inbound: Mutex<Option<mpsc::Sender<Bytes>>>,
    on_disconnect: Mutex<Option<oneshot::Sender<()>>>,
    responder: Mutex<Option<Responder>>,
    requests: Mutex<LineDecoder>,
}

/// A simulated connection to one peripheral.
#[derive(Clone)]
pub struct MockLink {
    inner: Arc<MockLinkInner>,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    /// Creates a connected link without a responder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockLinkInner {
                connected: AtomicBool::new(true),
                fail_writes: AtomicBool::new(false),
                fail_subscribe: AtomicBool::new(false),
                written: Mutex::new(Vec::new()),
                inbound: Mutex::new(None),
                on_disconnect: Mutex::new(None),
                responder: Mutex::new(None),
                requests: Mutex::new(LineDecoder::new()),
            }),
        }
    }

    /// Sets the closure that plays the peripheral.
    pub fn set_responder(&self, responder: Responder) {
        *lock(&self.inner.responder) = Some(responder);
    }

    /// Makes every following write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every following notification subscribe fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Returns every chunk written so far.
    #[must_use]
    pub fn written_chunks(&self) -> Vec<Bytes> {
        lock(&self.inner.written).clone()
    }

    /// Returns the complete lines written so far.
    #[must_use]
    pub fn written_lines(&self) -> Vec<String> {
        let mut decoder = LineDecoder::new();
        for chunk in lock(&self.inner.written).iter() {
            decoder.feed(chunk);
        }

        let mut lines = Vec::new();
        while let Ok(Some(line)) = decoder.decode() {
            lines.push(line);
        }
        lines
    }

    /// Delivers raw bytes as a notification.
    ///
    /// Returns false if nothing is subscribed.
    pub fn inject(&self, data: impl Into<Bytes>) -> bool {
        lock(&self.inner.inbound)
            .as_ref()
            .is_some_and(|tx| tx.try_send(data.into()).is_ok())
    }

    /// Delivers one terminated line as a notification.
    pub fn inject_line(&self, line: &str) -> bool {
        self.inject(format!("{line}\n"))
    }

    /// Simulates the peer vanishing.
    pub fn drop_connection(&self) {
        self.close();
    }

    fn attach(&self, on_disconnect: oneshot::Sender<()>) {
        *lock(&self.inner.on_disconnect) = Some(on_disconnect);
    }

    fn close(&self) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            tracing::debug!("mock link closed");
        }
        lock(&self.inner.inbound).take();
        if let Some(tx) = lock(&self.inner.on_disconnect).take() {
            let _ = tx.send(());
        }
    }

    fn replies_for(&self, chunk: &[u8]) -> Vec<String> {
        let Some(responder) = lock(&self.inner.responder).clone() else {
            return Vec::new();
        };

        let mut requests = lock(&self.inner.requests);
        requests.feed(chunk);

        let mut replies = Vec::new();
        while let Ok(Some(line)) = requests.decode() {
            replies.extend(responder(&line));
        }
        replies
    }
}

impl Link for MockLink {
    fn write_chunk(&self, chunk: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(Error::NotConnected);
            }
            if self.inner.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::transport("write rejected"));
            }

            lock(&self.inner.written).push(chunk.clone());
            for reply in self.replies_for(&chunk) {
                self.inject_line(&reply);
            }
            Ok(())
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Bytes>>> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(Error::NotConnected);
            }
            if self.inner.fail_subscribe.load(Ordering::SeqCst) {
                return Err(Error::transport("subscribe rejected"));
            }
            let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
            *lock(&self.inner.inbound) = Some(tx);
            Ok(rx)
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.close();
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MockCentralInner {
    links: Mutex<HashMap<PeerAddress, MockLink>>,
    attempts: Mutex<Vec<PeerAddress>>,
    unreachable: Mutex<HashSet<PeerAddress>>,
    no_notify: Mutex<HashSet<PeerAddress>>,
    scan_delay: Mutex<Duration>,
    responder: Mutex<Option<Responder>>,
    scan: Mutex<Option<(ScanHandle, mpsc::Sender<Advertisement>)>>,
    next_scan: AtomicU64,
}

/// A simulated BLE central.
#[derive(Clone, Default)]
pub struct MockCentral {
    inner: Arc<MockCentralInner>,
}

impl MockCentral {
    /// Creates a central whose peripherals never answer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a central whose peripherals answer via `responder`.
    #[must_use]
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        let central = Self::new();
        *lock(&central.inner.responder) = Some(Arc::new(responder));
        central
    }

    /// Makes connects to `address` fail.
    pub fn set_unreachable(&self, address: impl Into<PeerAddress>) {
        lock(&self.inner.unreachable).insert(address.into());
    }

    /// Makes links to `address` connect but refuse notifications.
    pub fn set_subscribe_failing(&self, address: impl Into<PeerAddress>) {
        lock(&self.inner.no_notify).insert(address.into());
    }

    /// Delays every discovery start by `delay`.
    pub fn set_scan_delay(&self, delay: Duration) {
        *lock(&self.inner.scan_delay) = delay;
    }

    /// Returns every connect attempt in order.
    #[must_use]
    pub fn connect_attempts(&self) -> Vec<PeerAddress> {
        lock(&self.inner.attempts).clone()
    }

    /// Returns the most recent link opened to `address`.
    #[must_use]
    pub fn link(&self, address: &PeerAddress) -> Option<MockLink> {
        lock(&self.inner.links).get(address).cloned()
    }

    /// Returns true while a discovery operation is active.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        lock(&self.inner.scan).is_some()
    }

    /// Delivers an advertisement to the active discovery operation.
    ///
    /// Returns false if no discovery is running.
    pub async fn advertise(&self, advertisement: Advertisement) -> bool {
        let tx = lock(&self.inner.scan).as_ref().map(|(_, tx)| tx.clone());
        match tx {
            Some(tx) => tx.send(advertisement).await.is_ok(),
            None => false,
        }
    }
}

impl Central for MockCentral {
    fn connect<'a>(
        &'a self,
        address: &'a PeerAddress,
        on_disconnect: oneshot::Sender<()>,
    ) -> BoxFuture<'a, Result<Arc<dyn Link>>> {
        Box::pin(async move {
            lock(&self.inner.attempts).push(address.clone());
            if lock(&self.inner.unreachable).contains(address) {
                return Err(Error::transport(format!("{address} unreachable")));
            }

            let link = MockLink::new();
            link.attach(on_disconnect);
            link.fail_subscribe(lock(&self.inner.no_notify).contains(address));
            if let Some(responder) = lock(&self.inner.responder).clone() {
                link.set_responder(responder);
            }
            lock(&self.inner.links).insert(address.clone(), link.clone());

            let link: Arc<dyn Link> = Arc::new(link);
            Ok(link)
        })
    }

    fn start_scan(
        &self,
        advertisements: mpsc::Sender<Advertisement>,
    ) -> BoxFuture<'_, Result<ScanHandle>> {
        Box::pin(async move {
            let delay = *lock(&self.inner.scan_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let handle = ScanHandle(self.inner.next_scan.fetch_add(1, Ordering::SeqCst));
            *lock(&self.inner.scan) = Some((handle, advertisements));
            Ok(handle)
        })
    }

    fn stop_scan(&self, handle: ScanHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut scan = lock(&self.inner.scan);
            if scan.as_ref().is_some_and(|(active, _)| *active == handle) {
                scan.take();
            }
            Ok(())
        })
    }
}

/// Locks a mutex, recovering the data if a panicking test poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responder_answers_complete_lines() {
        let link = MockLink::new();
        link.set_responder(Arc::new(simulated_peripheral));
        let mut rx = link.subscribe().await.unwrap();

        link.write_chunk(Bytes::from_static(b"getset")).await.unwrap();
        assert!(rx.try_recv().is_err());

        link.write_chunk(Bytes::from_static(b"tings\n")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"getsettings:3,15\n"));
    }

    #[tokio::test]
    async fn test_drop_connection_fires_callback() {
        let central = MockCentral::new();
        let (tx, rx) = oneshot::channel();
        let address = PeerAddress::new("AA:BB");

        let link = central.connect(&address, tx).await.unwrap();
        let mut inbound = link.subscribe().await.unwrap();
        assert!(link.is_connected());

        central.link(&address).unwrap().drop_connection();

        assert!(rx.await.is_ok());
        assert!(!link.is_connected());
        assert!(inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let central = MockCentral::new();
        central.set_unreachable("AA:BB");
        let (tx, _rx) = oneshot::channel();

        let result = central.connect(&PeerAddress::new("AA:BB"), tx).await;
        assert!(matches!(result, Err(Error::Transport { .. })));
        assert_eq!(central.connect_attempts(), vec![PeerAddress::new("AA:BB")]);
    }

    #[tokio::test]
    async fn test_subscribe_failing_peer() {
        let central = MockCentral::new();
        central.set_subscribe_failing("AA:BB");
        let (tx, _rx) = oneshot::channel();

        let link = central.connect(&PeerAddress::new("AA:BB"), tx).await.unwrap();
        assert!(link.is_connected());
        assert!(matches!(link.subscribe().await, Err(Error::Transport { .. })));
    }

    #[tokio::test]
    async fn test_scan_lifecycle() {
        let central = MockCentral::new();
        let (tx, mut rx) = mpsc::channel(4);

        assert!(!central.advertise(Advertisement::new("AA:BB")).await);

        let handle = central.start_scan(tx).await.unwrap();
        assert!(central.is_scanning());
        assert!(central.advertise(Advertisement::new("AA:BB")).await);
        assert_eq!(rx.recv().await.unwrap().address.as_str(), "AA:BB");

        central.stop_scan(handle).await.unwrap();
        assert!(!central.is_scanning());
        assert!(rx.recv().await.is_none());
    }
}
