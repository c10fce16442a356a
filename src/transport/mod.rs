//! Transport layer for peripheral communication.
//!
//! This module provides the abstraction over the platform BLE driver.
//! A [`Central`] discovers peripherals and opens [`Link`]s; a link exposes
//! chunk writes and the raw notification stream of the UART characteristic.

pub mod framer;
pub mod mock;

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::types::{Advertisement, PeerAddress};

/// Opaque identifier of an active discovery operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanHandle(pub u64);

/// Trait for an open connection to one peripheral.
pub trait Link: Send + Sync {
    /// Writes one chunk and resolves once the driver acknowledged it.
    fn write_chunk(&self, chunk: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Subscribes to notifications and returns the raw byte stream.
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Bytes>>>;

    /// Closes the connection.
    fn disconnect(&self) -> BoxFuture<'_, Result<()>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

/// Trait for the platform central role.
pub trait Central: Send + Sync {
    /// Connects to a peripheral.
    ///
    /// The driver fires `on_disconnect` whenever the connection drops,
    /// including drops the session did not ask for.
    fn connect<'a>(
        &'a self,
        address: &'a PeerAddress,
        on_disconnect: oneshot::Sender<()>,
    ) -> BoxFuture<'a, Result<Arc<dyn Link>>>;

    /// Starts discovery, delivering advertisements to `advertisements`.
    fn start_scan(
        &self,
        advertisements: mpsc::Sender<Advertisement>,
    ) -> BoxFuture<'_, Result<ScanHandle>>;

    /// Stops a discovery operation.
    fn stop_scan(&self, handle: ScanHandle) -> BoxFuture<'_, Result<()>>;
}

pub use framer::Framer;
pub use mock::{MockCentral, MockLink};
