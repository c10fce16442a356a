//! # bleuart
//!
//! A session engine for BLE peripherals that speak a newline-delimited
//! text protocol over a UART-style characteristic.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Transport chunking with write pacing and inbound line reassembly
//! - Request/response correlation with bounded waits
//! - Per-peer polling of clock, motion, battery and firmware
//! - Fleet scan cycles with blacklisting and cleanup of stale peers
//! - Event-driven notifications for a presentation layer
//!
//! ## Quick Start
//!
//! ```no_run
//! use bleuart::{EventKind, Fleet, FleetConfig, MockCentral};
//! use bleuart::transport::mock::simulated_peripheral;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bleuart::Error> {
//!     // Any `Central` implementation works; the mock plays the peripherals
//!     let fleet = Fleet::new(
//!         MockCentral::with_responder(simulated_peripheral),
//!         FleetConfig::new(),
//!     );
//!     let mut events = fleet.subscribe();
//!
//!     let scanner = fleet.clone();
//!     tokio::spawn(async move { scanner.start_scan().await });
//!
//!     while let Some(event) = events.recv().await {
//!         if event.kind() == EventKind::ScanFinished {
//!             break;
//!         }
//!         println!("{event:?}");
//!     }
//!
//!     fleet.disconnect_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Line framing, keywords, commands and argument decoders
//! - [`types`] - Peer addresses, advertisements and device state
//! - [`transport`] - Driver traits, the pacing framer and an in-memory mock
//! - [`event`] - Async event system for lifecycle and update notifications
//! - [`session`] - Per-peer connection, handshake, polling and routing
//! - [`fleet`] - Scan cycles and bulk disconnects

pub mod error;
pub mod event;
pub mod fleet;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use error::{DecodeError, Error, FrameError, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use fleet::{Fleet, FleetConfig, UART_CHAR_UUID, UART_SERVICE_UUID};
pub use protocol::{Command, Keyword, Line};
pub use session::{PendingResponses, Session, SessionConfig};
pub use transport::{Central, Framer, Link, MockCentral, MockLink, ScanHandle};
pub use types::{Advertisement, DeviceState, ImuSample, PeerAddress, Settings, Vector3};
