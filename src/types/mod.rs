//! Data types shared across the library:
//! - Peer addresses and advertisements
//! - Polled device state

pub mod device;
pub mod peer;

pub use device::{DeviceState, ImuSample, Settings, UNKNOWN_FIRMWARE, Vector3};
pub use peer::{Advertisement, PeerAddress};
