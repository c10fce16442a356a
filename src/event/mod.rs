//! Event system for lifecycle and update notifications.
//!
//! Sessions and the fleet publish typed events; the presentation layer
//! subscribes and reads device state from [`Event::DeviceUpdated`]
//! snapshots.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::types::{DeviceState, PeerAddress};

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A scan cycle started.
    ScanStarted,
    /// A scan cycle finished, including cleanup.
    ScanFinished,
    /// Bulk disconnect started.
    DisconnectStarted,
    /// Bulk disconnect finished.
    DisconnectFinished,
    /// The peripheral pinged for the first time.
    DeviceConnected(PeerAddress),
    /// The session is shutting down.
    DeviceDisconnecting(PeerAddress),
    /// The session was removed from the fleet.
    DeviceDisconnected(PeerAddress),
    /// Device state changed.
    DeviceUpdated(Box<DeviceState>),
}

/// Event discriminants, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ScanStarted,
    ScanFinished,
    DisconnectStarted,
    DisconnectFinished,
    DeviceConnected,
    DeviceDisconnecting,
    DeviceDisconnected,
    DeviceUpdated,
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ScanStarted => EventKind::ScanStarted,
            Self::ScanFinished => EventKind::ScanFinished,
            Self::DisconnectStarted => EventKind::DisconnectStarted,
            Self::DisconnectFinished => EventKind::DisconnectFinished,
            Self::DeviceConnected(_) => EventKind::DeviceConnected,
            Self::DeviceDisconnecting(_) => EventKind::DeviceDisconnecting,
            Self::DeviceDisconnected(_) => EventKind::DeviceDisconnected,
            Self::DeviceUpdated(_) => EventKind::DeviceUpdated,
        }
    }

    /// Returns the peer this event is about, if any.
    #[must_use]
    pub fn address(&self) -> Option<&PeerAddress> {
        match self {
            Self::DeviceConnected(address)
            | Self::DeviceDisconnecting(address)
            | Self::DeviceDisconnected(address) => Some(address),
            Self::DeviceUpdated(state) => Some(&state.address),
            Self::ScanStarted
            | Self::ScanFinished
            | Self::DisconnectStarted
            | Self::DisconnectFinished => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once every dispatcher is dropped. Lagged events are
    /// skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("subscription lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// Subscription filter for specific event types.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter by peer.
    pub address: Option<PeerAddress>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            address: None,
        }
    }

    /// Restricts the filter to one peer.
    #[must_use]
    pub fn device(mut self, address: PeerAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(ref expected) = self.address {
            if event.address() != Some(expected) {
                return false;
            }
        }

        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the channel is closed.
    pub async fn wait_for(
        &self,
        filter: EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                loop {
                    let event = subscription.recv().await?;
                    if filter.matches(&event) {
                        return Some(event);
                    }
                }
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}
