//! Correlation of outbound requests with their responses.
//!
//! At most one waiter exists per keyword. Registering a second waiter
//! while the first is outstanding is rejected with
//! [`Error::PendingExists`], so a response can never be delivered to the
//! wrong caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Default time to wait for a response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

struct Waiter {
    id: u64,
    created: Instant,
    tx: oneshot::Sender<String>,
}

#[derive(Default)]
struct PendingInner {
    waiters: Mutex<HashMap<String, Waiter>>,
    next_id: AtomicU64,
}

/// Registry of outstanding response waiters, keyed by keyword.
#[derive(Clone, Default)]
pub struct PendingResponses {
    inner: Arc<PendingInner>,
}

impl PendingResponses {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<String, Waiter>> {
        self.inner
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a waiter for `keyword`.
    ///
    /// Register before sending the request so a fast response cannot be
    /// missed.
    ///
    /// # Errors
    ///
    /// Returns `Error::PendingExists` if a waiter is already registered.
    pub fn register(&self, keyword: &str) -> Result<PendingResponse> {
        let mut waiters = self.waiters();
        if waiters.contains_key(keyword) {
            return Err(Error::PendingExists {
                keyword: keyword.to_owned(),
            });
        }

        let (tx, rx) = oneshot::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        waiters.insert(
            keyword.to_owned(),
            Waiter {
                id,
                created: Instant::now(),
                tx,
            },
        );

        Ok(PendingResponse {
            keyword: keyword.to_owned(),
            id,
            rx,
            registry: self.clone(),
        })
    }

    /// Registers a waiter and waits for its response.
    ///
    /// Returns `Ok(None)` if nothing arrives within `timeout`.
    pub async fn await_response(&self, keyword: &str, timeout: Duration) -> Result<Option<String>> {
        Ok(self.register(keyword)?.wait(timeout).await)
    }

    /// Completes the waiter for `keyword`, if any.
    ///
    /// Returns true if a waiter received the value.
    pub fn resolve(&self, keyword: &str, value: String) -> bool {
        let Some(waiter) = self.waiters().remove(keyword) else {
            return false;
        };

        tracing::trace!(
            "resolved '{keyword}' after {}ms",
            waiter.created.elapsed().as_millis()
        );
        waiter.tx.send(value).is_ok()
    }

    /// Returns true if a waiter is registered for `keyword`.
    #[must_use]
    pub fn is_pending(&self, keyword: &str) -> bool {
        self.waiters().contains_key(keyword)
    }

    /// Returns the number of outstanding waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters().len()
    }

    /// Returns true if nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters().is_empty()
    }

    /// Drops every waiter; their callers see no response immediately.
    pub fn clear(&self) {
        self.waiters().clear();
    }

    fn remove_if_current(&self, keyword: &str, id: u64) {
        let mut waiters = self.waiters();
        if waiters.get(keyword).is_some_and(|w| w.id == id) {
            waiters.remove(keyword);
        }
    }
}

/// A registered waiter.
///
/// Dropping it removes the registration if it is still outstanding.
pub struct PendingResponse {
    keyword: String,
    id: u64,
    rx: oneshot::Receiver<String>,
    registry: PendingResponses,
}

impl PendingResponse {
    /// Returns the keyword this waiter is registered under.
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Waits for the response.
    ///
    /// Returns `None` on timeout or if the registry was cleared. A response
    /// line without argument resolves with an empty string.
    pub async fn wait(mut self, timeout: Duration) -> Option<String> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::debug!(
                    "no response for '{}' within {}ms",
                    self.keyword,
                    timeout.as_millis()
                );
                None
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.registry.remove_if_current(&self.keyword, self.id);
    }
}
