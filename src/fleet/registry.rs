//! Shared table of known sessions and blacklisted peers.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::session::Session;
use crate::types::{Advertisement, PeerAddress};

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<PeerAddress, Session>,
    blacklist: HashSet<PeerAddress>,
}

/// Outcome of offering an advertisement to the registry.
#[derive(Debug)]
pub(crate) enum Admission {
    /// A session already exists for the advertiser.
    Known(Session),
    /// The advertiser was rejected or is blacklisted.
    Ignored,
    /// A new session was created and inserted.
    Admitted(Session),
}

/// Sessions keyed by address, plus the blacklist of the current scan cycle.
///
/// Every check-then-insert happens under one lock so concurrent discovery
/// callbacks cannot create two sessions for the same peer.
#[derive(Default)]
pub(crate) struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up or admits the advertiser.
    ///
    /// `accept` filters unknown advertisers; `create` builds the session
    /// for an accepted one.
    pub fn admit(
        &self,
        advertisement: &Advertisement,
        accept: impl FnOnce(&Advertisement) -> bool,
        create: impl FnOnce() -> Session,
    ) -> Admission {
        let mut state = self.state();
        let address = &advertisement.address;

        if let Some(session) = state.sessions.get(address) {
            return Admission::Known(session.clone());
        }
        if state.blacklist.contains(address) || !accept(advertisement) {
            return Admission::Ignored;
        }

        let session = create();
        state.sessions.insert(address.clone(), session.clone());
        Admission::Admitted(session)
    }

    #[cfg(test)]
    pub fn insert(&self, session: Session) {
        let address = session.address().clone();
        self.state().sessions.insert(address, session);
    }

    pub fn remove(&self, address: &PeerAddress) -> Option<Session> {
        self.state().sessions.remove(address)
    }

    pub fn get(&self, address: &PeerAddress) -> Option<Session> {
        self.state().sessions.get(address).cloned()
    }

    /// Returns a snapshot of every session.
    pub fn sessions(&self) -> Vec<Session> {
        self.state().sessions.values().cloned().collect()
    }

    pub fn blacklist(&self, address: PeerAddress) {
        self.state().blacklist.insert(address);
    }

    pub fn is_blacklisted(&self, address: &PeerAddress) -> bool {
        self.state().blacklist.contains(address)
    }

    pub fn clear_blacklist(&self) {
        self.state().blacklist.clear();
    }

    pub fn len(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::event::EventDispatcher;
    use crate::session::SessionConfig;
    use crate::transport::MockCentral;

    fn session_for(registry: &Arc<Registry>, address: &PeerAddress) -> Session {
        Session::new(
            address.clone(),
            "BBQ3",
            SessionConfig::new(),
            Arc::new(MockCentral::new()),
            EventDispatcher::new(16),
            Arc::downgrade(registry),
        )
    }

    #[test]
    fn test_admit_inserts_once() {
        let registry = Arc::new(Registry::new());
        let adv = Advertisement::new("AA:BB").name("BBQ3");

        let first = registry.admit(&adv, |_| true, || session_for(&registry, &adv.address));
        assert!(matches!(first, Admission::Admitted(_)));

        let second = registry.admit(&adv, |_| true, || unreachable!());
        assert!(matches!(second, Admission::Known(ref s) if s.address() == &adv.address));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejected_and_blacklisted_are_ignored() {
        let registry = Arc::new(Registry::new());
        let adv = Advertisement::new("AA:BB");

        assert!(matches!(
            registry.admit(&adv, |_| false, || unreachable!()),
            Admission::Ignored
        ));

        registry.blacklist(adv.address.clone());
        assert!(registry.is_blacklisted(&adv.address));
        assert!(matches!(
            registry.admit(&adv, |_| true, || unreachable!()),
            Admission::Ignored
        ));

        registry.clear_blacklist();
        assert!(!registry.is_blacklisted(&adv.address));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_reports_presence() {
        let registry = Arc::new(Registry::new());
        let address = PeerAddress::new("AA:BB");
        registry.insert(session_for(&registry, &address));

        assert!(registry.get(&address).is_some());
        assert_eq!(registry.sessions().len(), 1);
        assert!(registry.remove(&address).is_some());
        assert!(registry.remove(&address).is_none());
    }
}
