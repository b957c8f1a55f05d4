//! Change notification interface.

use ctldb_store::{MemberRecord, NetworkRecord};
use parking_lot::Mutex;
use std::sync::Arc;

/// Receives every accepted change to a network or member document.
///
/// Called with the engine's tracking lock held, so implementations must not
/// call back into the engine.
pub trait ChangeNotifier: Send + Sync {
    /// A network document changed. `remote` is true if the change came from
    /// the remote store after the initial load.
    fn network_changed(&self, old: Option<&NetworkRecord>, new: &NetworkRecord, remote: bool);

    /// A member document changed.
    fn member_changed(&self, old: Option<&MemberRecord>, new: &MemberRecord, remote: bool);
}

impl<N: ChangeNotifier + ?Sized> ChangeNotifier for Arc<N> {
    fn network_changed(&self, old: Option<&NetworkRecord>, new: &NetworkRecord, remote: bool) {
        (**self).network_changed(old, new, remote);
    }

    fn member_changed(&self, old: Option<&MemberRecord>, new: &MemberRecord, remote: bool) {
        (**self).member_changed(old, new, remote);
    }
}

/// A notifier that ignores every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn network_changed(&self, _: Option<&NetworkRecord>, _: &NetworkRecord, _: bool) {}

    fn member_changed(&self, _: Option<&MemberRecord>, _: &MemberRecord, _: bool) {}
}

/// One notification, as captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A network change.
    Network {
        /// Previous local copy.
        old: Option<NetworkRecord>,
        /// New document.
        new: NetworkRecord,
        /// Remote origin flag.
        remote: bool,
    },
    /// A member change.
    Member {
        /// Previous local copy.
        old: Option<MemberRecord>,
        /// New document.
        new: MemberRecord,
        /// Remote origin flag.
        remote: bool,
    },
}

impl ChangeEvent {
    /// Returns the remote origin flag.
    pub fn is_remote(&self) -> bool {
        match self {
            ChangeEvent::Network { remote, .. } | ChangeEvent::Member { remote, .. } => *remote,
        }
    }
}

/// A notifier that records every change, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns every recorded event.
    pub fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn network_changed(&self, old: Option<&NetworkRecord>, new: &NetworkRecord, remote: bool) {
        self.events.lock().push(ChangeEvent::Network {
            old: old.cloned(),
            new: new.clone(),
            remote,
        });
    }

    fn member_changed(&self, old: Option<&MemberRecord>, new: &MemberRecord, remote: bool) {
        self.events.lock().push(ChangeEvent::Member {
            old: old.cloned(),
            new: new.clone(),
            remote,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_notifier_captures_and_drains() {
        let notifier = Arc::new(RecordingNotifier::new());
        let shared: Arc<dyn ChangeNotifier> = notifier.clone();

        let network = NetworkRecord::new(7);
        shared.network_changed(None, &network, false);
        let member = MemberRecord::new(7, 9);
        shared.member_changed(None, &member, true);

        assert_eq!(notifier.len(), 2);
        let events = notifier.take();
        assert!(!events[0].is_remote());
        assert!(events[1].is_remote());
        assert!(matches!(&events[1], ChangeEvent::Member { new, .. } if new.id == 9));
        assert!(notifier.is_empty());
    }
}
