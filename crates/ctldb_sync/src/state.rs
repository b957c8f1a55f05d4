//! Dirty-state tracking for networks and members.
//!
//! Every network and member the controller has saved or pulled gets an entry
//! here. Entries record whether the local copy still needs pushing and, for
//! members, when and where the node was last seen online.
//!
//! Each mark bumps a sequence number stored on the entry. The sync loop takes
//! a [`snapshot`](DirtyTracker::snapshot) of pending pushes, releases the
//! lock while talking to the remote store, and then calls
//! [`clear`](DirtyTracker::clear), which only resets a flag if no newer local
//! write has landed in the meantime.

use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Sync state of one member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberState {
    /// The local member document has not been pushed yet.
    pub dirty: bool,
    /// Last time the node was seen online, in milliseconds since the epoch.
    pub last_online_time: u64,
    /// Physical address the node was last seen at.
    pub last_online_address: Option<IpAddr>,
    /// The online pulse has not been pushed yet.
    pub last_online_dirty: bool,
    dirty_seq: u64,
    online_seq: u64,
}

impl MemberState {
    fn mark_dirty(&mut self, seq: u64) {
        self.dirty = true;
        self.dirty_seq = seq;
    }

    fn mark_online(&mut self, seq: u64, now_ms: u64, address: Option<IpAddr>) {
        self.last_online_time = now_ms;
        if address.is_some() {
            self.last_online_address = address;
        }
        self.last_online_dirty = true;
        self.online_seq = seq;
    }
}

/// Sync state of one network and its members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkState {
    /// The local network document has not been pushed yet.
    pub dirty: bool,
    /// Members of this network, by member id.
    pub members: BTreeMap<u64, MemberState>,
    dirty_seq: u64,
}

impl NetworkState {
    fn mark_dirty(&mut self, seq: u64) {
        self.dirty = true;
        self.dirty_seq = seq;
    }
}

/// A push the sync loop owes the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingPush {
    /// Push the local network document.
    Network {
        /// Network id.
        nwid: u64,
        /// Sequence number at snapshot time.
        seq: u64,
    },
    /// Push the local member document.
    Member {
        /// Network id.
        nwid: u64,
        /// Member id.
        member_id: u64,
        /// Sequence number at snapshot time.
        seq: u64,
    },
    /// Push an online pulse.
    Online {
        /// Network id.
        nwid: u64,
        /// Member id.
        member_id: u64,
        /// Time the member was seen, in milliseconds since the epoch.
        time: u64,
        /// Address the member was seen at.
        address: IpAddr,
        /// Sequence number at snapshot time.
        seq: u64,
    },
}

/// Tracked entries, accessed through [`DirtyTracker::lock`].
#[derive(Debug, Default)]
pub struct TrackedState {
    networks: BTreeMap<u64, NetworkState>,
    seq: u64,
}

impl TrackedState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Returns the entry for a network, creating it if needed.
    pub fn observe_network(&mut self, nwid: u64) -> &mut NetworkState {
        self.networks.entry(nwid).or_default()
    }

    /// Returns the entry for a member, creating it (and its network) if needed.
    pub fn observe_member(&mut self, nwid: u64, member_id: u64) -> &mut MemberState {
        self.observe_network(nwid)
            .members
            .entry(member_id)
            .or_default()
    }

    /// Marks a network as needing a push.
    pub fn mark_network_dirty(&mut self, nwid: u64) {
        let seq = self.next_seq();
        self.observe_network(nwid).mark_dirty(seq);
    }

    /// Marks a member as needing a push.
    pub fn mark_member_dirty(&mut self, nwid: u64, member_id: u64) {
        let seq = self.next_seq();
        self.observe_member(nwid, member_id).mark_dirty(seq);
    }

    /// Records that a member was seen online.
    ///
    /// Only already-tracked members are updated; returns false otherwise. The
    /// address is kept from the previous sighting when `address` is `None`.
    pub fn mark_member_online(
        &mut self,
        nwid: u64,
        member_id: u64,
        now_ms: u64,
        address: Option<IpAddr>,
    ) -> bool {
        let seq = self.seq + 1;
        let Some(member) = self
            .networks
            .get_mut(&nwid)
            .and_then(|network| network.members.get_mut(&member_id))
        else {
            return false;
        };
        member.mark_online(seq, now_ms, address);
        self.seq = seq;
        true
    }

    /// Returns a network entry.
    pub fn network(&self, nwid: u64) -> Option<&NetworkState> {
        self.networks.get(&nwid)
    }

    /// Returns a member entry.
    pub fn member(&self, nwid: u64, member_id: u64) -> Option<&MemberState> {
        self.networks
            .get(&nwid)
            .and_then(|network| network.members.get(&member_id))
    }

    /// Lists every pending push, networks before their members.
    ///
    /// Online pulses are only listed when `include_online` is set and an
    /// address is known.
    pub fn snapshot(&self, include_online: bool) -> Vec<PendingPush> {
        let mut pending = Vec::new();
        for (&nwid, network) in &self.networks {
            if network.dirty {
                pending.push(PendingPush::Network {
                    nwid,
                    seq: network.dirty_seq,
                });
            }
            for (&member_id, member) in &network.members {
                if include_online && member.last_online_dirty {
                    if let Some(address) = member.last_online_address {
                        pending.push(PendingPush::Online {
                            nwid,
                            member_id,
                            time: member.last_online_time,
                            address,
                            seq: member.online_seq,
                        });
                    }
                }
                if member.dirty {
                    pending.push(PendingPush::Member {
                        nwid,
                        member_id,
                        seq: member.dirty_seq,
                    });
                }
            }
        }
        pending
    }

    /// Clears the flag behind a completed push.
    ///
    /// Returns false, leaving the flag set, if the entry was marked again
    /// after the snapshot was taken.
    pub fn clear(&mut self, push: &PendingPush) -> bool {
        match *push {
            PendingPush::Network { nwid, seq } => match self.networks.get_mut(&nwid) {
                Some(network) if network.dirty_seq == seq => {
                    network.dirty = false;
                    true
                }
                _ => false,
            },
            PendingPush::Member {
                nwid,
                member_id,
                seq,
            } => match self.member_mut(nwid, member_id) {
                Some(member) if member.dirty_seq == seq => {
                    member.dirty = false;
                    true
                }
                _ => false,
            },
            PendingPush::Online {
                nwid,
                member_id,
                seq,
                ..
            } => match self.member_mut(nwid, member_id) {
                Some(member) if member.online_seq == seq => {
                    member.last_online_dirty = false;
                    true
                }
                _ => false,
            },
        }
    }

    fn member_mut(&mut self, nwid: u64, member_id: u64) -> Option<&mut MemberState> {
        self.networks
            .get_mut(&nwid)
            .and_then(|network| network.members.get_mut(&member_id))
    }

    /// Number of entries with an unpushed document (online pulses excluded).
    pub fn dirty_count(&self) -> usize {
        self.networks
            .values()
            .map(|network| {
                usize::from(network.dirty) + network.members.values().filter(|m| m.dirty).count()
            })
            .sum()
    }
}

/// Owner of all tracked sync state.
///
/// A single mutex guards every entry. Callers that need to combine a check
/// with an update (for example "apply this remote change unless the local
/// copy is dirty") take the guard with [`lock`](Self::lock) and hold it for
/// the whole compare-and-apply.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    state: Mutex<TrackedState>,
}

impl DirtyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the tracked state.
    pub fn lock(&self) -> MutexGuard<'_, TrackedState> {
        self.state.lock()
    }

    /// Marks a network as needing a push.
    pub fn mark_network_dirty(&self, nwid: u64) {
        self.state.lock().mark_network_dirty(nwid);
    }

    /// Marks a member as needing a push.
    pub fn mark_member_dirty(&self, nwid: u64, member_id: u64) {
        self.state.lock().mark_member_dirty(nwid, member_id);
    }

    /// Records that a tracked member was seen online. See
    /// [`TrackedState::mark_member_online`].
    pub fn mark_member_online(
        &self,
        nwid: u64,
        member_id: u64,
        now_ms: u64,
        address: Option<IpAddr>,
    ) -> bool {
        self.state
            .lock()
            .mark_member_online(nwid, member_id, now_ms, address)
    }

    /// Lists every pending push.
    pub fn snapshot(&self, include_online: bool) -> Vec<PendingPush> {
        self.state.lock().snapshot(include_online)
    }

    /// Clears the flag behind a completed push.
    pub fn clear(&self, push: &PendingPush) -> bool {
        self.state.lock().clear(push)
    }

    /// Returns true if the network document awaits a push.
    pub fn is_network_dirty(&self, nwid: u64) -> bool {
        self.state.lock().network(nwid).is_some_and(|n| n.dirty)
    }

    /// Returns true if the member document awaits a push.
    pub fn is_member_dirty(&self, nwid: u64, member_id: u64) -> bool {
        self.state
            .lock()
            .member(nwid, member_id)
            .is_some_and(|m| m.dirty)
    }

    /// Returns true if the network has an entry.
    pub fn is_network_tracked(&self, nwid: u64) -> bool {
        self.state.lock().network(nwid).is_some()
    }

    /// Returns a copy of a network entry.
    pub fn network_state(&self, nwid: u64) -> Option<NetworkState> {
        self.state.lock().network(nwid).cloned()
    }

    /// Returns a copy of a member entry.
    pub fn member_state(&self, nwid: u64, member_id: u64) -> Option<MemberState> {
        self.state.lock().member(nwid, member_id).cloned()
    }

    /// Number of entries with an unpushed document.
    pub fn dirty_count(&self) -> usize {
        self.state.lock().dirty_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const NWID: u64 = 0x0011_2233_4400_0001;
    const MEMBER: u64 = 0xabcd_ef01_23;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn marks_create_entries_lazily() {
        let tracker = DirtyTracker::new();
        assert!(!tracker.is_network_tracked(NWID));

        tracker.mark_member_dirty(NWID, MEMBER);
        assert!(tracker.is_network_tracked(NWID));
        assert!(!tracker.is_network_dirty(NWID));
        assert!(tracker.is_member_dirty(NWID, MEMBER));
        assert_eq!(tracker.dirty_count(), 1);

        tracker.mark_network_dirty(NWID);
        assert!(tracker.is_network_dirty(NWID));
        assert_eq!(tracker.dirty_count(), 2);
    }

    #[test]
    fn online_for_untracked_member_is_noop() {
        let tracker = DirtyTracker::new();
        assert!(!tracker.mark_member_online(NWID, MEMBER, 1000, Some(addr(1))));
        assert!(!tracker.is_network_tracked(NWID));

        tracker.mark_network_dirty(NWID);
        assert!(!tracker.mark_member_online(NWID, MEMBER, 1000, Some(addr(1))));
        assert!(tracker.member_state(NWID, MEMBER).is_none());
    }

    #[test]
    fn online_keeps_previous_address_when_none_given() {
        let tracker = DirtyTracker::new();
        tracker.lock().observe_member(NWID, MEMBER);

        assert!(tracker.mark_member_online(NWID, MEMBER, 1000, Some(addr(1))));
        assert!(tracker.mark_member_online(NWID, MEMBER, 2000, None));

        let member = tracker.member_state(NWID, MEMBER).unwrap();
        assert_eq!(member.last_online_time, 2000);
        assert_eq!(member.last_online_address, Some(addr(1)));
        assert!(member.last_online_dirty);
        assert!(!member.dirty);
    }

    #[test]
    fn snapshot_orders_networks_before_members() {
        let tracker = DirtyTracker::new();
        tracker.mark_member_dirty(NWID, MEMBER);
        tracker.mark_network_dirty(NWID);
        tracker.mark_member_online(NWID, MEMBER, 5, Some(addr(2)));

        let pending = tracker.snapshot(true);
        assert_eq!(pending.len(), 3);
        assert!(matches!(pending[0], PendingPush::Network { nwid: NWID, .. }));
        assert!(matches!(
            pending[1],
            PendingPush::Online { time: 5, address, .. } if address == addr(2)
        ));
        assert!(matches!(pending[2], PendingPush::Member { member_id: MEMBER, .. }));

        assert_eq!(tracker.snapshot(false).len(), 2);
    }

    #[test]
    fn online_without_address_is_not_pushed() {
        let tracker = DirtyTracker::new();
        tracker.lock().observe_member(NWID, MEMBER);
        tracker.mark_member_online(NWID, MEMBER, 5, None);
        assert!(tracker.snapshot(true).is_empty());
        assert!(tracker.member_state(NWID, MEMBER).unwrap().last_online_dirty);
    }

    #[test]
    fn clear_resets_flags() {
        let tracker = DirtyTracker::new();
        tracker.mark_network_dirty(NWID);
        tracker.mark_member_dirty(NWID, MEMBER);
        tracker.mark_member_online(NWID, MEMBER, 5, Some(addr(3)));

        for push in tracker.snapshot(true) {
            assert!(tracker.clear(&push));
        }
        assert_eq!(tracker.dirty_count(), 0);
        assert!(tracker.snapshot(true).is_empty());
        assert!(!tracker.member_state(NWID, MEMBER).unwrap().last_online_dirty);
    }

    #[test]
    fn clear_skips_entries_marked_after_snapshot() {
        let tracker = DirtyTracker::new();
        tracker.mark_network_dirty(NWID);
        tracker.mark_member_dirty(NWID, MEMBER);
        let pending = tracker.snapshot(false);

        tracker.mark_network_dirty(NWID);
        assert!(!tracker.clear(&pending[0]));
        assert!(tracker.clear(&pending[1]));

        assert!(tracker.is_network_dirty(NWID));
        assert!(!tracker.is_member_dirty(NWID, MEMBER));
    }

    #[test]
    fn online_mark_does_not_disturb_document_sequence() {
        let tracker = DirtyTracker::new();
        tracker.mark_member_dirty(NWID, MEMBER);
        let pending = tracker.snapshot(false);

        tracker.mark_member_online(NWID, MEMBER, 9, Some(addr(4)));
        assert!(tracker.clear(&pending[0]));
        assert!(!tracker.is_member_dirty(NWID, MEMBER));
    }

    #[test]
    fn clear_of_unknown_entry_is_false() {
        let tracker = DirtyTracker::new();
        assert!(!tracker.clear(&PendingPush::Network { nwid: 1, seq: 1 }));
        assert!(!tracker.clear(&PendingPush::Member {
            nwid: 1,
            member_id: 2,
            seq: 1
        }));
    }
}
