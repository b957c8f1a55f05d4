//! In-memory record store for testing.

use crate::backend::RecordStore;
use crate::error::StoreResult;
use crate::record::{MemberRecord, NetworkRecord};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct Records {
    networks: BTreeMap<u64, NetworkRecord>,
    members: BTreeMap<(u64, u64), MemberRecord>,
}

/// An in-memory record store.
///
/// Suitable for unit tests, integration tests and controllers that do not
/// need a local copy to survive restarts (the remote store is authoritative
/// and the first sync cycle repopulates everything).
///
/// # Example
///
/// ```rust
/// use ctldb_store::{MemoryRecordStore, NetworkRecord, RecordStore};
///
/// let store = MemoryRecordStore::new();
/// store.put_network(&NetworkRecord::new(0x0011223344000001)).unwrap();
/// assert!(store.get_network(0x0011223344000001).unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<Records>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored member documents.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.records.read().members.len()
    }

    /// Drops every stored document.
    pub fn clear(&self) {
        let mut records = self.records.write();
        records.networks.clear();
        records.members.clear();
    }
}

impl RecordStore for MemoryRecordStore {
    fn get_network(&self, nwid: u64) -> StoreResult<Option<NetworkRecord>> {
        Ok(self.records.read().networks.get(&nwid).cloned())
    }

    fn load_member(&self, nwid: u64, member_id: u64) -> StoreResult<Option<MemberRecord>> {
        Ok(self.records.read().members.get(&(nwid, member_id)).cloned())
    }

    fn put_network(&self, record: &NetworkRecord) -> StoreResult<()> {
        self.records
            .write()
            .networks
            .insert(record.id, record.clone());
        Ok(())
    }

    fn put_member(&self, record: &MemberRecord) -> StoreResult<()> {
        self.records
            .write()
            .members
            .insert((record.nwid, record.id), record.clone());
        Ok(())
    }

    fn remove_network(&self, nwid: u64) -> StoreResult<bool> {
        let mut records = self.records.write();
        records.members.retain(|(n, _), _| *n != nwid);
        Ok(records.networks.remove(&nwid).is_some())
    }

    fn remove_member(&self, nwid: u64, member_id: u64) -> StoreResult<bool> {
        Ok(self
            .records
            .write()
            .members
            .remove(&(nwid, member_id))
            .is_some())
    }

    fn network_ids(&self) -> StoreResult<Vec<u64>> {
        Ok(self.records.read().networks.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NWID: u64 = 0x0011_2233_44aa_bbcc;

    #[test]
    fn memory_new_is_empty() {
        let store = MemoryRecordStore::new();
        assert!(store.network_ids().unwrap().is_empty());
        assert_eq!(store.member_count(), 0);
        assert!(store.get_network(NWID).unwrap().is_none());
    }

    #[test]
    fn memory_put_replaces_previous_copy() {
        let store = MemoryRecordStore::new();
        let mut network = NetworkRecord::new(NWID).with_field("name", "a");
        network.revision = 1;
        store.put_network(&network).unwrap();

        network = network.with_field("name", "b");
        network.revision = 2;
        store.put_network(&network).unwrap();

        let stored = store.get_network(NWID).unwrap().unwrap();
        assert_eq!(stored.revision, 2);
        assert_eq!(stored.payload["name"], "b");
        assert_eq!(store.network_ids().unwrap(), vec![NWID]);
    }

    #[test]
    fn memory_get_member_returns_both_documents() {
        let store = MemoryRecordStore::new();
        store.put_member(&MemberRecord::new(NWID, 0x01)).unwrap();

        let (network, member) = store.get_member(NWID, 0x01).unwrap();
        assert!(network.is_none());
        assert_eq!(member.unwrap().id, 0x01);

        store.put_network(&NetworkRecord::new(NWID)).unwrap();
        let (network, member) = store.get_member(NWID, 0x01).unwrap();
        assert!(network.is_some());
        assert!(member.is_some());
    }

    #[test]
    fn memory_remove_network_drops_members() {
        let store = MemoryRecordStore::new();
        store.put_network(&NetworkRecord::new(NWID)).unwrap();
        store.put_member(&MemberRecord::new(NWID, 1)).unwrap();
        store.put_member(&MemberRecord::new(NWID, 2)).unwrap();
        store.put_member(&MemberRecord::new(NWID + 1, 1)).unwrap();

        assert!(store.remove_network(NWID).unwrap());
        assert!(!store.remove_network(NWID).unwrap());
        assert_eq!(store.member_count(), 1);
        assert!(store.load_member(NWID + 1, 1).unwrap().is_some());
    }

    #[test]
    fn memory_remove_member() {
        let store = MemoryRecordStore::new();
        store.put_member(&MemberRecord::new(NWID, 1)).unwrap();
        assert!(store.remove_member(NWID, 1).unwrap());
        assert!(!store.remove_member(NWID, 1).unwrap());
    }

    #[test]
    fn memory_clear() {
        let store = MemoryRecordStore::new();
        store.put_network(&NetworkRecord::new(NWID)).unwrap();
        store.put_member(&MemberRecord::new(NWID, 1)).unwrap();
        store.clear();
        assert!(store.network_ids().unwrap().is_empty());
        assert_eq!(store.member_count(), 0);
    }
}
