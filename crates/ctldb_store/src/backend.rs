//! Record store trait definition.

use crate::error::StoreResult;
use crate::record::{MemberRecord, NetworkRecord};

/// Local last-known-good copy of every network and member document.
///
/// The sync engine reads the stored copy before deciding whether to push a
/// local change or apply a remote one, and writes every accepted change back.
/// Implementations must be safe to share across threads.
pub trait RecordStore: Send + Sync {
    /// Returns the stored network document, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get_network(&self, nwid: u64) -> StoreResult<Option<NetworkRecord>>;

    /// Returns the stored member document, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn load_member(&self, nwid: u64, member_id: u64) -> StoreResult<Option<MemberRecord>>;

    /// Writes a network document, replacing any previous copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be persisted.
    fn put_network(&self, record: &NetworkRecord) -> StoreResult<()>;

    /// Writes a member document, replacing any previous copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be persisted.
    fn put_member(&self, record: &MemberRecord) -> StoreResult<()>;

    /// Removes a network document and all of its members.
    ///
    /// Local removal only. The sync engine does not call this yet: erase has
    /// no agreed remote representation, so it stays available to tooling and
    /// to the eventual erase implementation.
    ///
    /// Returns true if the network existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be modified.
    fn remove_network(&self, nwid: u64) -> StoreResult<bool>;

    /// Removes a single member document.
    ///
    /// Local removal only, like [`remove_network`](Self::remove_network).
    ///
    /// Returns true if the member existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be modified.
    fn remove_member(&self, nwid: u64, member_id: u64) -> StoreResult<bool>;

    /// Lists the ids of all stored networks in ascending order.
    ///
    /// Not used by the sync loop, which only follows the remote store; meant
    /// for tooling that inspects the local copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn network_ids(&self) -> StoreResult<Vec<u64>>;

    /// Returns the parent network and member documents together.
    ///
    /// A member push needs both, since the network id is part of its selectors.
    ///
    /// # Errors
    ///
    /// Returns an error if either document cannot be read.
    fn get_member(
        &self,
        nwid: u64,
        member_id: u64,
    ) -> StoreResult<(Option<NetworkRecord>, Option<MemberRecord>)> {
        Ok((self.get_network(nwid)?, self.load_member(nwid, member_id)?))
    }
}
