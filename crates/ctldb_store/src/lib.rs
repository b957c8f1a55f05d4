//! # ctldb Store
//!
//! Local record store for the ctldb controller database.
//!
//! This crate holds the controller's last-known-good copy of every network
//! and member document. The sync engine in `ctldb_sync` reads it to decide
//! what to push and what to apply, and writes every accepted change back.
//!
//! ## Records
//!
//! Documents are JSON objects. The store inspects only `id`, `nwid` and
//! `revision`; everything else is carried opaquely in a payload map.
//!
//! ## Available Stores
//!
//! - [`MemoryRecordStore`] - For testing and ephemeral controllers
//! - [`FileRecordStore`] - One JSON file per document under a locked directory
//!
//! ## Example
//!
//! ```rust
//! use ctldb_store::{MemoryRecordStore, MemberRecord, RecordStore};
//!
//! let store = MemoryRecordStore::new();
//! let member = MemberRecord::new(0x0011223344000001, 0xabcdef0123)
//!     .with_field("authorized", true);
//! store.put_member(&member).unwrap();
//!
//! let (_, stored) = store.get_member(0x0011223344000001, 0xabcdef0123).unwrap();
//! assert_eq!(stored, Some(member));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod record;

pub use backend::RecordStore;
pub use error::{StoreError, StoreResult};
pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;
pub use record::{
    format_member_id, format_network_id, parse_hex_id, MemberRecord, NetworkRecord, Record,
    OBJTYPE_MEMBER, OBJTYPE_NETWORK,
};
