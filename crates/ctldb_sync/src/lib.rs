//! # ctldb Sync Engine
//!
//! Keeps a network controller's networks and members consistent with a
//! remote, eventually-consistent record store reachable only over HTTP.
//!
//! This crate provides:
//! - Dirty-state tracking for local edits and member online pulses
//! - A background push/pull loop with a sliding query window
//! - Revision-gated merge of remote changes
//! - Remote store wire format and HTTP transport
//! - Change notification for the controller
//!
//! ## Architecture
//!
//! The engine implements a **push-then-pull** model:
//! 1. Push every locally dirty document to the remote store
//! 2. Query network and member records written since the cutoff
//! 3. Apply each record that is strictly newer than the local copy
//!
//! The remote store offers no transactions, compare-and-swap or change
//! notifications, so the engine polls and re-queries an overlapping window
//! (two minutes by default) to avoid missing late writes.
//!
//! ## Key Invariants
//!
//! - Revisions never go backwards
//! - A document with unpushed local edits is never overwritten by a pull
//! - Re-pulling an already applied revision is a no-op
//! - Records outside the controller's address namespace are ignored
//! - The tracking lock is never held across remote I/O
//!
//! ## Example
//!
//! ```rust
//! use ctldb_store::{MemoryRecordStore, NetworkRecord};
//! use ctldb_sync::{ControllerIdentity, MockRemote, NoopNotifier, SyncConfig, SyncEngine};
//!
//! let engine = SyncEngine::new(
//!     ControllerIdentity::new(0x0011223344, b"private key".to_vec()),
//!     SyncConfig::new("owner-private", "owner-public"),
//!     MemoryRecordStore::new(),
//!     MockRemote::new(),
//!     NoopNotifier,
//! );
//!
//! let network = NetworkRecord::new(0x0011223344000001).with_field("name", "lab");
//! let saved = engine.save(None, network.into()).unwrap().unwrap();
//! assert_eq!(saved.revision(), 1);
//!
//! let result = engine.sync_once().unwrap();
//! assert_eq!(result.pushed, 1);
//! assert!(engine.is_ready());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod identity;
mod notifier;
mod protocol;
mod state;
mod transport;

pub use config::{SyncConfig, DEFAULT_REMOTE_HOST, DEFAULT_REMOTE_PORT, MIN_POLL_SLICE};
pub use engine::{CancelToken, EngineState, SyncCycleResult, SyncEngine, SyncStats, SYNC_THREAD_NAME};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpRemote, HttpResponse, LoopbackClient, LoopbackServer, UreqClient, HTTP_OK};
pub use identity::ControllerIdentity;
pub use notifier::{ChangeEvent, ChangeNotifier, NoopNotifier, RecordingNotifier};
pub use protocol::{
    online_value, record_values, MakeRecordRequest, QueryRequest, RecordValue, RequestFactory,
    Selector, SelectorRange, Selectors, FULL_RANGE, MAKE_RECORD_PATH, QUERY_PATH,
    SELECTOR_NAMESPACE,
};
pub use state::{DirtyTracker, MemberState, NetworkState, PendingPush, TrackedState};
pub use transport::{MockRemote, RemoteStore, StoredRecord};
