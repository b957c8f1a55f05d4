//! Transport layer abstraction for the remote record store.

use crate::error::{SyncError, SyncResult};
use crate::protocol::{MakeRecordRequest, QueryRequest, RecordValue, Selector};
use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A handle on the remote record store.
///
/// This trait abstracts the network layer so the engine can be driven by
/// HTTP in production and by an in-memory store in tests.
pub trait RemoteStore: Send + Sync {
    /// Creates or updates a record. Returns the store's confirmation body.
    fn make_record(&self, request: &MakeRecordRequest) -> SyncResult<String>;

    /// Returns the values of all records matching the query.
    fn query(&self, request: &QueryRequest) -> SyncResult<Vec<String>>;
}

/// A record held by [`MockRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Record selectors.
    pub selectors: Vec<Selector>,
    /// Record value.
    pub value: RecordValue,
    /// Record timestamp, in seconds.
    pub timestamp: u64,
}

#[derive(Debug, Default)]
struct MockState {
    records: Vec<StoredRecord>,
    make_record_log: Vec<MakeRecordRequest>,
    write_attempts: Vec<MakeRecordRequest>,
    query_log: Vec<QueryRequest>,
    offline: bool,
    reject_writes: Option<u16>,
    reject_queries: Option<u16>,
    raw_query_response: Option<String>,
}

/// An in-memory remote record store for testing.
///
/// Records are keyed by their full selector list; writing the same selectors
/// again replaces the value. Queries match records whose selector count equals
/// the number of ranges and whose selectors fall positionally inside them.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    /// Creates an empty mock remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the remote being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Makes every write fail with `status` (or succeed again with `None`).
    pub fn reject_writes(&self, status: Option<u16>) {
        self.state.lock().reject_writes = status;
    }

    /// Makes every query fail with `status` (or succeed again with `None`).
    pub fn reject_queries(&self, status: Option<u16>) {
        self.state.lock().reject_queries = status;
    }

    /// Overrides the raw body returned for `/query` over the loopback HTTP path.
    pub fn set_raw_query_response(&self, body: Option<String>) {
        self.state.lock().raw_query_response = body;
    }

    pub(crate) fn raw_query_response(&self) -> Option<String> {
        self.state.lock().raw_query_response.clone()
    }

    /// Inserts a record directly, as another writer would.
    pub fn insert(&self, selectors: Vec<Selector>, value: RecordValue, timestamp: u64) {
        let mut state = self.state.lock();
        upsert(&mut state.records, selectors, value, timestamp);
    }

    /// Returns every record currently held.
    pub fn records(&self) -> Vec<StoredRecord> {
        self.state.lock().records.clone()
    }

    /// Returns every successful write, in order.
    pub fn make_record_log(&self) -> Vec<MakeRecordRequest> {
        self.state.lock().make_record_log.clone()
    }

    /// Returns every write received, including those refused by failure
    /// injection, in order.
    pub fn write_attempts(&self) -> Vec<MakeRecordRequest> {
        self.state.lock().write_attempts.clone()
    }

    /// Returns the number of successful writes.
    pub fn make_record_count(&self) -> usize {
        self.state.lock().make_record_log.len()
    }

    /// Returns every query received, in order.
    pub fn query_log(&self) -> Vec<QueryRequest> {
        self.state.lock().query_log.clone()
    }

    /// Forgets logged writes and queries, keeping the records.
    pub fn clear_logs(&self) {
        let mut state = self.state.lock();
        state.make_record_log.clear();
        state.write_attempts.clear();
        state.query_log.clear();
    }

    /// Returns the records matching a query.
    pub fn query_records(&self, request: &QueryRequest) -> SyncResult<Vec<StoredRecord>> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(SyncError::transport_retryable("remote store offline"));
        }
        if let Some(status) = state.reject_queries {
            return Err(SyncError::Rejected {
                status,
                body: "query rejected".into(),
            });
        }
        state.query_log.push(request.clone());

        let [from, to] = request.time_range;
        Ok(state
            .records
            .iter()
            .filter(|record| record.timestamp >= from && record.timestamp <= to)
            .filter(|record| record.selectors.len() == request.ranges.len())
            .filter(|record| {
                record
                    .selectors
                    .iter()
                    .zip(&request.ranges)
                    .all(|(selector, range)| {
                        selector.name == range.name
                            && selector.ordinal >= range.range[0]
                            && selector.ordinal <= range.range[1]
                    })
            })
            .cloned()
            .collect())
    }
}

fn upsert(records: &mut Vec<StoredRecord>, selectors: Vec<Selector>, value: RecordValue, timestamp: u64) {
    match records.iter_mut().find(|r| r.selectors == selectors) {
        Some(existing) => {
            existing.value = value;
            existing.timestamp = timestamp;
        }
        None => records.push(StoredRecord {
            selectors,
            value,
            timestamp,
        }),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl RemoteStore for MockRemote {
    fn make_record(&self, request: &MakeRecordRequest) -> SyncResult<String> {
        let mut state = self.state.lock();
        state.write_attempts.push(request.clone());
        if state.offline {
            return Err(SyncError::transport_retryable("remote store offline"));
        }
        if let Some(status) = state.reject_writes {
            return Err(SyncError::Rejected {
                status,
                body: "write rejected".into(),
            });
        }
        state.make_record_log.push(request.clone());
        // Online pulses carry millisecond timestamps; records are indexed by write time.
        upsert(
            &mut state.records,
            request.selectors.clone(),
            request.value.clone(),
            now_secs(),
        );
        Ok(format!("{{\"records\":{}}}", state.records.len()))
    }

    fn query(&self, request: &QueryRequest) -> SyncResult<Vec<String>> {
        Ok(self
            .query_records(request)?
            .into_iter()
            .filter_map(|record| record.value.as_document().map(str::to_owned))
            .collect())
    }
}
