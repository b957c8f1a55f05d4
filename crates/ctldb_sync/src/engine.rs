//! Sync engine.
//!
//! The engine owns the dirty-state tracker and a single background thread
//! that alternates between pushing local changes and pulling remote ones:
//!
//! 1. Push every dirty network, member and (optionally) online pulse
//! 2. Pull network records written since the cutoff
//! 3. Pull member records written since the cutoff
//! 4. Move the cutoff to two minutes before now and mark the engine ready
//!
//! A remote change is applied only if it is strictly newer than the local
//! copy and the local copy has no unpushed edits. Re-pulling the same
//! revision is therefore a no-op, which is what makes the overlapping query
//! window safe.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::http::{HttpRemote, UreqClient};
use crate::identity::ControllerIdentity;
use crate::notifier::ChangeNotifier;
use crate::protocol::RequestFactory;
use crate::state::{DirtyTracker, MemberState, NetworkState, PendingPush};
use crate::transport::RemoteStore;
use ctldb_store::{
    format_member_id, format_network_id, MemberRecord, NetworkRecord, Record, RecordStore,
    OBJTYPE_MEMBER, OBJTYPE_NETWORK,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Name of the background sync thread.
pub const SYNC_THREAD_NAME: &str = "ctldb-sync";

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created, never started.
    Idle,
    /// Spawning the sync thread.
    Starting,
    /// Sync thread running.
    Running,
    /// Waiting for the sync thread to exit.
    Stopping,
    /// Sync thread joined.
    Stopped,
}

impl EngineState {
    /// Returns true if the engine can be started from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, EngineState::Idle | EngineState::Stopped)
    }

    /// Returns true while a sync thread exists.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EngineState::Starting | EngineState::Running | EngineState::Stopping
        )
    }
}

/// Cooperative cancellation flag shared with the sync thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Pushes accepted by the remote store.
    pub pushes_succeeded: u64,
    /// Pushes that failed and will be retried.
    pub pushes_failed: u64,
    /// Remote records applied locally.
    pub records_applied: u64,
    /// Remote records discarded (malformed or foreign).
    pub records_discarded: u64,
    /// Last completed cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// Pushes accepted by the remote store.
    pub pushed: u64,
    /// Pushes that failed.
    pub push_failures: u64,
    /// Pending pushes skipped because the local document is missing.
    pub push_skipped: u64,
    /// Record values returned by the pull queries.
    pub pulled: u64,
    /// Remote records applied locally.
    pub applied: u64,
    /// Remote records discarded (malformed or foreign).
    pub discarded: u64,
    /// Whether every remote call in the cycle succeeded.
    pub success: bool,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

struct EngineCore<S, R, N> {
    identity: ControllerIdentity,
    config: SyncConfig,
    requests: RequestFactory,
    store: S,
    remote: R,
    notifier: N,
    tracker: DirtyTracker,
    cycle_lock: Mutex<()>,
    cutoff: AtomicU64,
    ready: Mutex<bool>,
    ready_signal: Condvar,
    state: RwLock<EngineState>,
    stats: RwLock<SyncStats>,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancelToken,
}

/// Keeps a controller's networks and members in step with a remote record
/// store.
///
/// Local writes go through [`save`](Self::save) and are pushed by the sync
/// thread; remote writes are pulled and handed to the [`ChangeNotifier`]. The
/// local [`RecordStore`] always holds the last accepted copy of each document.
pub struct SyncEngine<S: RecordStore, R: RemoteStore, N: ChangeNotifier> {
    core: Arc<EngineCore<S, R, N>>,
    worker: Mutex<Option<Worker>>,
}

impl<S: RecordStore, N: ChangeNotifier> SyncEngine<S, HttpRemote<UreqClient>, N> {
    /// Creates an engine talking HTTP to the remote store named in `config`.
    pub fn connect(identity: ControllerIdentity, config: SyncConfig, store: S, notifier: N) -> Self {
        let remote = HttpRemote::new(config.base_url(), UreqClient::new(config.request_timeout));
        Self::new(identity, config, store, remote, notifier)
    }
}

impl<S: RecordStore, R: RemoteStore, N: ChangeNotifier> SyncEngine<S, R, N> {
    /// Creates an engine. Nothing is synced until [`start`](Self::start) or
    /// [`sync_once`](Self::sync_once) is called.
    pub fn new(
        identity: ControllerIdentity,
        config: SyncConfig,
        store: S,
        remote: R,
        notifier: N,
    ) -> Self {
        let requests = RequestFactory::new(&identity, &config.owner_private, &config.owner_public);
        Self {
            core: Arc::new(EngineCore {
                identity,
                config,
                requests,
                store,
                remote,
                notifier,
                tracker: DirtyTracker::new(),
                cycle_lock: Mutex::new(()),
                cutoff: AtomicU64::new(0),
                ready: Mutex::new(false),
                ready_signal: Condvar::new(),
                state: RwLock::new(EngineState::Idle),
                stats: RwLock::new(SyncStats::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Returns the controller identity.
    pub fn identity(&self) -> &ControllerIdentity {
        &self.core.identity
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.core.config
    }

    /// Returns the local record store.
    pub fn store(&self) -> &S {
        &self.core.store
    }

    /// Returns the remote store handle.
    pub fn remote(&self) -> &R {
        &self.core.remote
    }

    /// Returns the change notifier.
    pub fn notifier(&self) -> &N {
        &self.core.notifier
    }

    /// Returns the dirty-state tracker.
    pub fn tracker(&self) -> &DirtyTracker {
        &self.core.tracker
    }

    /// Gets the current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.core.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.core.stats.read().clone()
    }

    /// Start of the next pull window, in seconds since the epoch. Zero until
    /// the first cycle completes.
    pub fn cutoff(&self) -> u64 {
        self.core.cutoff.load(Ordering::SeqCst)
    }

    /// Returns true once the first full sync cycle has completed.
    pub fn is_ready(&self) -> bool {
        *self.core.ready.lock()
    }

    /// Blocks until the first sync cycle completes.
    ///
    /// Never returns if the engine is never started and nobody calls
    /// [`sync_once`](Self::sync_once).
    pub fn wait_until_ready(&self) {
        let mut ready = self.core.ready.lock();
        while !*ready {
            self.core.ready_signal.wait(&mut ready);
        }
    }

    /// Blocks until the first sync cycle completes or `timeout` elapses.
    /// Returns the readiness flag.
    pub fn wait_until_ready_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.core.ready.lock();
        while !*ready {
            if self
                .core
                .ready_signal
                .wait_until(&mut ready, deadline)
                .timed_out()
            {
                break;
            }
        }
        *ready
    }

    /// Runs one push/pull cycle on the calling thread.
    ///
    /// Cycles are serialized, so this is safe to call while the background
    /// thread is running.
    pub fn sync_once(&self) -> SyncResult<SyncCycleResult> {
        self.core.run_cycle(&CancelToken::new())
    }

    /// Saves a document changed by the local controller.
    ///
    /// The revision is assigned from `previous`: unchanged content keeps the
    /// previous revision, changed content gets the previous revision plus
    /// one, and a new document gets revision 1. If the result differs from
    /// the stored copy it is committed, the notifier is told, and the entry
    /// is marked for pushing. Returns the stored document, or `None` if
    /// nothing changed or the ids are zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the local record store fails.
    pub fn save(&self, previous: Option<&Record>, record: Record) -> SyncResult<Option<Record>> {
        let mut record = record;
        let revision = match previous {
            Some(previous) if previous.same_content(&record) => previous.revision(),
            Some(previous) => previous.revision().saturating_add(1),
            None => 1,
        };
        record.set_revision(revision);

        let core = &self.core;
        let mut tracked = core.tracker.lock();
        let accepted = match &record {
            Record::Network(network) => {
                if network.id == 0 {
                    debug!("ignoring save of network with zero id");
                    return Ok(None);
                }
                let old = core.store.get_network(network.id)?;
                if old.as_ref() == Some(network) {
                    false
                } else {
                    core.store.put_network(network)?;
                    core.notifier.network_changed(old.as_ref(), network, false);
                    tracked.mark_network_dirty(network.id);
                    debug!(
                        nwid = %format_network_id(network.id),
                        revision = network.revision,
                        "saved network"
                    );
                    true
                }
            }
            Record::Member(member) => {
                if member.id == 0 || member.nwid == 0 {
                    debug!("ignoring save of member with zero id");
                    return Ok(None);
                }
                let old = core.store.load_member(member.nwid, member.id)?;
                if old.as_ref() == Some(member) {
                    false
                } else {
                    core.store.put_member(member)?;
                    core.notifier.member_changed(old.as_ref(), member, false);
                    tracked.mark_member_dirty(member.nwid, member.id);
                    debug!(
                        nwid = %format_network_id(member.nwid),
                        member = %format_member_id(member.id),
                        revision = member.revision,
                        "saved member"
                    );
                    true
                }
            }
        };
        drop(tracked);

        Ok(accepted.then_some(record))
    }

    /// Records that a member was seen online at `address`.
    ///
    /// Only members the engine already tracks are updated. Returns true if
    /// the member was updated.
    pub fn node_is_online(&self, nwid: u64, member_id: u64, address: Option<IpAddr>) -> bool {
        self.core
            .tracker
            .mark_member_online(nwid, member_id, now_ms(), address)
    }

    /// Deletes a network.
    ///
    /// # Errors
    ///
    /// Always [`SyncError::Unsupported`]: deletion has no agreed remote
    /// representation yet, and the network is left untouched.
    pub fn erase_network(&self, nwid: u64) -> SyncResult<()> {
        warn!(nwid = %format_network_id(nwid), "network erase is not supported");
        Err(SyncError::Unsupported("erase_network"))
    }

    /// Deletes a member.
    ///
    /// # Errors
    ///
    /// Always [`SyncError::Unsupported`], like [`erase_network`](Self::erase_network).
    pub fn erase_member(&self, nwid: u64, member_id: u64) -> SyncResult<()> {
        warn!(
            nwid = %format_network_id(nwid),
            member = %format_member_id(member_id),
            "member erase is not supported"
        );
        Err(SyncError::Unsupported("erase_member"))
    }

    /// Returns a copy of the tracked state of a network.
    pub fn network_state(&self, nwid: u64) -> Option<NetworkState> {
        self.core.tracker.network_state(nwid)
    }

    /// Returns a copy of the tracked state of a member.
    pub fn member_state(&self, nwid: u64, member_id: u64) -> Option<MemberState> {
        self.core.tracker.member_state(nwid, member_id)
    }

    /// Stops the sync thread and waits for it to exit.
    ///
    /// No remote call is made after this returns. Does nothing if the engine
    /// is not running.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        self.core.set_state(EngineState::Stopping);
        worker.cancel.cancel();
        if worker.handle.join().is_err() {
            warn!("sync thread panicked");
        }
        self.core.set_state(EngineState::Stopped);
        info!("sync engine stopped");
    }
}

impl<S, R, N> SyncEngine<S, R, N>
where
    S: RecordStore + 'static,
    R: RemoteStore + 'static,
    N: ChangeNotifier + 'static,
{
    /// Spawns the background sync thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidState`] if the engine is already running,
    /// or an I/O error if the thread cannot be spawned.
    pub fn start(&self) -> SyncResult<()> {
        let mut worker = self.worker.lock();
        let state = self.state();
        if worker.is_some() || !state.can_start() {
            return Err(SyncError::InvalidState {
                from: format!("{state:?}"),
                to: format!("{:?}", EngineState::Starting),
            });
        }
        self.core.set_state(EngineState::Starting);

        let cancel = CancelToken::new();
        let token = cancel.clone();
        let core = Arc::clone(&self.core);
        let spawned = thread::Builder::new()
            .name(SYNC_THREAD_NAME.into())
            .spawn(move || core.run(&token));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.core.set_state(state);
                return Err(e.into());
            }
        };

        *worker = Some(Worker { handle, cancel });
        self.core.set_state(EngineState::Running);
        info!(
            controller = %self.core.identity.address_hex(),
            remote = %self.core.config.base_url(),
            "sync engine started"
        );
        Ok(())
    }
}

impl<S: RecordStore, R: RemoteStore, N: ChangeNotifier> Drop for SyncEngine<S, R, N> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S: RecordStore, R: RemoteStore, N: ChangeNotifier> EngineCore<S, R, N> {
    fn set_state(&self, state: EngineState) {
        *self.state.write() = state;
    }

    fn record_error(&self, error: &SyncError) {
        self.stats.write().last_error = Some(error.to_string());
    }

    fn run(&self, cancel: &CancelToken) {
        debug!("sync loop running");
        while !cancel.is_cancelled() {
            match self.run_cycle(cancel) {
                Ok(result) => debug!(
                    pushed = result.pushed,
                    applied = result.applied,
                    success = result.success,
                    "sync cycle complete"
                ),
                Err(SyncError::Cancelled) => break,
                Err(e) => warn!(error = %e, "sync cycle failed"),
            }
            if !self.sleep(cancel) {
                break;
            }
        }
        debug!("sync loop exiting");
    }

    /// Sleeps one poll interval in slices. Returns false if cancelled.
    fn sleep(&self, cancel: &CancelToken) -> bool {
        for _ in 0..self.config.sleep_slices() {
            if cancel.is_cancelled() {
                return false;
            }
            thread::sleep(self.config.effective_poll_slice());
        }
        !cancel.is_cancelled()
    }

    fn run_cycle(&self, cancel: &CancelToken) -> SyncResult<SyncCycleResult> {
        let _cycle = self.cycle_lock.lock();
        let start = Instant::now();
        let mut result = SyncCycleResult {
            success: true,
            ..SyncCycleResult::default()
        };

        self.push_pending(cancel, &mut result)?;

        let since = self.cutoff.load(Ordering::SeqCst);
        let remote = since > 0;

        cancel.check()?;
        if let Err(e) = self.pull_networks(since, remote, &mut result) {
            warn!(error = %e, "network query failed");
            self.record_error(&e);
            result.success = false;
        }

        cancel.check()?;
        if let Err(e) = self.pull_members(since, remote, &mut result) {
            warn!(error = %e, "member query failed");
            self.record_error(&e);
            result.success = false;
        }

        let overlap = self.config.requery_overlap.as_secs();
        self.cutoff
            .store(now_secs().saturating_sub(overlap), Ordering::SeqCst);
        self.mark_ready();

        result.duration = start.elapsed();
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.pushes_succeeded += result.pushed;
            stats.pushes_failed += result.push_failures;
            stats.records_applied += result.applied;
            stats.records_discarded += result.discarded;
            stats.last_sync_time = Some(Instant::now());
            if result.success {
                stats.last_error = None;
            }
        }

        Ok(result)
    }

    fn mark_ready(&self) {
        let mut ready = self.ready.lock();
        if !*ready {
            *ready = true;
            self.ready_signal.notify_all();
            info!("initial sync complete");
        }
    }

    fn push_pending(&self, cancel: &CancelToken, result: &mut SyncCycleResult) -> SyncResult<()> {
        let pending = self.tracker.snapshot(self.config.store_online_state);
        for push in &pending {
            cancel.check()?;
            match self.push_one(push) {
                Ok(true) => {
                    result.pushed += 1;
                    if !self.tracker.clear(push) {
                        debug!(?push, "changed during push, keeping dirty");
                    }
                }
                Ok(false) => result.push_skipped += 1,
                Err(e) => {
                    warn!(?push, error = %e, "push failed, will retry");
                    self.record_error(&e);
                    result.push_failures += 1;
                    result.success = false;
                }
            }
        }
        Ok(())
    }

    /// Pushes one pending entry. Returns false if the local document is gone.
    fn push_one(&self, push: &PendingPush) -> SyncResult<bool> {
        let request = match *push {
            PendingPush::Network { nwid, .. } => {
                let Some(network) = self.store.get_network(nwid)? else {
                    return Ok(false);
                };
                self.requests.network_record(nwid, network.to_json_string()?)
            }
            PendingPush::Member {
                nwid, member_id, ..
            } => {
                let (Some(_), Some(member)) = self.store.get_member(nwid, member_id)? else {
                    return Ok(false);
                };
                self.requests
                    .member_record(nwid, member_id, member.to_json_string()?)
            }
            PendingPush::Online {
                nwid,
                member_id,
                time,
                address,
                ..
            } => self.requests.online_record(nwid, member_id, address, time),
        };

        let confirmation = self.remote.make_record(&request)?;
        debug!(?push, %confirmation, "pushed");
        Ok(true)
    }

    fn pull_networks(&self, since: u64, remote: bool, result: &mut SyncCycleResult) -> SyncResult<()> {
        let values = self.remote.query(&self.requests.network_query(since))?;
        result.pulled += values.len() as u64;

        for value in values {
            let network = match NetworkRecord::from_json_str(&value) {
                Ok(network) => network,
                Err(e) => {
                    debug!(error = %e, "discarding malformed network record");
                    result.discarded += 1;
                    continue;
                }
            };
            if network.objtype().is_some_and(|t| t != OBJTYPE_NETWORK)
                || !self.identity.owns_network(network.id)
            {
                debug!(nwid = %format_network_id(network.id), "discarding foreign network record");
                result.discarded += 1;
                continue;
            }

            match self.apply_network(network, remote) {
                Ok(true) => result.applied += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "failed to apply network record");
                    self.record_error(&e);
                }
            }
        }
        Ok(())
    }

    fn apply_network(&self, network: NetworkRecord, remote: bool) -> SyncResult<bool> {
        let mut tracked = self.tracker.lock();
        if tracked.observe_network(network.id).dirty {
            return Ok(false);
        }
        let old = self.store.get_network(network.id)?;
        if old.as_ref().is_some_and(|old| old.revision >= network.revision) {
            return Ok(false);
        }

        self.store.put_network(&network)?;
        self.notifier
            .network_changed(old.as_ref(), &network, remote);
        debug!(
            nwid = %format_network_id(network.id),
            revision = network.revision,
            "applied remote network"
        );
        Ok(true)
    }

    fn pull_members(&self, since: u64, remote: bool, result: &mut SyncCycleResult) -> SyncResult<()> {
        let values = self.remote.query(&self.requests.member_query(since))?;
        result.pulled += values.len() as u64;

        for value in values {
            let member = match MemberRecord::from_json_str(&value) {
                Ok(member) => member,
                Err(e) => {
                    debug!(error = %e, "discarding malformed member record");
                    result.discarded += 1;
                    continue;
                }
            };
            if member.id == 0
                || member.objtype().is_some_and(|t| t != OBJTYPE_MEMBER)
                || !self.identity.owns_network(member.nwid)
            {
                debug!(
                    nwid = %format_network_id(member.nwid),
                    member = %format_member_id(member.id),
                    "discarding foreign member record"
                );
                result.discarded += 1;
                continue;
            }

            match self.apply_member(member, remote) {
                Ok(true) => result.applied += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "failed to apply member record");
                    self.record_error(&e);
                }
            }
        }
        Ok(())
    }

    fn apply_member(&self, member: MemberRecord, remote: bool) -> SyncResult<bool> {
        let mut tracked = self.tracker.lock();
        if tracked.observe_member(member.nwid, member.id).dirty {
            return Ok(false);
        }
        let old = self.store.load_member(member.nwid, member.id)?;
        if old.as_ref().is_some_and(|old| old.revision >= member.revision) {
            return Ok(false);
        }

        self.store.put_member(&member)?;
        self.notifier.member_changed(old.as_ref(), &member, remote);
        debug!(
            nwid = %format_network_id(member.nwid),
            member = %format_member_id(member.id),
            revision = member.revision,
            "applied remote member"
        );
        Ok(true)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
