//! Directory-backed record store.
//!
//! Layout under the store path:
//!
//! ```text
//! <path>/
//! ├─ LOCK                                  # Advisory lock for single-writer
//! └─ network/
//!    ├─ <nwid>.json                        # Network document
//!    └─ <nwid>/member/<member id>.json     # Member documents
//! ```
//!
//! Every write goes to a temporary sibling first and is renamed into place,
//! so a crash never leaves a half-written document behind.

use crate::backend::RecordStore;
use crate::error::{StoreError, StoreResult};
use crate::record::{format_member_id, format_network_id, parse_hex_id, MemberRecord, NetworkRecord};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const NETWORK_DIR: &str = "network";
const MEMBER_DIR: &str = "member";
const JSON_EXT: &str = "json";
const TEMP_EXT: &str = "json.tmp";

/// A record store persisting one JSON file per document.
///
/// # Thread Safety
///
/// The store holds an exclusive lock on its directory for its whole
/// lifetime. Writes within the process are serialized internally.
///
/// # Example
///
/// ```no_run
/// use ctldb_store::{FileRecordStore, NetworkRecord, RecordStore};
/// use std::path::Path;
///
/// let store = FileRecordStore::open(Path::new("controller.d")).unwrap();
/// store.put_network(&NetworkRecord::new(0x0011223344000001)).unwrap();
/// ```
#[derive(Debug)]
pub struct FileRecordStore {
    root: PathBuf,
    _lock_file: File,
    write_lock: Mutex<()>,
}

impl FileRecordStore {
    /// Opens or creates a store rooted at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another handle holds the directory,
    /// or an I/O error if the directory cannot be created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        fs::create_dir_all(path.join(NETWORK_DIR))?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked(path.to_path_buf()))?;

        debug!(path = %path.display(), "opened record store");
        Ok(Self {
            root: path.to_path_buf(),
            _lock_file: lock_file,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn network_path(&self, nwid: u64) -> PathBuf {
        self.root
            .join(NETWORK_DIR)
            .join(format_network_id(nwid))
            .with_extension(JSON_EXT)
    }

    fn member_dir(&self, nwid: u64) -> PathBuf {
        self.root
            .join(NETWORK_DIR)
            .join(format_network_id(nwid))
            .join(MEMBER_DIR)
    }

    fn member_path(&self, nwid: u64, member_id: u64) -> PathBuf {
        self.member_dir(nwid)
            .join(format_member_id(member_id))
            .with_extension(JSON_EXT)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension(TEMP_EXT);
        {
            let mut file = File::create(&temp_path)?;
            serde_json::to_writer_pretty(&mut file, value)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> StoreResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl RecordStore for FileRecordStore {
    fn get_network(&self, nwid: u64) -> StoreResult<Option<NetworkRecord>> {
        read_json(&self.network_path(nwid))
    }

    fn load_member(&self, nwid: u64, member_id: u64) -> StoreResult<Option<MemberRecord>> {
        read_json(&self.member_path(nwid, member_id))
    }

    fn put_network(&self, record: &NetworkRecord) -> StoreResult<()> {
        self.write_json(&self.network_path(record.id), record)
    }

    fn put_member(&self, record: &MemberRecord) -> StoreResult<()> {
        self.write_json(&self.member_path(record.nwid, record.id), record)
    }

    fn remove_network(&self, nwid: u64) -> StoreResult<bool> {
        let _guard = self.write_lock.lock();
        let member_root = self.member_dir(nwid);
        if let Some(network_dir) = member_root.parent() {
            match fs::remove_dir_all(network_dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.remove_file(&self.network_path(nwid))
    }

    fn remove_member(&self, nwid: u64, member_id: u64) -> StoreResult<bool> {
        let _guard = self.write_lock.lock();
        self.remove_file(&self.member_path(nwid, member_id))
    }

    fn network_ids(&self) -> StoreResult<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(NETWORK_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JSON_EXT) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(parse_hex_id)
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}
