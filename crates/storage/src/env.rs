//! Environment: snapshot publication, the writer slot, reader registry,
//! durability and geometry.

use crate::subdb::{DbiFlags, SubDb};
use crate::txn::{Txn, TxnMode};
use crate::wal::{WalOp, WalReader, WalWriter};
use crate::{Result, StorageError};
use bitflags::bitflags;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Durability of committed transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// No write transactions at all.
    ReadOnly,
    /// fsync on every commit.
    Sync,
    /// Commits reach the log immediately but are only fsynced on close;
    /// a crash loses the unsynced tail.
    Lazy,
    /// No fsync ever; survives a process crash, not a system one.
    Weak,
}

bitflags! {
    /// Operational regime tweaks. Mostly advisory for this engine; they are
    /// recorded and reported back by [`Env::info`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegimeFlags: u32 {
        const FRIENDLY_FOR_WRITEBACK = 0x01;
        const FRIENDLY_FOR_HDD = 0x02;
        const FRIENDLY_FOR_COMPACTION = 0x04;
        /// Read-only mapping discipline (no write-through shortcuts).
        const SAFE_RAM = 0x08;
        /// Accept schemas the clumsy-index heuristic would reject.
        const ALLOW_CLUMSY = 0x10;
    }
}

/// Size bounds and growth tuning. Negative values mean "keep the current
/// value for an existing database, or the default for a new one".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub size_lower: i64,
    pub size_upper: i64,
    pub growth_step: i64,
    pub shrink_threshold: i64,
    pub page_size: i64,
}

impl Default for Geometry {
    fn default() -> Geometry {
        Geometry {
            size_lower: -1,
            size_upper: -1,
            growth_step: -1,
            shrink_threshold: -1,
            page_size: -1,
        }
    }
}

const DEFAULT_SIZE_UPPER: u64 = 1 << 30;

/// Immutable committed state. Readers pin one of these for their whole
/// lifetime; the writer publishes a fresh one at commit.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Commit id of the transaction that produced this snapshot.
    pub txnid: u64,
    /// Sub-databases by handle number; dropped ones leave a hole.
    pub dbis: Vec<Option<Arc<SubDb>>>,
    /// Name to handle number.
    pub names: HashMap<String, usize>,
}

impl Snapshot {
    pub fn bytes(&self) -> u64 {
        self.dbis
            .iter()
            .flatten()
            .map(|db| db.bytes as u64)
            .sum()
    }
}

pub(crate) struct EnvShared {
    pub committed: RwLock<Arc<Snapshot>>,
    pub writer_busy: Mutex<bool>,
    pub writer_cv: Condvar,
    /// Snapshot txnids pinned by live read transactions.
    pub readers: Mutex<Vec<u64>>,
    pub wal: Mutex<Option<WalWriter>>,
    pub durability: Durability,
    pub regime: RegimeFlags,
    pub size_upper: u64,
    pub size_soft: u64,
}

/// Shared environment handle.
#[derive(Clone)]
pub struct Env {
    pub(crate) shared: Arc<EnvShared>,
}

/// Environment facts reported to callers, geometry and mode included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInfo {
    pub durability: Durability,
    pub regime: RegimeFlags,
    pub size_upper: u64,
    pub bytes_used: u64,
    pub page_size: u32,
    pub recent_txnid: u64,
    pub latter_reader_txnid: u64,
    pub self_latter_reader_txnid: u64,
    pub num_readers: usize,
}

/// Builder for [`Env::open`].
#[derive(Debug, Clone)]
pub struct EnvBuilder {
    path: Option<PathBuf>,
    durability: Durability,
    regime: RegimeFlags,
    geometry: Geometry,
}

impl EnvBuilder {
    pub fn new() -> EnvBuilder {
        EnvBuilder {
            path: None,
            durability: Durability::Lazy,
            regime: RegimeFlags::empty(),
            geometry: Geometry::default(),
        }
    }

    /// Commit-log path. Without one the environment is purely in-memory
    /// and every durability mode degenerates to `Weak`.
    pub fn path(mut self, path: impl Into<PathBuf>) -> EnvBuilder {
        self.path = Some(path.into());
        self
    }

    pub fn durability(mut self, durability: Durability) -> EnvBuilder {
        self.durability = durability;
        self
    }

    pub fn regime(mut self, regime: RegimeFlags) -> EnvBuilder {
        self.regime = regime;
        self
    }

    pub fn geometry(mut self, geometry: Geometry) -> EnvBuilder {
        self.geometry = geometry;
        self
    }

    pub fn open(self) -> Result<Env> {
        let mut snapshot = Snapshot::default();
        let mut wal = None;

        if let Some(path) = &self.path {
            if path.exists() {
                let mut reader = WalReader::open(path)?;
                reader.replay(|txnid, ops| apply_frame(&mut snapshot, txnid, ops))?;
                debug!(txnid = snapshot.txnid, "commit log replayed");
            }
            if self.durability != Durability::ReadOnly {
                let sync = self.durability == Durability::Sync;
                wal = Some(WalWriter::create(path, sync)?);
            }
        }

        let size_upper = if self.geometry.size_upper > 0 {
            self.geometry.size_upper as u64
        } else {
            DEFAULT_SIZE_UPPER
        };
        let size_soft = size_upper - size_upper / 16;

        Ok(Env {
            shared: Arc::new(EnvShared {
                committed: RwLock::new(Arc::new(snapshot)),
                writer_busy: Mutex::new(false),
                writer_cv: Condvar::new(),
                readers: Mutex::new(Vec::new()),
                wal: Mutex::new(wal),
                durability: self.durability,
                regime: self.regime,
                size_upper,
                size_soft,
            }),
        })
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        EnvBuilder::new()
    }
}

/// Applies one replayed commit frame to the snapshot under construction.
fn apply_frame(snapshot: &mut Snapshot, txnid: u64, ops: Vec<WalOp>) -> Result<()> {
    for op in ops {
        match op {
            WalOp::CreateDbi { slot, name, flags } => {
                let slot = slot as usize;
                if snapshot.dbis.len() <= slot {
                    snapshot.dbis.resize(slot + 1, None);
                }
                let flags = DbiFlags::from_bits(flags).ok_or(StorageError::Corrupt)?;
                snapshot.dbis[slot] = Some(Arc::new(SubDb::new(flags)));
                snapshot.names.insert(name, slot);
            }
            WalOp::DropDbi { slot } => {
                let slot = slot as usize;
                snapshot.names.retain(|_, s| *s != slot);
                *snapshot.dbis.get_mut(slot).ok_or(StorageError::Corrupt)? = None;
            }
            WalOp::Clear { slot } => {
                let db = writable(snapshot, slot)?;
                db.map.clear();
                db.bytes = 0;
                db.mod_txnid = txnid;
            }
            WalOp::Put { slot, key, data } => {
                let db = writable(snapshot, slot)?;
                db.mod_txnid = txnid;
                crate::txn::raw_put(db, &key, &data)?;
            }
            WalOp::Del { slot, key, data } => {
                let db = writable(snapshot, slot)?;
                db.mod_txnid = txnid;
                crate::txn::raw_del(db, &key, data.as_deref())
                    .map_err(|_| StorageError::Corrupt)?;
            }
            WalOp::SeqSet { slot, value } => {
                writable(snapshot, slot)?.seq = value;
            }
        }
    }
    snapshot.txnid = txnid;
    Ok(())
}

fn writable(snapshot: &mut Snapshot, slot: u32) -> Result<&mut SubDb> {
    let arc = snapshot
        .dbis
        .get_mut(slot as usize)
        .and_then(|s| s.as_mut())
        .ok_or(StorageError::Corrupt)?;
    Ok(Arc::make_mut(arc))
}

impl Env {
    pub fn builder() -> EnvBuilder {
        EnvBuilder::new()
    }

    /// Begins a transaction. Write and schema-side transactions block
    /// until the writer slot is free; readers only pin the snapshot.
    pub fn begin(&self, mode: TxnMode) -> Result<Txn> {
        if mode != TxnMode::Read && self.shared.durability == Durability::ReadOnly {
            return Err(StorageError::Perm);
        }
        if mode != TxnMode::Read {
            let mut busy = self.shared.writer_busy.lock();
            while *busy {
                self.shared.writer_cv.wait(&mut busy);
            }
            *busy = true;
        }
        let snapshot = self.shared.committed.read().clone();
        if mode == TxnMode::Read {
            self.shared.readers.lock().push(snapshot.txnid);
        }
        Ok(Txn::new(self.clone(), mode, snapshot))
    }

    /// The txnid of the most recent commit.
    pub fn recent_txnid(&self) -> u64 {
        self.shared.committed.read().txnid
    }

    pub fn info(&self) -> EnvInfo {
        let committed = self.shared.committed.read().clone();
        let readers = self.shared.readers.lock();
        let oldest = readers.iter().copied().min().unwrap_or(committed.txnid);
        EnvInfo {
            durability: self.shared.durability,
            regime: self.shared.regime,
            size_upper: self.shared.size_upper,
            bytes_used: committed.bytes(),
            page_size: crate::subdb::PAGE_SIZE,
            recent_txnid: committed.txnid,
            latter_reader_txnid: oldest,
            self_latter_reader_txnid: oldest,
            num_readers: readers.len(),
        }
    }

    /// Syncs the commit log. Called on drop for `Lazy` durability.
    pub fn sync(&self) -> Result<()> {
        if let Some(wal) = self.shared.wal.lock().as_mut() {
            wal.sync_to_disk()?;
        }
        Ok(())
    }

    pub(crate) fn release_writer(&self) {
        let mut busy = self.shared.writer_busy.lock();
        *busy = false;
        self.shared.writer_cv.notify_one();
    }

    pub(crate) fn release_reader(&self, txnid: u64) {
        let mut readers = self.shared.readers.lock();
        if let Some(at) = readers.iter().position(|t| *t == txnid) {
            readers.swap_remove(at);
        }
    }
}

impl Drop for EnvShared {
    fn drop(&mut self) {
        if self.durability == Durability::Lazy || self.durability == Durability::Sync {
            if let Some(wal) = self.wal.get_mut().as_mut() {
                let _ = wal.sync_to_disk();
            }
        }
    }
}
