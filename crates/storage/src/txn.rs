//! Transactions: snapshot pinning for readers, copy-on-write mutation and
//! commit publication for the single writer.

use crate::env::{Env, Snapshot};
use crate::subdb::{DbiFlags, DbiStat, Slot, SubDb};
use crate::wal::WalOp;
use crate::{Result, StorageError};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Handle of an open sub-database. Plain index into the snapshot's dbi
/// table; stability across schema changes is the caller's problem (that is
/// what the table layer's handle cache is for).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dbi(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    Read,
    Write,
}

bitflags::bitflags! {
    /// Flags of [`Txn::put`] and [`Txn::replace`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PutFlags: u32 {
        /// Fail with `KeyExist` when the key is already present.
        const NO_OVERWRITE = 0x01;
        /// Fail with `KeyExist` when the exact key/data pair is present.
        const NO_DUP_DATA = 0x02;
        /// Operate on the existing entry (replace a specific duplicate,
        /// or require presence).
        const CURRENT = 0x04;
    }
}

/// Lag and space numbers of a transaction, for restart decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxnInfo {
    pub txn_reader_lag: u64,
    pub txn_space_used: u64,
    pub txn_space_retired: u64,
    pub txn_space_leftover: u64,
    pub txn_space_limit_soft: u64,
    pub txn_space_limit_hard: u64,
}

/// One transaction. Read transactions pin an immutable snapshot; the
/// write transaction additionally keeps copy-on-write working versions of
/// every touched sub-database plus the op log for the commit frame.
pub struct Txn {
    env: Env,
    mode: TxnMode,
    snapshot: Arc<Snapshot>,
    txnid: u64,
    dirty: HashMap<u32, Arc<SubDb>>,
    new_names: HashMap<String, u32>,
    created: HashSet<u32>,
    dropped: HashSet<u32>,
    next_slot: u32,
    retired: u64,
    ops: Vec<WalOp>,
    finished: bool,
}

impl Txn {
    pub(crate) fn new(env: Env, mode: TxnMode, snapshot: Arc<Snapshot>) -> Txn {
        let txnid = match mode {
            TxnMode::Read => snapshot.txnid,
            TxnMode::Write => snapshot.txnid + 1,
        };
        let next_slot = snapshot.dbis.len() as u32;
        Txn {
            env,
            mode,
            snapshot,
            txnid,
            dirty: HashMap::new(),
            new_names: HashMap::new(),
            created: HashSet::new(),
            dropped: HashSet::new(),
            next_slot,
            retired: 0,
            ops: Vec::new(),
            finished: false,
        }
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn is_writable(&self) -> bool {
        self.mode == TxnMode::Write
    }

    /// The commit id this transaction observes (for a writer: will
    /// produce).
    pub fn id(&self) -> u64 {
        self.txnid
    }

    // ---------------- dbi handles ----------------

    fn resolve(&self, name: &str) -> Option<u32> {
        if let Some(slot) = self.new_names.get(name) {
            return Some(*slot);
        }
        match self.snapshot.names.get(name) {
            Some(slot) if !self.dropped.contains(&(*slot as u32)) => Some(*slot as u32),
            _ => None,
        }
    }

    /// Opens (or with [`DbiFlags::CREATE`] in a write transaction,
    /// creates) a named sub-database. Existing ones must carry exactly the
    /// requested persistent flags, else `Incompatible`.
    pub fn open_dbi(&mut self, name: &str, flags: DbiFlags) -> Result<Dbi> {
        if let Some(slot) = self.resolve(name) {
            let sub = self.view(Dbi(slot))?;
            if sub.flags != flags.persistent() {
                return Err(StorageError::Incompatible);
            }
            return Ok(Dbi(slot));
        }
        if !flags.contains(DbiFlags::CREATE) {
            return Err(StorageError::NotFound);
        }
        if self.mode != TxnMode::Write {
            return Err(StorageError::Perm);
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.dirty.insert(slot, Arc::new(SubDb::new(flags)));
        self.new_names.insert(name.to_string(), slot);
        self.created.insert(slot);
        self.ops.push(WalOp::CreateDbi {
            slot,
            name: name.to_string(),
            flags: flags.persistent().bits(),
        });
        Ok(Dbi(slot))
    }

    /// Whether the handle was created inside this transaction (and thus
    /// dies with an abort).
    pub fn dbi_created_here(&self, dbi: Dbi) -> bool {
        self.created.contains(&dbi.0)
    }

    /// Read access to a sub-database.
    pub(crate) fn view(&self, dbi: Dbi) -> Result<&SubDb> {
        if self.dropped.contains(&dbi.0) {
            return Err(StorageError::BadDbi);
        }
        if let Some(sub) = self.dirty.get(&dbi.0) {
            return Ok(sub);
        }
        self.snapshot
            .dbis
            .get(dbi.0 as usize)
            .and_then(|s| s.as_deref())
            .ok_or(StorageError::BadDbi)
    }

    /// Copy-on-write access to a sub-database.
    fn touch(&mut self, dbi: Dbi) -> Result<&mut SubDb> {
        if self.mode != TxnMode::Write {
            return Err(StorageError::Perm);
        }
        if self.dropped.contains(&dbi.0) {
            return Err(StorageError::BadDbi);
        }
        if !self.dirty.contains_key(&dbi.0) {
            let sub = self
                .snapshot
                .dbis
                .get(dbi.0 as usize)
                .and_then(|s| s.clone())
                .ok_or(StorageError::BadDbi)?;
            self.dirty.insert(dbi.0, sub);
        }
        let sub = Arc::make_mut(self.dirty.get_mut(&dbi.0).unwrap());
        sub.mod_txnid = self.txnid;
        Ok(sub)
    }

    // ---------------- reads ----------------

    /// First (in duplicate order) value under `key`.
    pub fn get(&self, dbi: Dbi, key: &[u8]) -> Result<Vec<u8>> {
        let sub = self.view(dbi)?;
        sub.map
            .get(&sub.key(key))
            .map(|slot| slot.first().to_vec())
            .ok_or(StorageError::NotFound)
    }

    /// Value plus the number of duplicates under `key`.
    pub fn get_ex(&self, dbi: Dbi, key: &[u8]) -> Result<(Vec<u8>, usize)> {
        let sub = self.view(dbi)?;
        sub.map
            .get(&sub.key(key))
            .map(|slot| (slot.first().to_vec(), slot.len()))
            .ok_or(StorageError::NotFound)
    }

    /// Key comparison under the dbi's key comparator.
    pub fn cmp(&self, dbi: Dbi, a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(self.view(dbi)?.key_mode().cmp(a, b))
    }

    /// Data comparison under the dbi's duplicate comparator.
    pub fn dcmp(&self, dbi: Dbi, a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(self.view(dbi)?.dup_mode().cmp(a, b))
    }

    pub fn stat(&self, dbi: Dbi) -> Result<DbiStat> {
        Ok(self.view(dbi)?.stat())
    }

    /// Approximate number of entries between two keys (`from` inclusive,
    /// `to` exclusive; `None` is the respective end). With `from == to`,
    /// the duplicate count under that key. This engine counts exactly.
    pub fn estimate_range(
        &self,
        dbi: Dbi,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<u64> {
        let sub = self.view(dbi)?;
        match (from, to) {
            (Some(a), Some(b)) if sub.key_mode().cmp(a, b) == Ordering::Equal => {
                Ok(sub.dup_count(a))
            }
            (Some(a), Some(b)) if sub.key_mode().cmp(a, b) == Ordering::Greater => {
                // inverted range: estimate the mirror
                Ok(sub.count_range(Some(b), Some(a)))
            }
            (from, to) => Ok(sub.count_range(from, to)),
        }
    }

    /// Whether returned value bytes may be invalidated by the next write
    /// in this transaction. This engine hands out owned copies, so: never.
    pub fn is_dirty(&self, _bytes: &[u8]) -> bool {
        false
    }

    pub fn info(&self) -> TxnInfo {
        let used = match self.mode {
            TxnMode::Read => self.snapshot.bytes(),
            TxnMode::Write => {
                let mut total = 0u64;
                for (nth, slot) in self.snapshot.dbis.iter().enumerate() {
                    if self.dropped.contains(&(nth as u32)) {
                        continue;
                    }
                    if let Some(sub) = self.dirty.get(&(nth as u32)) {
                        total += sub.bytes as u64;
                    } else if let Some(sub) = slot {
                        total += sub.bytes as u64;
                    }
                }
                for (slot, sub) in &self.dirty {
                    if *slot as usize >= self.snapshot.dbis.len() {
                        total += sub.bytes as u64;
                    }
                }
                total
            }
        };
        let shared = &self.env.shared;
        TxnInfo {
            txn_reader_lag: self.env.recent_txnid().saturating_sub(self.snapshot.txnid),
            txn_space_used: used,
            txn_space_retired: self.retired,
            txn_space_leftover: shared.size_upper.saturating_sub(used),
            txn_space_limit_soft: shared.size_soft,
            txn_space_limit_hard: shared.size_upper,
        }
    }

    // ---------------- writes ----------------

    pub fn put(&mut self, dbi: Dbi, key: &[u8], data: &[u8], flags: PutFlags) -> Result<()> {
        let mut retired = 0u64;
        {
            let sub = self.touch(dbi)?;
            if sub.is_dupsort() {
                if let Some(slot) = sub.map.get(&sub.key(key)) {
                    if flags.contains(PutFlags::NO_OVERWRITE) {
                        return Err(StorageError::KeyExist);
                    }
                    if let Slot::Dups(set) = slot {
                        if set.contains(&sub.dup(data)) {
                            if flags.contains(PutFlags::NO_DUP_DATA) {
                                return Err(StorageError::KeyExist);
                            }
                            return Ok(()); // exact pair already present
                        }
                    }
                }
            } else {
                if let Some(slot) = sub.map.get(&sub.key(key)) {
                    if flags.contains(PutFlags::NO_OVERWRITE) {
                        return Err(StorageError::KeyExist);
                    }
                    retired = slot.first().len() as u64;
                }
            }
            raw_put(sub, key, data)?;
        }
        self.retired += retired;
        self.ops.push(WalOp::Put {
            slot: dbi.0,
            key: key.to_vec(),
            data: data.to_vec(),
        });
        Ok(())
    }

    /// Deletes `key`. With `data`, only the exact key/data pair is removed
    /// (all duplicates otherwise; on plain dbis the stored value must
    /// match byte-for-byte).
    pub fn del(&mut self, dbi: Dbi, key: &[u8], data: Option<&[u8]>) -> Result<()> {
        let freed = {
            let sub = self.touch(dbi)?;
            raw_del(sub, key, data)?
        };
        self.retired += freed as u64;
        self.ops.push(WalOp::Del {
            slot: dbi.0,
            key: key.to_vec(),
            data: data.map(|d| d.to_vec()),
        });
        Ok(())
    }

    /// Replaces the value under `key` and returns the previous one.
    ///
    /// * plain dbi: `CURRENT` requires presence, `NO_OVERWRITE` rejects it;
    ///   `new == None` deletes.
    /// * dup-sorted dbi with `CURRENT`: replaces the specific duplicate
    ///   passed as `old` with `new` (the multivalue update).
    pub fn replace(
        &mut self,
        dbi: Dbi,
        key: &[u8],
        new: Option<&[u8]>,
        old: Option<&[u8]>,
        flags: PutFlags,
    ) -> Result<Option<Vec<u8>>> {
        let dupsort = self.view(dbi)?.is_dupsort();
        if dupsort && flags.contains(PutFlags::CURRENT) {
            let prior = old.ok_or(StorageError::NoCurrent)?.to_vec();
            {
                let sub = self.touch(dbi)?;
                raw_del(sub, key, Some(&prior))?;
            }
            self.ops.push(WalOp::Del {
                slot: dbi.0,
                key: key.to_vec(),
                data: Some(prior.clone()),
            });
            if let Some(new) = new {
                {
                    let sub = self.touch(dbi)?;
                    if let Some(Slot::Dups(set)) = sub.map.get(&sub.key(key)) {
                        if set.contains(&sub.dup(new)) {
                            return Err(StorageError::KeyExist);
                        }
                    }
                    raw_put(sub, key, new)?;
                }
                self.ops.push(WalOp::Put {
                    slot: dbi.0,
                    key: key.to_vec(),
                    data: new.to_vec(),
                });
            }
            self.retired += prior.len() as u64;
            return Ok(Some(prior));
        }

        let existing;
        {
            let sub = self.touch(dbi)?;
            existing = sub.map.get(&sub.key(key)).map(|s| s.first().to_vec());
            if flags.contains(PutFlags::CURRENT) && existing.is_none() {
                return Err(StorageError::NotFound);
            }
            if flags.contains(PutFlags::NO_OVERWRITE) && existing.is_some() && new.is_some() {
                return Err(StorageError::KeyExist);
            }
            match new {
                Some(new) => raw_put(sub, key, new)?,
                None => {
                    if existing.is_some() {
                        raw_del(sub, key, None)?;
                    }
                }
            }
        }
        match new {
            Some(new) => self.ops.push(WalOp::Put {
                slot: dbi.0,
                key: key.to_vec(),
                data: new.to_vec(),
            }),
            None => {
                if existing.is_some() {
                    self.ops.push(WalOp::Del {
                        slot: dbi.0,
                        key: key.to_vec(),
                        data: None,
                    });
                }
            }
        }
        if let Some(old) = &existing {
            self.retired += old.len() as u64;
        }
        Ok(existing)
    }

    /// Per-dbi sequence: returns the value before adding `increment`.
    /// Pass zero to read. `SequenceOverflow` leaves the counter unchanged.
    pub fn sequence(&mut self, dbi: Dbi, increment: u64) -> Result<u64> {
        if increment == 0 {
            return Ok(self.view(dbi)?.seq);
        }
        let (prior, next) = {
            let sub = self.touch(dbi)?;
            let prior = sub.seq;
            let next = prior
                .checked_add(increment)
                .ok_or(StorageError::SequenceOverflow)?;
            sub.seq = next;
            (prior, next)
        };
        self.ops.push(WalOp::SeqSet {
            slot: dbi.0,
            value: next,
        });
        Ok(prior)
    }

    /// Empties a sub-database, resetting its sequence.
    pub fn clear_dbi(&mut self, dbi: Dbi) -> Result<()> {
        let freed = {
            let sub = self.touch(dbi)?;
            let freed = sub.bytes;
            sub.map.clear();
            sub.bytes = 0;
            sub.seq = 0;
            freed
        };
        self.retired += freed as u64;
        self.ops.push(WalOp::Clear { slot: dbi.0 });
        self.ops.push(WalOp::SeqSet { slot: dbi.0, value: 0 });
        Ok(())
    }

    /// Deletes a sub-database entirely; its handle becomes invalid at
    /// commit.
    pub fn drop_dbi(&mut self, dbi: Dbi) -> Result<()> {
        if self.mode != TxnMode::Write {
            return Err(StorageError::Perm);
        }
        // verify it exists (view also rejects doubly-dropped handles)
        let bytes = self.view(dbi)?.bytes;
        self.retired += bytes as u64;
        self.dirty.remove(&dbi.0);
        self.new_names.retain(|_, slot| *slot != dbi.0);
        self.dropped.insert(dbi.0);
        self.ops.push(WalOp::DropDbi { slot: dbi.0 });
        Ok(())
    }

    // ---------------- lifecycle ----------------

    /// Commits: appends the frame to the log, then publishes the new
    /// snapshot. Read transactions just unpin.
    pub fn commit(mut self) -> Result<()> {
        self.finish(false)
    }

    /// Aborts: every change is discarded.
    pub fn abort(mut self) -> Result<()> {
        self.finish(true)
    }

    fn finish(&mut self, abort: bool) -> Result<()> {
        debug_assert!(!self.finished);
        self.finished = true;

        if self.mode == TxnMode::Read {
            self.env.release_reader(self.snapshot.txnid);
            return Ok(());
        }

        let result = if abort || self.ops.is_empty() {
            Ok(())
        } else {
            self.publish()
        };
        self.env.release_writer();
        result
    }

    fn publish(&mut self) -> Result<()> {
        let mut next = (*self.snapshot).clone();
        next.txnid = self.txnid;
        for (slot, sub) in self.dirty.drain() {
            let slot = slot as usize;
            if next.dbis.len() <= slot {
                next.dbis.resize(slot + 1, None);
            }
            next.dbis[slot] = Some(sub);
        }
        for slot in &self.dropped {
            let slot = *slot as usize;
            next.names.retain(|_, s| *s != slot);
            if let Some(entry) = next.dbis.get_mut(slot) {
                *entry = None;
            }
        }
        for (name, slot) in self.new_names.drain() {
            next.names.insert(name, slot as usize);
        }

        if next.bytes() > self.env.shared.size_upper {
            warn!(
                used = next.bytes(),
                limit = self.env.shared.size_upper,
                "commit rejected: database full"
            );
            return Err(StorageError::DbFull);
        }

        if let Some(wal) = self.env.shared.wal.lock().as_mut() {
            wal.append(self.txnid, &self.ops)?;
        }
        *self.env.shared.committed.write() = Arc::new(next);
        Ok(())
    }

    /// Rolls a read transaction forward to the latest committed snapshot,
    /// preserving the transaction object.
    pub fn restart(&mut self) -> Result<()> {
        if self.mode != TxnMode::Read {
            return Err(StorageError::Perm);
        }
        let fresh = self.env.shared.committed.read().clone();
        self.env.release_reader(self.snapshot.txnid);
        self.env.shared.readers.lock().push(fresh.txnid);
        self.txnid = fresh.txnid;
        self.snapshot = fresh;
        Ok(())
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish(true);
        }
    }
}

/// Unconditional put, shared by the write path and WAL replay. Returns an
/// error only for malformed duplicate layouts.
pub(crate) fn raw_put(sub: &mut SubDb, key: &[u8], data: &[u8]) -> Result<()> {
    let map_key = sub.key(key);
    if sub.is_dupsort() {
        let dup = sub.dup(data);
        let inserted = match sub
            .map
            .entry(map_key)
            .or_insert_with(|| Slot::Dups(BTreeSet::new()))
        {
            Slot::Dups(set) => set.insert(dup),
            Slot::Single(_) => return Err(StorageError::Corrupt),
        };
        if inserted {
            sub.bytes += key.len() + data.len();
        }
    } else {
        match sub.map.insert(map_key, Slot::Single(data.to_vec())) {
            Some(Slot::Single(old)) => {
                sub.bytes = (sub.bytes + data.len()).saturating_sub(old.len());
            }
            Some(Slot::Dups(_)) => return Err(StorageError::Corrupt),
            None => sub.bytes += key.len() + data.len(),
        }
    }
    Ok(())
}

/// Unconditional delete; returns the number of freed bytes.
pub(crate) fn raw_del(sub: &mut SubDb, key: &[u8], data: Option<&[u8]>) -> Result<usize> {
    let map_key = sub.key(key);
    let dup = data.map(|d| sub.dup(d));
    let freed;
    let remove_key;
    match sub.map.get_mut(&map_key) {
        None => return Err(StorageError::NotFound),
        Some(Slot::Dups(set)) => match dup {
            Some(dup) => {
                if !set.remove(&dup) {
                    return Err(StorageError::NotFound);
                }
                freed = key.len() + dup.bytes.len();
                remove_key = set.is_empty();
            }
            None => {
                freed = set.iter().map(|d| key.len() + d.bytes.len()).sum();
                remove_key = true;
            }
        },
        Some(Slot::Single(value)) => {
            if let Some(expect) = data {
                if value.as_slice() != expect {
                    return Err(StorageError::NotFound);
                }
            }
            freed = key.len() + value.len();
            remove_key = true;
        }
    }
    if remove_key {
        sub.map.remove(&map_key);
    }
    sub.bytes = sub.bytes.saturating_sub(freed);
    Ok(freed)
}
