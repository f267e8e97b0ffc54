//! Transaction lifecycle: level checks, schema-version capture, restart,
//! and the internal-abort path with the fatal-error hook.

use crate::db::{Database, Level};
use crate::{Error, Result};
use parking_lot::Mutex;
use schema::{dbi_name, Shove};
use std::sync::atomic::Ordering;
use storage::{DbiFlags, TxnMode};
use tracing::warn;

/// Replaceable process-wide hook consulted when aborting a transaction
/// itself fails. Returning `false` aborts the process; `true` lets the
/// caller receive [`Error::WannaDie`] and terminate on its own terms.
static PANIC_HOOK: Mutex<Option<fn(&Error, &Error) -> bool>> = Mutex::new(None);

/// Installs the fatal-error hook; returns the previous one.
pub fn set_panic_hook(
    hook: Option<fn(&Error, &Error) -> bool>,
) -> Option<fn(&Error, &Error) -> bool> {
    std::mem::replace(&mut PANIC_HOOK.lock(), hook)
}

fn run_panic_hook(initial: &Error, fatal: &Error) -> bool {
    match *PANIC_HOOK.lock() {
        Some(hook) => hook(initial, fatal),
        None => false,
    }
}

/// One transaction of the table layer.
pub struct Txn {
    pub(crate) db: Database,
    level: Level,
    inner: Option<storage::Txn>,
    lock_held: bool,
    db_version: u64,
    schema_tsn: u64,
}

impl Txn {
    /// Begins a transaction at the given level. `Write` and `Schema`
    /// levels block until the writer slot is free; `Schema` additionally
    /// takes the in-process schema lock exclusively.
    pub fn begin(db: &Database, level: Level) -> Result<Txn> {
        if level == Level::Schema && !db.inner.alterable_schema {
            return Err(Error::Perm);
        }
        match level {
            Level::Schema => db.inner.schema_lock.lock_exclusive(),
            _ => db.inner.schema_lock.lock_shared(),
        }

        let mode = if level == Level::Read {
            TxnMode::Read
        } else {
            TxnMode::Write
        };
        let inner = match db.inner.env.begin(mode) {
            Ok(inner) => inner,
            Err(err) => {
                db.inner.schema_lock.unlock();
                return Err(err.into());
            }
        };

        let mut txn = Txn {
            db: db.clone(),
            level,
            inner: Some(inner),
            lock_held: true,
            db_version: 0,
            schema_tsn: 0,
        };

        loop {
            txn.db_version = txn.storage().id();
            txn.schema_tsn = txn.read_catalog_tsn()?;
            match txn.db.inner.cache_cleanup(txn.schema_tsn) {
                Ok(()) => return Ok(txn),
                Err(Error::SchemaChanged) if level == Level::Read => {
                    txn.storage_mut().restart()?;
                }
                Err(err) => {
                    let err = txn.internal_abort(err);
                    return Err(err);
                }
            }
        }
    }

    /// The catalog's mod-txnid as observed by this transaction; zero when
    /// the catalog does not exist yet.
    fn read_catalog_tsn(&mut self) -> Result<u64> {
        match self.catalog_dbi(false) {
            Ok(dbi) => Ok(self.storage().stat(dbi)?.mod_txnid),
            Err(Error::NotFound) => Ok(0),
            Err(err) => Err(err),
        }
    }

    /// Resolves the catalog sub-database, creating it for schema-level
    /// transactions when asked.
    pub(crate) fn catalog_dbi(&mut self, create: bool) -> Result<storage::Dbi> {
        if let Some(dbi) = *self.db.inner.catalog_dbi.lock() {
            if self.storage().stat(dbi).is_ok() {
                return Ok(dbi);
            }
        }
        let mut flags = DbiFlags::INTEGER_KEY;
        if create {
            flags |= DbiFlags::CREATE;
        }
        let name = dbi_name(Shove::DICT);
        let dbi = self.storage_mut().open_dbi(&name, flags)?;
        *self.db.inner.catalog_dbi.lock() = Some(dbi);
        Ok(dbi)
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Monotone commit id observed (write transactions: to be produced).
    pub fn db_version(&self) -> u64 {
        self.db_version
    }

    /// Commit id of the last catalog change visible to this transaction.
    pub fn schema_tsn(&self) -> u64 {
        self.schema_tsn
    }

    pub(crate) fn bump_schema_tsn(&mut self) {
        self.schema_tsn = self.db_version;
        self.db
            .inner
            .schema_tsn
            .store(self.db_version, Ordering::Release);
    }

    pub(crate) fn storage(&self) -> &storage::Txn {
        self.inner.as_ref().expect("transaction is live")
    }

    pub(crate) fn storage_mut(&mut self) -> &mut storage::Txn {
        self.inner.as_mut().expect("transaction is live")
    }

    /// Guards operations that need at least `level`.
    pub(crate) fn require(&self, level: Level) -> Result<()> {
        if self.inner.is_none() {
            return Err(Error::TxnCancelled);
        }
        if self.level < level {
            return Err(Error::Perm);
        }
        Ok(())
    }

    fn release_lock(&mut self) {
        if self.lock_held {
            self.lock_held = false;
            self.db.inner.schema_lock.unlock();
        }
    }

    pub fn commit(mut self) -> Result<()> {
        let result = match self.inner.take() {
            Some(inner) => inner.commit().map_err(Error::from),
            None => Err(Error::TxnCancelled),
        };
        self.release_lock();
        result
    }

    pub fn abort(mut self) -> Result<()> {
        let result = match self.inner.take() {
            Some(inner) => inner.abort().map_err(Error::from),
            None => Err(Error::TxnCancelled),
        };
        self.release_lock();
        result
    }

    /// Aborts from inside a failed multi-step write. The handle cache is
    /// purged of handles created by this transaction; if even the abort
    /// fails, the fatal hook decides between process abort and
    /// [`Error::WannaDie`].
    pub(crate) fn internal_abort(&mut self, initial: Error) -> Error {
        let Some(inner) = self.inner.take() else {
            self.release_lock();
            return initial;
        };
        if self.level > Level::Read {
            self.db.inner.cache_purge_created(&inner);
        }
        let aborted = inner.abort();
        self.release_lock();
        if let Err(fatal) = aborted {
            let fatal = Error::from(fatal);
            warn!(?initial, ?fatal, "transaction abort failed");
            if !run_panic_hook(&initial, &fatal) {
                std::process::abort();
            }
            return Error::WannaDie;
        }
        initial
    }

    /// `(db_version, schema_tsn)`.
    pub fn versions(&self) -> (u64, u64) {
        (self.db_version, self.schema_tsn)
    }

    /// Reader lag plus the percentage of space used. Read-only
    /// transactions only.
    pub fn lag(&self) -> Result<(u64, u32)> {
        self.require(Level::Read)?;
        if self.level != Level::Read {
            return Err(Error::Perm);
        }
        let info = self.storage().info();
        let percent = (info.txn_space_used * 100
            / (info.txn_space_used + info.txn_space_leftover).max(1)) as u32;
        Ok((info.txn_reader_lag, percent))
    }

    /// `(lag, retired_bytes, left_bytes)` for restart decisions.
    pub fn lag_ex(&self) -> Result<(u64, u64, u64)> {
        self.require(Level::Read)?;
        if self.level != Level::Read {
            return Err(Error::Perm);
        }
        let info = self.storage().info();
        let left = info.txn_space_leftover
            + (info.txn_space_limit_hard - info.txn_space_limit_soft);
        Ok((info.txn_reader_lag, info.txn_space_retired, left))
    }

    /// `Ok` once the transaction exceeds any threshold, [`Error::NoData`]
    /// while none is reached.
    pub fn enough_for_restart(
        &self,
        lag_threshold: u64,
        retired_threshold: u64,
        space_threshold: u64,
    ) -> Result<()> {
        self.require(Level::Read)?;
        if self.level == Level::Read {
            let info = self.storage().info();
            let left = info.txn_space_leftover
                + (info.txn_space_limit_hard - info.txn_space_limit_soft);
            if info.txn_reader_lag < lag_threshold
                && info.txn_space_retired < retired_threshold
                && left > space_threshold
            {
                return Err(Error::NoData);
            }
        }
        Ok(())
    }

    /// Rolls a read-only transaction forward to the newest snapshot while
    /// preserving the transaction object.
    pub fn restart(&mut self) -> Result<()> {
        self.require(Level::Read)?;
        if self.level != Level::Read {
            return Err(Error::Perm);
        }
        loop {
            self.storage_mut().restart()?;
            self.db_version = self.storage().id();
            self.schema_tsn = self.read_catalog_tsn()?;
            match self.db.inner.cache_cleanup(self.schema_tsn) {
                Ok(()) => return Ok(()),
                Err(Error::SchemaChanged) => continue,
                Err(err) => return Err(self.internal_abort(err)),
            }
        }
    }

    /// Per-database sequence, backed by a dedicated main sub-database so
    /// it never interferes with the catalog's change counter.
    pub fn db_sequence(&mut self, increment: u64) -> Result<u64> {
        self.require(Level::Read)?;
        if increment > 0 {
            self.require(Level::Write)?;
        }
        let mut flags = DbiFlags::INTEGER_KEY;
        if self.level > Level::Read {
            flags |= DbiFlags::CREATE;
        }
        let name = dbi_name(Shove(1)); // the distinguished main slot
        let dbi = match self.storage_mut().open_dbi(&name, flags) {
            Ok(dbi) => dbi,
            Err(storage::StorageError::NotFound) => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        Ok(self.storage_mut().sequence(dbi, increment)?)
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            // an unfinished write txn aborts defensively
            let _ = inner.abort();
        }
        self.release_lock();
    }
}
