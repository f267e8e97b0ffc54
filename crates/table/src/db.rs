//! The database object: storage environment, schema serialization lock,
//! and the process-wide cache of sub-database handles.

use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use schema::{dbi_name, dbi_shove, Shove, TableSchema};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use storage::{Dbi, DbiFlags, Durability, Env, Geometry, RegimeFlags};
use tracing::debug;
use tuple::FieldType;

/// Open-addressed handle-cache capacity: a prime near the golden-ratio
/// scaling of the sub-database budget.
pub const DBI_CACHE_SIZE: usize = 6619;

/// Sentinel for "no cache hint".
pub const NO_HINT: u32 = u32::MAX;

/// A decoded table schema plus its per-column handle-cache hints.
#[derive(Debug)]
pub struct TableDef {
    pub schema: TableSchema,
    hints: Vec<AtomicU32>,
}

impl TableDef {
    pub fn new(schema: TableSchema) -> Arc<TableDef> {
        let hints = (0..schema.column_count())
            .map(|_| AtomicU32::new(NO_HINT))
            .collect();
        Arc::new(TableDef { schema, hints })
    }

    pub fn hint(&self, ordinal: usize) -> u32 {
        self.hints[ordinal].load(Ordering::Relaxed)
    }

    pub fn set_hint(&self, ordinal: usize, hint: u32) {
        self.hints[ordinal].store(hint, Ordering::Relaxed);
    }
}

/// Transaction level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Read,
    Write,
    /// Write transaction that may alter the catalog; serialized against
    /// every in-process transaction via the schema lock.
    Schema,
}

/// Shared-or-exclusive lock serializing schema transactions against
/// in-process readers and writers (cross-process isolation is the storage
/// engine's MVCC).
pub(crate) struct SchemaLock {
    state: Mutex<isize>, // -1 exclusive, otherwise reader count
    cv: Condvar,
}

impl SchemaLock {
    fn new() -> SchemaLock {
        SchemaLock {
            state: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub fn lock_shared(&self) {
        let mut state = self.state.lock();
        while *state < 0 {
            self.cv.wait(&mut state);
        }
        *state += 1;
    }

    pub fn lock_exclusive(&self) {
        let mut state = self.state.lock();
        while *state != 0 {
            self.cv.wait(&mut state);
        }
        *state = -1;
    }

    pub fn unlock(&self) {
        let mut state = self.state.lock();
        if *state < 0 {
            *state = 0;
        } else {
            *state -= 1;
        }
        self.cv.notify_all();
    }
}

struct CacheEntry {
    shove: u64,
    dbi: Dbi,
    tsn: u64,
}

pub(crate) struct DbiCache {
    slots: Mutex<Vec<Option<CacheEntry>>>,
}

impl DbiCache {
    fn new() -> DbiCache {
        let mut slots = Vec::new();
        slots.resize_with(DBI_CACHE_SIZE, || None);
        DbiCache {
            slots: Mutex::new(slots),
        }
    }
}

/// One open database. Cheap to clone; all clones share the environment,
/// the schema lock and the handle cache.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<Db>,
}

pub(crate) struct Db {
    pub env: Env,
    pub alterable_schema: bool,
    pub regime: RegimeFlags,
    pub schema_lock: SchemaLock,
    /// Handle of the catalog sub-database, once opened.
    pub catalog_dbi: Mutex<Option<Dbi>>,
    /// The catalog TSN the handle cache was last reconciled against.
    pub schema_tsn: AtomicU64,
    pub cache: DbiCache,
}

impl Database {
    /// Opens (or creates) a database.
    pub fn open(
        path: Option<&std::path::Path>,
        durability: Durability,
        regime: RegimeFlags,
        alterable_schema: bool,
        geometry: Geometry,
    ) -> Result<Database> {
        let mut builder = Env::builder().durability(durability).regime(regime).geometry(geometry);
        if let Some(path) = path {
            builder = builder.path(path);
        }
        let env = builder.open()?;
        Ok(Database {
            inner: Arc::new(Db {
                env,
                alterable_schema,
                regime,
                schema_lock: SchemaLock::new(),
                catalog_dbi: Mutex::new(None),
                schema_tsn: AtomicU64::new(0),
                cache: DbiCache::new(),
            }),
        })
    }

    /// Environment facts: geometry, durability mode, regime, readers.
    pub fn info(&self) -> storage::EnvInfo {
        self.inner.env.info()
    }

    pub fn regime(&self) -> RegimeFlags {
        self.inner.regime
    }
}

// ---------------- dbi flag derivation ----------------

fn short_integer(ty: FieldType) -> bool {
    ty != FieldType::Null && ty < FieldType::B96
}

/// Storage flags of a primary store: key side only; rows are the data.
pub(crate) fn primary_dbi_flags(pk: Shove) -> DbiFlags {
    let mut flags = if pk.index().is_unique() {
        DbiFlags::empty()
    } else {
        DbiFlags::DUP_SORT
    };
    let ty = pk.data_type().unwrap_or(FieldType::Null);
    if short_integer(ty) || pk.index().is_unordered() {
        flags |= DbiFlags::INTEGER_KEY;
    } else if pk.index().is_reverse() && (ty >= FieldType::B96 || ty == FieldType::Null) {
        flags |= DbiFlags::REVERSE_KEY;
    }
    flags
}

/// Storage flags of a secondary store: the key side follows the secondary
/// column, the duplicate side follows the primary key it points at.
pub(crate) fn secondary_dbi_flags(pk: Shove, sk: Shove) -> DbiFlags {
    let mut flags = if sk.index().is_unique() {
        DbiFlags::empty()
    } else {
        DbiFlags::DUP_SORT
    };
    let sk_ty = sk.data_type().unwrap_or(FieldType::Null);
    if short_integer(sk_ty) || sk.index().is_unordered() {
        flags |= DbiFlags::INTEGER_KEY;
    } else if sk.index().is_reverse() && (sk_ty >= FieldType::B96 || sk_ty == FieldType::Null) {
        flags |= DbiFlags::REVERSE_KEY;
    }

    if flags.contains(DbiFlags::DUP_SORT) {
        let pk_ty = pk.data_type().unwrap_or(FieldType::Null);
        if pk_ty < FieldType::Cstr && pk_ty != FieldType::Null {
            flags |= DbiFlags::DUP_FIXED;
        }
        if short_integer(pk_ty) || pk.index().is_unordered() {
            flags |= DbiFlags::INTEGER_DUP | DbiFlags::DUP_FIXED;
        } else if pk.index().is_reverse() && (pk_ty >= FieldType::B96 || pk_ty == FieldType::Null) {
            flags |= DbiFlags::REVERSE_DUP;
        }
    }
    flags
}

/// Flags of index `n` of a table described by `columns` (canonical order).
pub(crate) fn dbi_flags_of(columns: &[Shove], n: usize) -> DbiFlags {
    if n == 0 {
        primary_dbi_flags(columns[0])
    } else {
        secondary_dbi_flags(columns[0], columns[n])
    }
}

// ---------------- handle cache ----------------

impl Db {
    /// Fast path: the hint slot still holds this shove at this TSN.
    pub fn cache_peek(&self, shove: Shove, hint: u32, tsn: u64) -> Option<Dbi> {
        if hint == NO_HINT {
            return None;
        }
        let slots = self.cache.slots.lock();
        match slots.get(hint as usize).and_then(|s| s.as_ref()) {
            Some(entry) if entry.shove == shove.0 && entry.tsn == tsn => Some(entry.dbi),
            _ => None,
        }
    }

    fn cache_lookup(slots: &[Option<CacheEntry>], shove: Shove) -> Option<(u32, Dbi, u64)> {
        let start = (shove.0 % DBI_CACHE_SIZE as u64) as usize;
        let mut at = start;
        loop {
            match &slots[at] {
                Some(entry) if entry.shove == shove.0 => {
                    return Some((at as u32, entry.dbi, entry.tsn))
                }
                Some(_) => {}
                None => return None,
            }
            at = (at + 1) % DBI_CACHE_SIZE;
            if at == start {
                return None;
            }
        }
    }

    fn cache_update(slots: &mut [Option<CacheEntry>], shove: Shove, dbi: Dbi, tsn: u64) -> u32 {
        let start = (shove.0 % DBI_CACHE_SIZE as u64) as usize;
        let mut at = start;
        loop {
            match &slots[at] {
                Some(entry) if entry.shove == shove.0 => break,
                Some(_) => {}
                None => break,
            }
            at = (at + 1) % DBI_CACHE_SIZE;
            if at == start {
                return NO_HINT; // cache exhausted: too many live tables
            }
        }
        slots[at] = Some(CacheEntry {
            shove: shove.0,
            dbi,
            tsn,
        });
        at as u32
    }

    pub fn cache_remove(&self, shove: Shove) {
        let mut slots = self.cache.slots.lock();
        if let Some((at, _, _)) = Self::cache_lookup(&slots, shove) {
            slots[at as usize] = None;
        }
    }

    /// Opens the sub-database for `dbi_shove`, consulting and maintaining
    /// the cache. `txn_schema_tsn` is the calling transaction's view of
    /// the catalog version.
    pub fn cache_open(
        &self,
        txn: &mut storage::Txn,
        txn_schema_tsn: u64,
        dbi_shove_value: Shove,
        flags: DbiFlags,
    ) -> Result<(Dbi, u32)> {
        let mut slots = self.cache.slots.lock();
        if let Some((at, dbi, tsn)) = Self::cache_lookup(&slots, dbi_shove_value) {
            if tsn == txn_schema_tsn {
                return Ok((dbi, at));
            }
            if tsn > txn_schema_tsn {
                let db_tsn = self.schema_tsn.load(Ordering::Acquire);
                if tsn < db_tsn || txn_schema_tsn != db_tsn {
                    return Err(Error::SchemaChanged);
                }
                // the handle is actually current; the txn caught up
                slots[at as usize].as_mut().unwrap().tsn = txn_schema_tsn;
                return Ok((dbi, at));
            }
            // the entry is older than this txn's schema: revalidate by
            // reopening the name
            match txn.open_dbi(&dbi_name(dbi_shove_value), flags) {
                Ok(fresh) if fresh == dbi => {
                    slots[at as usize].as_mut().unwrap().tsn = txn_schema_tsn;
                    return Ok((dbi, at));
                }
                Ok(fresh) => {
                    // the sub-database was recreated; a reader older than
                    // this schema might still use the stale handle
                    let info = self.env.info();
                    if info.self_latter_reader_txnid < txn_schema_tsn {
                        return Err(Error::TardyDbi);
                    }
                    slots[at as usize] = Some(CacheEntry {
                        shove: dbi_shove_value.0,
                        dbi: fresh,
                        tsn: txn_schema_tsn,
                    });
                    return Ok((fresh, at));
                }
                Err(storage::StorageError::Incompatible)
                | Err(storage::StorageError::NotFound) => {
                    let info = self.env.info();
                    if info.self_latter_reader_txnid < txn_schema_tsn {
                        return Err(Error::TardyDbi);
                    }
                    slots[at as usize] = None;
                    return Err(Error::NotFound);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let dbi = txn.open_dbi(&dbi_name(dbi_shove_value), flags)?;
        let at = Self::cache_update(&mut slots, dbi_shove_value, dbi, txn_schema_tsn);
        Ok((dbi, at))
    }

    /// Evicts stale cache entries once the transaction observes a newer
    /// catalog than the database record, then advances the record.
    pub fn cache_cleanup(&self, txn_schema_tsn: u64) -> Result<()> {
        let db_tsn = self.schema_tsn.load(Ordering::Acquire);
        if db_tsn >= txn_schema_tsn {
            if db_tsn == txn_schema_tsn {
                return Ok(());
            }
            return Err(Error::SchemaChanged);
        }

        let info = self.env.info();
        let tardy_tsn = if info.self_latter_reader_txnid < txn_schema_tsn {
            info.latter_reader_txnid
        } else {
            txn_schema_tsn
        };

        if tardy_tsn == txn_schema_tsn {
            let mut slots = self.cache.slots.lock();
            for slot in slots.iter_mut() {
                if let Some(entry) = slot {
                    if entry.tsn < tardy_tsn {
                        *slot = None;
                    }
                }
            }
            debug!(tsn = txn_schema_tsn, "handle cache reconciled");
        }

        self.schema_tsn.store(txn_schema_tsn, Ordering::Release);
        Ok(())
    }

    /// Purges cache entries for handles created inside a dying write
    /// transaction.
    pub fn cache_purge_created(&self, txn: &storage::Txn) {
        let mut slots = self.cache.slots.lock();
        for slot in slots.iter_mut() {
            if let Some(entry) = slot {
                if txn.dbi_created_here(entry.dbi) {
                    *slot = None;
                }
            }
        }
    }

    /// Resolves (opening if needed) the handles of the primary store and
    /// of index `ordinal` for a table.
    pub fn open_index(
        &self,
        txn: &mut storage::Txn,
        txn_schema_tsn: u64,
        def: &TableDef,
        ordinal: usize,
    ) -> Result<Dbi> {
        let columns = def.schema.columns();
        let table = def.schema.table_shove();
        let shove = dbi_shove(table, ordinal);
        let tsn = def.schema.version_tsn();
        if let Some(dbi) = self.cache_peek(shove, def.hint(ordinal), tsn) {
            return Ok(dbi);
        }
        let flags = dbi_flags_of(columns, ordinal);
        let (dbi, hint) = self.cache_open(txn, txn_schema_tsn, shove, flags)?;
        def.set_hint(ordinal, hint);
        Ok(dbi)
    }
}
