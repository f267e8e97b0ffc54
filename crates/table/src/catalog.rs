//! Catalog operations: the schema sub-database, symbolic-name handles,
//! table creation and removal, schema refresh, and table statistics.
//!
//! The catalog is one integer-keyed sub-database. Key 0 holds the
//! dictionary of original-case symbolic names; every other entry maps a
//! table shove to its serialized schema record. Catalog writes happen only
//! inside schema-level transactions.

use crate::db::{dbi_flags_of, Level, TableDef};
use crate::txn::Txn;
use crate::{Error, Result};
use schema::{
    dbi_shove, shove_eq, table_shove, ColumnSet, Dictionary, Shove, StoredSchema, TableSchema,
};
use std::sync::Arc;
use storage::{CursorOp, Dbi, DbiFlags};
use tracing::{debug, warn};

/// Handle of a table name; carries the decoded schema once refreshed.
#[derive(Debug, Clone)]
pub struct TableHandle {
    shove: Shove,
    pub(crate) def: Option<Arc<TableDef>>,
    pub(crate) version_tsn: u64,
}

impl TableHandle {
    pub fn new(name: &str) -> Result<TableHandle> {
        Ok(TableHandle {
            shove: table_shove(name)?,
            def: None,
            version_tsn: 0,
        })
    }

    pub fn shove(&self) -> Shove {
        self.shove
    }

    /// The refreshed schema; `SchemaCorrupted` when the handle was never
    /// refreshed in a transaction.
    pub fn def(&self) -> Result<&Arc<TableDef>> {
        self.def.as_ref().ok_or(Error::SchemaCorrupted)
    }

    /// Drops the cached schema so the next refresh reloads it.
    pub fn reset(&mut self) {
        self.version_tsn = 0;
    }

    /// `(total columns, composite columns)` of a refreshed handle.
    pub fn column_count(&self) -> Result<(usize, usize)> {
        let def = self.def()?;
        let composites = def
            .schema
            .columns()
            .iter()
            .take_while(|s| s.index().is_indexed())
            .filter(|s| s.is_composite())
            .count();
        Ok((def.schema.column_count(), composites))
    }

    /// Bound handle of the column at `ordinal` in the canonical order.
    pub fn column_get(&self, ordinal: usize) -> Result<ColumnHandle> {
        let def = self.def()?;
        if ordinal >= def.schema.column_count() {
            return Err(Error::NoData);
        }
        Ok(ColumnHandle {
            shove: def.schema.column_shove(ordinal),
            table: self.shove,
            ordinal: ordinal as u32,
            version_tsn: self.version_tsn,
        })
    }
}

/// Handle of a column name bound to a table handle.
#[derive(Debug, Clone)]
pub struct ColumnHandle {
    pub(crate) shove: Shove,
    table: Shove,
    pub(crate) ordinal: u32,
    pub(crate) version_tsn: u64,
}

const UNRESOLVED: u32 = u32::MAX;

impl ColumnHandle {
    pub fn new(table: &TableHandle, name: &str) -> Result<ColumnHandle> {
        Ok(ColumnHandle {
            shove: Shove::column(
                schema::name_to_shove(name)?,
                tuple::FieldType::Null,
                schema::IndexType::NONE,
            ),
            table: table.shove(),
            ordinal: UNRESOLVED,
            version_tsn: 0,
        })
    }

    /// The full column shove (type and index flags filled in by refresh).
    pub fn shove(&self) -> Shove {
        self.shove
    }

    /// Column ordinal in the canonical order; `Cursor`/row operations
    /// need a refreshed handle.
    pub fn ordinal(&self) -> Result<usize> {
        if self.ordinal == UNRESOLVED {
            return Err(Error::NotFound);
        }
        Ok(self.ordinal as usize)
    }

    pub fn reset(&mut self) {
        self.version_tsn = 0;
        self.ordinal = UNRESOLVED;
    }
}

fn catalog_key(shove: Shove) -> [u8; 8] {
    shove.0.to_le_bytes()
}

impl Txn {
    // ---------------- schema records ----------------

    /// Reads and decodes the schema record of `table`.
    pub(crate) fn schema_read(&mut self, table: Shove) -> Result<Arc<TableDef>> {
        let catalog = self.catalog_dbi(false)?;
        let bytes = self.storage().get(catalog, &catalog_key(table))?;
        let schema = TableSchema::decode(table, &bytes)?;
        Ok(TableDef::new(schema))
    }

    /// Refreshes a table handle (and optionally one of its columns)
    /// against this transaction's schema version.
    pub fn refresh_couple(
        &mut self,
        table: &mut TableHandle,
        column: Option<&mut ColumnHandle>,
    ) -> Result<()> {
        self.require(Level::Read)?;

        if table.version_tsn != self.schema_tsn() {
            if table.version_tsn > self.schema_tsn() {
                return Err(Error::SchemaChanged);
            }
            match self.schema_read(table.shove) {
                Ok(def) => table.def = Some(def),
                Err(Error::NotFound) => table.def = None,
                Err(err) => return Err(err),
            }
            table.version_tsn = self.schema_tsn();
        }

        let def = table.def.as_ref().ok_or(Error::NotFound)?;
        if def.schema.table_shove() != table.shove {
            return Err(Error::SchemaCorrupted);
        }

        let Some(column) = column else {
            return Ok(());
        };
        if column.table != table.shove {
            return Err(Error::Invalid);
        }
        if column.version_tsn > table.version_tsn {
            return Err(Error::SchemaChanged);
        }
        if column.version_tsn != table.version_tsn {
            column.ordinal = UNRESOLVED;
            for (nth, &shove) in def.schema.columns().iter().enumerate() {
                if shove_eq(column.shove, shove) {
                    // adopt the stored type and index flags
                    column.shove = shove;
                    column.ordinal = nth as u32;
                    break;
                }
            }
            column.version_tsn = table.version_tsn;
        }
        if column.ordinal == UNRESOLVED {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Refreshes either kind of handle.
    pub fn refresh_table(&mut self, table: &mut TableHandle) -> Result<()> {
        self.refresh_couple(table, None)
    }

    // ---------------- handles of storage sub-databases ----------------

    pub(crate) fn open_table_store(&mut self, def: &TableDef) -> Result<Dbi> {
        let tsn = self.schema_tsn();
        let db = self.db.clone();
        db.inner.open_index(self.storage_mut(), tsn, def, 0)
    }

    pub(crate) fn open_index_store(&mut self, def: &TableDef, ordinal: usize) -> Result<Dbi> {
        if ordinal == 0 {
            return self.open_table_store(def);
        }
        let tsn = self.schema_tsn();
        let db = self.db.clone();
        db.inner.open_index(self.storage_mut(), tsn, def, ordinal)
    }

    /// Handles of the primary store and every secondary index, in
    /// ordinal order.
    pub(crate) fn open_secondaries(&mut self, def: &TableDef) -> Result<Vec<Dbi>> {
        let mut handles = Vec::with_capacity(def.schema.index_count());
        handles.push(self.open_table_store(def)?);
        for ordinal in 1..def.schema.column_count() {
            if !def.schema.column_shove(ordinal).index().is_indexed() {
                break;
            }
            handles.push(self.open_index_store(def, ordinal)?);
        }
        Ok(handles)
    }

    // ---------------- table creation ----------------

    /// Creates a table from a described column set. Schema-level only.
    pub fn table_create(&mut self, name: &str, set: &ColumnSet) -> Result<()> {
        self.require(Level::Schema)?;
        let table = table_shove(name)?;
        let (columns, composites) = set.sorted()?;

        if !self
            .db
            .regime()
            .contains(storage::RegimeFlags::ALLOW_CLUMSY)
        {
            check_clumsy(&columns)?;
        }

        let catalog = self.catalog_dbi(true)?;

        // none of the target sub-databases may exist
        for (nth, column) in columns.iter().enumerate() {
            if !column.index().is_indexed() {
                break;
            }
            let name = schema::dbi_name(dbi_shove(table, nth));
            match self.storage_mut().open_dbi(&name, dbi_flags_of(&columns, nth)) {
                Err(storage::StorageError::NotFound) => {}
                Err(storage::StorageError::Incompatible) | Ok(_) => return Err(Error::Exists),
                Err(err) => return Err(err.into()),
            }
        }

        // fold the symbolic names into the catalog dictionary
        let mut dict = match self.storage().get(catalog, &catalog_key(Shove::DICT)) {
            Ok(bytes) => Dictionary::parse(&bytes)?,
            Err(storage::StorageError::NotFound) => Dictionary::new(),
            Err(err) => return Err(err.into()),
        };
        let before = dict.serialize();
        dict.merge(name)?;
        for column_name in set.names() {
            dict.merge(column_name)?;
        }
        let after = dict.serialize();

        let result = (|| -> Result<()> {
            if after != before {
                self.storage_mut().put(
                    catalog,
                    &catalog_key(Shove::DICT),
                    &after,
                    storage::PutFlags::empty(),
                )?;
            }
            for (nth, column) in columns.iter().enumerate() {
                if !column.index().is_indexed() {
                    break;
                }
                let dbi_name = schema::dbi_name(dbi_shove(table, nth));
                self.storage_mut()
                    .open_dbi(&dbi_name, dbi_flags_of(&columns, nth) | DbiFlags::CREATE)?;
            }
            let record = StoredSchema::encode(&columns, &composites, self.db_version());
            self.storage_mut().put(
                catalog,
                &catalog_key(table),
                &record,
                storage::PutFlags::NO_OVERWRITE,
            )?;
            self.storage_mut().sequence(catalog, 1)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.bump_schema_tsn();
                debug!(table = name, "table created");
                Ok(())
            }
            Err(err) => Err(self.internal_abort(err)),
        }
    }

    /// Drops a table: its catalog record, its dictionary symbols not
    /// shared with other tables, and every backing sub-database.
    pub fn table_drop(&mut self, name: &str) -> Result<()> {
        self.require(Level::Schema)?;
        let table = table_shove(name)?;
        let catalog = self.catalog_dbi(false)?;

        // walk the whole catalog: latch the old dictionary, find the
        // table, and rebuild the dictionary from the surviving tables
        let mut old_dict = Dictionary::new();
        let mut new_dict = Dictionary::new();
        let mut dropped: Option<TableSchema> = None;

        let mut cursor = storage::Cursor::new(catalog);
        let mut step = cursor.get(self.storage(), None, None, CursorOp::First);
        while let Ok((key, value)) = step {
            let shove = Shove(u64::from_le_bytes(
                key.as_slice().try_into().map_err(|_| Error::SchemaCorrupted)?,
            ));
            if shove == Shove::DICT {
                old_dict = Dictionary::parse(&value)?;
            } else {
                let schema = TableSchema::decode(shove, &value)?;
                if shove == table {
                    dropped = Some(schema);
                } else {
                    new_dict.pickup(&old_dict, shove);
                    for &column in schema.columns() {
                        new_dict.pickup(&old_dict, column);
                    }
                }
            }
            step = cursor.get(self.storage(), None, None, CursorOp::Next);
        }
        let dropped = dropped.ok_or(Error::NotFound)?;

        // resolve the handles of every backing sub-database up front
        let mut handles: Vec<Option<Dbi>> = Vec::new();
        for (nth, column) in dropped.columns().iter().enumerate() {
            if !column.index().is_indexed() {
                break;
            }
            let dbi_name = schema::dbi_name(dbi_shove(table, nth));
            match self
                .storage_mut()
                .open_dbi(&dbi_name, dbi_flags_of(dropped.columns(), nth))
            {
                Ok(dbi) => handles.push(Some(dbi)),
                Err(storage::StorageError::NotFound) => handles.push(None),
                Err(err) => return Err(err.into()),
            }
        }

        let result = (|| -> Result<()> {
            let reduced = new_dict.serialize();
            if reduced != old_dict.serialize() {
                self.storage_mut().put(
                    catalog,
                    &catalog_key(Shove::DICT),
                    &reduced,
                    storage::PutFlags::empty(),
                )?;
            }
            self.storage_mut().del(catalog, &catalog_key(table), None)?;
            for (nth, handle) in handles.iter().enumerate() {
                if let Some(dbi) = handle {
                    self.db.inner.cache_remove(dbi_shove(table, nth));
                    self.storage_mut().drop_dbi(*dbi)?;
                }
            }
            self.storage_mut().sequence(catalog, 1)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.bump_schema_tsn();
                debug!(table = name, "table dropped");
                Ok(())
            }
            Err(err) => Err(self.internal_abort(err)),
        }
    }

    // ---------------- table-level services ----------------

    /// Per-table sequence with atomic get-and-add, backed by the primary
    /// store.
    pub fn table_sequence(&mut self, table: &mut TableHandle, increment: u64) -> Result<u64> {
        self.refresh_table(table)?;
        if increment > 0 {
            self.require(Level::Write)?;
        }
        let def = table.def()?.clone();
        let store = self.open_table_store(&def)?;
        Ok(self.storage_mut().sequence(store, increment)?)
    }

    /// Row count and optional statistics.
    pub fn table_info(
        &mut self,
        table: &mut TableHandle,
        want_stat: bool,
    ) -> Result<(u64, Option<TableStat>)> {
        self.refresh_table(table)?;
        let def = table.def()?.clone();
        let store = self.open_table_store(&def)?;
        let pk_stat = self.storage().stat(store)?;
        let row_count = pk_stat.entries;
        if !want_stat {
            return Ok((row_count, None));
        }

        let mut stat = TableStat {
            mod_txnid: pk_stat.mod_txnid,
            row_count,
            total_items: pk_stat.entries,
            btree_depth: pk_stat.depth,
            leaf_pages: pk_stat.leaf_pages,
            branch_pages: pk_stat.branch_pages,
            large_pages: pk_stat.overflow_pages,
            total_bytes: 0,
            cost_scan_o1n: 0,
            cost_search_olog_n: 0,
            cost_alter_m_olog_n: 0,
            cost_uniq_m_olog_n: 0,
            index_costs: vec![index_cost(def.schema.column_shove(0), &pk_stat)],
        };

        let mut uniq = CostAccumulator::default();
        let mut number_of_trees = 1u64;
        let mut summary_depth = pk_stat.depth as u64;

        if def.schema.has_secondary() {
            let handles = self.open_secondaries(&def)?;
            for (ordinal, handle) in handles.iter().enumerate().skip(1) {
                let shove = def.schema.column_shove(ordinal);
                let idx_stat = self.storage().stat(*handle)?;
                if shove.index().is_unique() {
                    uniq.add(&idx_stat);
                }
                stat.total_items += idx_stat.entries;
                number_of_trees += 1;
                summary_depth += idx_stat.depth as u64 + 1;
                stat.btree_depth = stat.btree_depth.max(idx_stat.depth);
                stat.leaf_pages += idx_stat.leaf_pages;
                stat.branch_pages += idx_stat.branch_pages;
                stat.large_pages += idx_stat.overflow_pages;
                stat.index_costs.push(index_cost(shove, &idx_stat));
            }
        }

        let page = pk_stat.page_size as u64;
        stat.total_bytes = (stat.leaf_pages + stat.branch_pages + stat.large_pages) * page;
        stat.cost_scan_o1n =
            42 + (8 * stat.total_bytes + stat.row_count) / (stat.row_count + 1);
        let per_leaf = (stat.row_count + stat.leaf_pages) / (stat.leaf_pages + 1);
        let per_branch = (stat.row_count + stat.branch_pages) / (stat.branch_pages + 1);
        stat.cost_search_olog_n =
            42 + (per_leaf + per_branch * stat.btree_depth as u64 + 1) * stat.cost_scan_o1n;
        stat.cost_alter_m_olog_n = 42
            + (per_leaf * number_of_trees + per_branch * summary_depth + 1)
                * stat.cost_scan_o1n
                * 3;
        stat.cost_uniq_m_olog_n = uniq.finish(page);

        Ok((row_count, Some(stat)))
    }

    /// Deletes every row, optionally preserving the sequence counter.
    pub fn table_clear(&mut self, table: &mut TableHandle, reset_sequence: bool) -> Result<()> {
        self.require(Level::Write)?;
        self.refresh_table(table)?;
        let def = table.def()?.clone();
        let handles = self.open_secondaries(&def)?;

        let sequence = if reset_sequence {
            0
        } else {
            self.storage_mut().sequence(handles[0], 0)?
        };

        let result = (|| -> Result<()> {
            for handle in &handles {
                self.storage_mut().clear_dbi(*handle)?;
            }
            if sequence != 0 {
                self.storage_mut().sequence(handles[0], sequence)?;
            }
            Ok(())
        })();
        result.map_err(|err| self.internal_abort(err))
    }

    // ---------------- whole-schema inspection ----------------

    /// Snapshot of the whole catalog: versions, a content digest, the
    /// dictionary, and a handle per table.
    pub fn schema_fetch(&mut self) -> Result<SchemaInfo> {
        self.require(Level::Read)?;
        let catalog = self.catalog_dbi(false)?;
        let csn = self.storage_mut().sequence(catalog, 0)?;

        let mut info = SchemaInfo {
            tsn: self.schema_tsn(),
            csn,
            digest: (0, 0),
            dict: Dictionary::new(),
            tables: Vec::new(),
        };

        let mut digest_feed: Vec<u8> = Vec::new();
        let mut cursor = storage::Cursor::new(catalog);
        let mut step = cursor.get(self.storage(), None, None, CursorOp::First);
        while let Ok((key, value)) = step {
            let shove = Shove(u64::from_le_bytes(
                key.as_slice().try_into().map_err(|_| Error::SchemaCorrupted)?,
            ));
            if shove == Shove::DICT {
                info.dict = Dictionary::parse(&value)?;
            } else {
                if info.tables.len() >= schema::MAX_TABLES {
                    return Err(Error::SchemaCorrupted);
                }
                let schema = TableSchema::decode(shove, &value)?;
                for &column in schema.columns() {
                    if !info.dict.exists(column) {
                        return Err(Error::SchemaCorrupted);
                    }
                }
                digest_feed.extend_from_slice(&key);
                digest_feed.extend_from_slice(&value[24..]); // past checksum + header
                info.tables.push(TableHandle {
                    shove,
                    def: Some(TableDef::new(schema)),
                    version_tsn: self.schema_tsn(),
                });
            }
            step = cursor.get(self.storage(), None, None, CursorOp::Next);
        }

        info.digest = (
            t1ha::t1ha2_atonce(&digest_feed, info.tsn),
            t1ha::t1ha2_atonce(&digest_feed, !info.tsn),
        );
        Ok(info)
    }
}

/// Heuristic guarding against expensive schemas: a non-ordinal primary
/// combined with ordinal unique secondaries (or more than one clumsy
/// secondary) is rejected unless the regime allows it.
fn check_clumsy(columns: &[Shove]) -> Result<()> {
    if columns[0].is_ordinal() {
        return Ok(());
    }
    let mut clumsy = 0;
    for column in &columns[1..] {
        if !column.index().is_indexed() {
            break;
        }
        if column.is_ordinal() && !column.is_nullable() {
            if column.index().is_unique() {
                warn!("rejecting clumsy schema: ordinal unique secondary with costly primary");
                return Err(Error::ClumsyIndex);
            }
        } else {
            clumsy += 1;
            if clumsy > 1 {
                return Err(Error::ClumsyIndex);
            }
        }
    }
    Ok(())
}

/// Whole-schema snapshot returned by [`Txn::schema_fetch`].
#[derive(Debug)]
pub struct SchemaInfo {
    pub tsn: u64,
    /// Catalog change sequence number.
    pub csn: u64,
    /// 128-bit digest over every schema record.
    pub digest: (u64, u64),
    pub dict: Dictionary,
    pub tables: Vec<TableHandle>,
}

impl SchemaInfo {
    /// Original-case symbolic name of a table or column.
    pub fn symbol(&self, shove: Shove) -> Result<&str> {
        self.dict.lookup(shove).ok_or(Error::NotFound)
    }
}

/// Derived cost factors of one index tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCost {
    pub column_shove: Shove,
    pub btree_depth: u32,
    pub items: u64,
    pub branch_pages: u64,
    pub leaf_pages: u64,
    pub large_pages: u64,
    pub bytes: u64,
    pub scan_o1n: u64,
    pub search_olog_n: u64,
    pub clumsy_factor: u64,
}

fn index_cost(column_shove: Shove, stat: &storage::DbiStat) -> IndexCost {
    let bytes =
        (stat.branch_pages + stat.leaf_pages + stat.overflow_pages) * stat.page_size as u64;
    let scan_o1n = (8 * bytes + stat.entries) / (stat.entries + 1);
    let per_leaf = 42 + (stat.entries + stat.leaf_pages) / (stat.leaf_pages + 1);
    let per_branch = (stat.entries + stat.branch_pages) / (stat.branch_pages + 1);
    IndexCost {
        column_shove,
        btree_depth: stat.depth,
        items: stat.entries,
        branch_pages: stat.branch_pages,
        leaf_pages: stat.leaf_pages,
        large_pages: stat.overflow_pages,
        bytes,
        scan_o1n,
        search_olog_n: 42 + (per_leaf + per_branch * stat.depth as u64 + 1) * scan_o1n,
        clumsy_factor: (stat.depth as u64 * bytes + stat.entries) / (stat.entries + 1),
    }
}

/// Aggregate table statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStat {
    pub mod_txnid: u64,
    pub row_count: u64,
    pub total_items: u64,
    pub btree_depth: u32,
    pub leaf_pages: u64,
    pub branch_pages: u64,
    pub large_pages: u64,
    pub total_bytes: u64,
    pub cost_scan_o1n: u64,
    pub cost_search_olog_n: u64,
    pub cost_alter_m_olog_n: u64,
    pub cost_uniq_m_olog_n: u64,
    pub index_costs: Vec<IndexCost>,
}

#[derive(Default)]
struct CostAccumulator {
    items: u64,
    leaf_pages: u64,
    branch_pages: u64,
    large_pages: u64,
    trees: u64,
    summary_depth: u64,
}

impl CostAccumulator {
    fn add(&mut self, stat: &storage::DbiStat) {
        self.items += stat.entries;
        self.trees += 1;
        self.summary_depth += stat.depth as u64 + 1;
        self.leaf_pages += stat.leaf_pages;
        self.branch_pages += stat.branch_pages;
        self.large_pages += stat.overflow_pages;
    }

    fn finish(&self, page: u64) -> u64 {
        let bytes = (self.leaf_pages + self.branch_pages + self.large_pages) * page;
        let per_leaf = (self.items + self.leaf_pages) / (self.leaf_pages + 1);
        let per_branch = (self.items + self.branch_pages) / (self.branch_pages + 1);
        let o1n = (8 * bytes + self.items) / (self.items + 1);
        (per_leaf * self.trees + per_branch * self.summary_depth + 1) * o1n
    }
}
