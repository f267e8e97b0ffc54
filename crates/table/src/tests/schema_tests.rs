use super::helpers::*;
use crate::*;

// -------------------- create / drop --------------------

#[test]
fn create_requires_schema_level() {
    let db = memdb();
    let mut set = ColumnSet::new();
    set.add("id", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    assert_eq!(txn.table_create("t", &set), Err(Error::Perm));
    txn.abort().unwrap();
}

#[test]
fn schema_level_needs_alterable_db() {
    let db = Database::open(
        None,
        Durability::Weak,
        RegimeFlags::empty(),
        false,
        Geometry::default(),
    )
    .unwrap();
    assert_eq!(Txn::begin(&db, Level::Schema).err(), Some(Error::Perm));
}

#[test]
fn duplicate_table_rejected() {
    let db = memdb();
    create_users(&db);
    let mut set = ColumnSet::new();
    set.add("id", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    let mut txn = Txn::begin(&db, Level::Schema).unwrap();
    assert_eq!(txn.table_create("users", &set), Err(Error::Exists));
    txn.abort().unwrap();
}

#[test]
fn drop_removes_table_and_symbols() {
    let db = memdb();
    create_users(&db);

    let mut txn = Txn::begin(&db, Level::Schema).unwrap();
    txn.table_drop("users").unwrap();
    txn.commit().unwrap();

    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    let mut table = TableHandle::new("users").unwrap();
    assert_eq!(txn.refresh_table(&mut table).err(), Some(Error::NotFound));
    let info = txn.schema_fetch().unwrap();
    assert!(info.tables.is_empty());
    assert!(info.dict.is_empty());
    txn.commit().unwrap();

    // dropping again is NotFound
    let mut txn = Txn::begin(&db, Level::Schema).unwrap();
    assert_eq!(txn.table_drop("users"), Err(Error::NotFound));
    txn.abort().unwrap();
}

#[test]
fn drop_keeps_shared_symbols_of_other_tables() {
    let db = memdb();
    create_users(&db);
    // a second table reusing the column name "id"
    let mut set = ColumnSet::new();
    set.add("id", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    set.add("label", FieldType::Cstr, IndexType::NONE_NULLABLE).unwrap();
    let mut txn = Txn::begin(&db, Level::Schema).unwrap();
    txn.table_create("tags", &set).unwrap();
    txn.table_drop("users").unwrap();
    txn.commit().unwrap();

    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    let info = txn.schema_fetch().unwrap();
    assert_eq!(info.tables.len(), 1);
    assert_eq!(info.symbol(schema::table_shove("tags").unwrap()).unwrap(), "tags");
    // "id" survives (tags uses it), "email" does not
    assert!(info.dict.lookup(schema::name_to_shove("id").unwrap()).is_some());
    assert!(info.dict.lookup(schema::name_to_shove("email").unwrap()).is_none());
    txn.commit().unwrap();
}

#[test]
fn recreate_after_drop_gets_fresh_handles() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    // touch the table so its handles land in the cache
    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    insert_user(&mut txn, &mut table, &cols, 1, "a@example.com", 20);
    txn.commit().unwrap();

    let mut txn = Txn::begin(&db, Level::Schema).unwrap();
    txn.table_drop("users").unwrap();
    txn.commit().unwrap();
    create_users(&db);

    // the stale handle refreshes cleanly and sees the empty recreation
    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    let (count, _) = txn.table_info(&mut table, false).unwrap();
    assert_eq!(count, 0);
    txn.commit().unwrap();
}

#[test]
fn refresh_tracks_schema_versions() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    txn.refresh_table(&mut table).unwrap();
    let seen_v1 = table.version_tsn;
    txn.commit().unwrap();

    let mut set = ColumnSet::new();
    set.add("k", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    let mut schema_txn = Txn::begin(&db, Level::Schema).unwrap();
    schema_txn.table_create("newer", &set).unwrap();
    schema_txn.commit().unwrap();

    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    txn.refresh_table(&mut table).unwrap();
    assert!(table.version_tsn > seen_v1);

    // a handle claiming a future catalog version is retryable, not usable
    table.version_tsn = u64::MAX;
    assert_eq!(txn.refresh_table(&mut table).err(), Some(Error::SchemaChanged));
    table.reset();
    txn.refresh_table(&mut table).unwrap();
    txn.commit().unwrap();
}

// -------------------- clumsy heuristics --------------------

#[test]
fn clumsy_index_is_rejected_and_bypassable() {
    let mut set = ColumnSet::new();
    // a long-string primary with an ordinal unique secondary is clumsy
    set.add("path", FieldType::Cstr, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    set.add(
        "inode",
        FieldType::Uint64,
        IndexType::SECONDARY_UNIQUE_ORDERED_OBVERSE,
    )
    .unwrap();

    let strict = memdb();
    let mut txn = Txn::begin(&strict, Level::Schema).unwrap();
    assert_eq!(txn.table_create("files", &set), Err(Error::ClumsyIndex));
    txn.abort().unwrap();

    let lenient = Database::open(
        None,
        Durability::Weak,
        RegimeFlags::ALLOW_CLUMSY,
        true,
        Geometry::default(),
    )
    .unwrap();
    let mut txn = Txn::begin(&lenient, Level::Schema).unwrap();
    txn.table_create("files", &set).unwrap();
    txn.commit().unwrap();
}

// -------------------- sequences, clear, info --------------------

#[test]
fn table_and_db_sequences() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    assert_eq!(txn.table_sequence(&mut table, 0).unwrap(), 0);
    assert_eq!(txn.table_sequence(&mut table, 3).unwrap(), 0);
    assert_eq!(txn.table_sequence(&mut table, 1).unwrap(), 3);
    let db_seq = txn.db_sequence(10).unwrap();
    assert_eq!(txn.db_sequence(0).unwrap(), db_seq + 10);
    txn.commit().unwrap();

    // sequences are read-only in read transactions
    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    assert_eq!(txn.table_sequence(&mut table, 0).unwrap(), 4);
    assert_eq!(txn.table_sequence(&mut table, 1), Err(Error::Perm));
    txn.commit().unwrap();
}

#[test]
fn table_clear_optionally_keeps_sequence() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    insert_user(&mut txn, &mut table, &cols, 1, "a@example.com", 20);
    insert_user(&mut txn, &mut table, &cols, 2, "b@example.com", 21);
    txn.table_sequence(&mut table, 7).unwrap();

    txn.table_clear(&mut table, false).unwrap();
    let (count, _) = txn.table_info(&mut table, false).unwrap();
    assert_eq!(count, 0);
    assert_eq!(txn.table_sequence(&mut table, 0).unwrap(), 7);

    insert_user(&mut txn, &mut table, &cols, 3, "c@example.com", 22);
    txn.table_clear(&mut table, true).unwrap();
    assert_eq!(txn.table_sequence(&mut table, 0).unwrap(), 0);
    txn.commit().unwrap();
}

#[test]
fn table_info_reports_stats() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    for id in 0..10 {
        insert_user(&mut txn, &mut table, &cols, id, &format!("s{}@example.com", id), 30);
    }
    txn.commit().unwrap();

    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    let (count, stat) = txn.table_info(&mut table, true).unwrap();
    let stat = stat.unwrap();
    assert_eq!(count, 10);
    // primary rows plus one entry per row in each of the two secondaries
    assert_eq!(stat.total_items, 30);
    assert_eq!(stat.index_costs.len(), 3);
    assert!(stat.btree_depth >= 1);
    assert!(stat.cost_search_olog_n >= stat.cost_scan_o1n);
    txn.commit().unwrap();
}

// -------------------- schema fetch --------------------

#[test]
fn schema_fetch_reports_tables_and_digest() {
    let db = memdb();
    create_users(&db);

    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    let info = txn.schema_fetch().unwrap();
    assert_eq!(info.tables.len(), 1);
    assert_eq!(info.csn, 1);
    assert!(info.tsn > 0);
    let digest_before = info.digest;
    assert_ne!(digest_before, (0, 0));

    let table = &info.tables[0];
    assert_eq!(info.symbol(table.shove()).unwrap(), "users");
    let def = table.def().unwrap();
    assert_eq!(def.schema.column_count(), 4);
    txn.commit().unwrap();

    // another table changes both the digest and the csn
    let mut set = ColumnSet::new();
    set.add("id", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    let mut txn = Txn::begin(&db, Level::Schema).unwrap();
    txn.table_create("more", &set).unwrap();
    txn.commit().unwrap();

    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    let info = txn.schema_fetch().unwrap();
    assert_eq!(info.tables.len(), 2);
    assert_eq!(info.csn, 2);
    assert_ne!(info.digest, digest_before);
    txn.commit().unwrap();
}

// -------------------- transaction plumbing --------------------

#[test]
fn versions_and_restart() {
    let db = memdb();
    create_users(&db);

    let mut reader = Txn::begin(&db, Level::Read).unwrap();
    let (db_v1, schema_v1) = reader.versions();
    assert!(schema_v1 <= db_v1);

    {
        let mut writer = Txn::begin(&db, Level::Write).unwrap();
        let mut table = TableHandle::new("users").unwrap();
        let cols = user_cols(&mut writer, &mut table);
        insert_user(&mut writer, &mut table, &cols, 1, "r@example.com", 20);
        writer.commit().unwrap();
    }

    let (lag, _, _) = reader.lag_ex().unwrap();
    assert_eq!(lag, 1);
    assert!(reader.enough_for_restart(1, u64::MAX, 0).is_ok());
    assert_eq!(
        reader.enough_for_restart(100, u64::MAX, 0).err(),
        Some(Error::NoData)
    );

    reader.restart().unwrap();
    let (db_v2, _) = reader.versions();
    assert!(db_v2 > db_v1);
    assert_eq!(reader.lag_ex().unwrap().0, 0);
    reader.commit().unwrap();
}

#[test]
fn drop_aborts_unfinished_write() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    {
        let mut txn = Txn::begin(&db, Level::Write).unwrap();
        let cols = user_cols(&mut txn, &mut table);
        insert_user(&mut txn, &mut table, &cols, 1, "x@example.com", 20);
        // dropped without commit
    }

    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    let (count, _) = txn.table_info(&mut table, false).unwrap();
    assert_eq!(count, 0);
    txn.commit().unwrap();
}

// -------------------- persistence --------------------

#[test]
fn tables_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tables.log");

    {
        let db = Database::open(
            Some(&path),
            Durability::Sync,
            RegimeFlags::empty(),
            true,
            Geometry::default(),
        )
        .unwrap();
        create_users(&db);
        let mut table = TableHandle::new("users").unwrap();
        let mut txn = Txn::begin(&db, Level::Write).unwrap();
        let cols = user_cols(&mut txn, &mut table);
        insert_user(&mut txn, &mut table, &cols, 1, "p@example.com", 20);
        txn.commit().unwrap();
    }

    let db = Database::open(
        Some(&path),
        Durability::Sync,
        RegimeFlags::empty(),
        true,
        Geometry::default(),
    )
    .unwrap();
    let mut table = TableHandle::new("users").unwrap();
    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    let mut email = ColumnHandle::new(&table, "email").unwrap();
    let row = get(&mut txn, &mut table, &mut email, &Value::Str("p@example.com")).unwrap();
    assert_eq!(TupleRo::new(&row).unwrap().get_u64(cols.id), 1);
    txn.commit().unwrap();
}
