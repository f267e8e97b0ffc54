use super::helpers::*;
use crate::*;

// -------------------- basic writes & reads --------------------

#[test]
fn insert_and_get_by_pk_and_secondary() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    insert_user(&mut txn, &mut table, &cols, 1, "ann@example.com", 30);
    insert_user(&mut txn, &mut table, &cols, 2, "bob@example.com", 41);
    txn.commit().unwrap();

    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    let mut id = ColumnHandle::new(&table, "id").unwrap();
    let row = get(&mut txn, &mut table, &mut id, &Value::Uint(2)).unwrap();
    let row = TupleRo::new(&row).unwrap();
    assert_eq!(row.get_str(cols.email), Some("bob@example.com"));
    assert_eq!(row.get_u16(cols.age), 41);

    let mut email = ColumnHandle::new(&table, "email").unwrap();
    let row = get(&mut txn, &mut table, &mut email, &Value::Str("ann@example.com")).unwrap();
    assert_eq!(TupleRo::new(&row).unwrap().get_u64(cols.id), 1);

    // a non-unique index cannot serve point lookups
    let mut age = ColumnHandle::new(&table, "age").unwrap();
    assert_eq!(
        get(&mut txn, &mut table, &mut age, &Value::Uint(30)).err(),
        Some(Error::NoIndex)
    );
    txn.commit().unwrap();
}

#[test]
fn secondary_unique_violation() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    insert_user(&mut txn, &mut table, &cols, 1, "x@example.com", 30);

    // same email, different pk: both validate_put and put refuse
    let row2 = user_row(&cols, 2, "x@example.com", 31, None);
    let row2 = TupleRo::new(&row2).unwrap();
    assert_eq!(
        validate_put(&mut txn, &mut table, row2, PutOp::Insert, false),
        Err(Error::KeyExist)
    );
    assert_eq!(put(&mut txn, &mut table, row2, PutOp::Insert), Err(Error::KeyExist));

    // a fresh email succeeds, and is then visible through the pk
    let row2 = user_row(&cols, 2, "y@example.com", 31, None);
    put(&mut txn, &mut table, TupleRo::new(&row2).unwrap(), PutOp::Insert).unwrap();
    let mut id = ColumnHandle::new(&table, "id").unwrap();
    let fetched = get(&mut txn, &mut table, &mut id, &Value::Uint(2)).unwrap();
    assert_eq!(
        TupleRo::new(&fetched).unwrap().get_str(cols.email),
        Some("y@example.com")
    );
    txn.commit().unwrap();
}

#[test]
fn insert_requires_nonnullable_columns() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    // age is a non-unique indexed non-nullable column: required
    let mut pt = TupleRw::alloc(4, 64).unwrap();
    pt.insert_u64(cols.id, 5).unwrap();
    pt.insert_str(cols.email, "p@example.com").unwrap();
    let bytes = pt.take().as_bytes().to_vec();
    assert_eq!(
        put(&mut txn, &mut table, TupleRo::new(&bytes).unwrap(), PutOp::Insert),
        Err(Error::ColumnMissing)
    );
    // name is nullable: omitting it is fine
    insert_user(&mut txn, &mut table, &cols, 5, "p@example.com", 20);
    txn.abort().unwrap();
}

#[test]
fn update_rehomes_changed_secondaries() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    insert_user(&mut txn, &mut table, &cols, 1, "before@example.com", 30);

    let updated = user_row(&cols, 1, "after@example.com", 33, Some("renamed"));
    put(&mut txn, &mut table, TupleRo::new(&updated).unwrap(), PutOp::Update).unwrap();

    let mut email = ColumnHandle::new(&table, "email").unwrap();
    assert!(get(&mut txn, &mut table, &mut email, &Value::Str("after@example.com")).is_ok());
    assert_eq!(
        get(&mut txn, &mut table, &mut email, &Value::Str("before@example.com")).err(),
        Some(Error::NotFound)
    );
    txn.commit().unwrap();
}

#[test]
fn update_missing_row_and_upsert() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    let row = user_row(&cols, 9, "u@example.com", 50, None);
    let row = TupleRo::new(&row).unwrap();
    assert_eq!(put(&mut txn, &mut table, row, PutOp::Update), Err(Error::NotFound));
    put(&mut txn, &mut table, row, PutOp::Upsert).unwrap();
    // an identical upsert is a silent no-op
    put(&mut txn, &mut table, row, PutOp::Upsert).unwrap();
    txn.commit().unwrap();
}

#[test]
fn delete_removes_all_index_entries() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    let row = user_row(&cols, 3, "gone@example.com", 25, None);
    put(&mut txn, &mut table, TupleRo::new(&row).unwrap(), PutOp::Insert).unwrap();
    delete(&mut txn, &mut table, TupleRo::new(&row).unwrap()).unwrap();

    let mut id = ColumnHandle::new(&table, "id").unwrap();
    assert_eq!(
        get(&mut txn, &mut table, &mut id, &Value::Uint(3)).err(),
        Some(Error::NotFound)
    );
    let mut email = ColumnHandle::new(&table, "email").unwrap();
    assert_eq!(
        get(&mut txn, &mut table, &mut email, &Value::Str("gone@example.com")).err(),
        Some(Error::NotFound)
    );
    // deleting again is NotFound, not corruption
    assert_eq!(
        delete(&mut txn, &mut table, TupleRo::new(&row).unwrap()).err(),
        Some(Error::NotFound)
    );
    txn.abort().unwrap();
}

// -------------------- index/primary coherence --------------------

#[test]
fn indexes_stay_coherent_under_churn() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    for id in 0..40u64 {
        insert_user(
            &mut txn,
            &mut table,
            &cols,
            id,
            &format!("u{}@example.com", id),
            (20 + id % 5) as u16,
        );
    }
    // mutate a third, delete another third
    for id in 0..40u64 {
        match id % 3 {
            0 => {
                let row = user_row(&cols, id, &format!("m{}@example.com", id), 77, None);
                put(&mut txn, &mut table, TupleRo::new(&row).unwrap(), PutOp::Update).unwrap();
            }
            1 => {
                let row = user_row(
                    &cols,
                    id,
                    &format!("u{}@example.com", id),
                    (20 + id % 5) as u16,
                    None,
                );
                delete(&mut txn, &mut table, TupleRo::new(&row).unwrap()).unwrap();
            }
            _ => {}
        }
    }
    txn.commit().unwrap();

    // every row reachable through the pk is reachable through its email,
    // and the secondary holds exactly one entry per live row
    let mut txn = Txn::begin(&db, Level::Read).unwrap();
    let (live, _) = txn.table_info(&mut table, false).unwrap();
    assert_eq!(live, 27); // 40 minus the 13 deleted (id % 3 == 1)

    let mut id_col = ColumnHandle::new(&table, "id").unwrap();
    let mut email_col = ColumnHandle::new(&table, "email").unwrap();
    let mut seen_by_email = 0;
    for id in 0..40u64 {
        let by_pk = get(&mut txn, &mut table, &mut id_col, &Value::Uint(id));
        if id % 3 == 1 {
            assert_eq!(by_pk.err(), Some(Error::NotFound));
            continue;
        }
        let row_bytes = by_pk.unwrap();
        let row = TupleRo::new(&row_bytes).unwrap();
        let email = row.get_str(cols.email).unwrap().to_string();
        let via_email = get(&mut txn, &mut table, &mut email_col, &Value::Str(&email)).unwrap();
        assert_eq!(via_email, row_bytes);
        seen_by_email += 1;
    }
    assert_eq!(seen_by_email, 27);
    txn.commit().unwrap();
}

// -------------------- column access --------------------

#[test]
fn read_and_upsert_columns() {
    let db = memdb();
    create_users(&db);
    let mut table = TableHandle::new("users").unwrap();

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    let cols = user_cols(&mut txn, &mut table);
    let def = table.def().unwrap().clone();
    let email_ord = cols.email as usize;
    let name_ord = cols.name as usize;

    let mut pt = TupleRw::alloc(8, 128).unwrap();
    upsert_column(&mut pt, &def, cols.id as usize, &Value::Uint(7), true).unwrap();
    upsert_column(&mut pt, &def, email_ord, &Value::Str("c@example.com"), true).unwrap();
    upsert_column(&mut pt, &def, cols.age as usize, &Value::Uint(28), true).unwrap();
    upsert_column(&mut pt, &def, name_ord, &Value::Str("carol"), true).unwrap();

    // type confusion is rejected
    assert_eq!(
        upsert_column(&mut pt, &def, email_ord, &Value::Uint(1), true),
        Err(Error::TypeMismatch)
    );

    let bytes = pt.take().as_bytes().to_vec();
    let row = TupleRo::new(&bytes).unwrap();
    assert_eq!(read_column(&def, email_ord, row).unwrap(), OwnedValue::String("c@example.com".into()));
    assert_eq!(read_column(&def, cols.age as usize, row).unwrap(), OwnedValue::Uint(28));
    put(&mut txn, &mut table, row, PutOp::Insert).unwrap();

    // null erases the field
    let mut pt = TupleRw::fetch(row, tuple::BUFFER_LIMIT, 0).unwrap();
    upsert_column(&mut pt, &def, name_ord, &Value::Null, true).unwrap();
    let bytes = pt.take().as_bytes().to_vec();
    assert_eq!(
        read_column(&def, name_ord, TupleRo::new(&bytes).unwrap()).err(),
        Some(Error::NoData)
    );
    txn.abort().unwrap();
}

// -------------------- in-place arithmetic --------------------

fn counter_table(db: &Database) -> (TableHandle, u16, u16) {
    let mut set = ColumnSet::new();
    set.add("id", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    set.add("hits", FieldType::Uint32, IndexType::NONE).unwrap();
    let mut txn = Txn::begin(db, Level::Schema).unwrap();
    txn.table_create("counters", &set).unwrap();
    let mut table = TableHandle::new("counters").unwrap();
    let id = ordinal_of(&mut txn, &mut table, "id");
    let hits = ordinal_of(&mut txn, &mut table, "hits");
    txn.commit().unwrap();
    (table, id, hits)
}

#[test]
fn inplace_saturated_ops() {
    let db = memdb();
    let (mut table, id, hits) = counter_table(&db);

    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    txn.refresh_table(&mut table).unwrap();
    let def = table.def().unwrap().clone();

    let mut pt = TupleRw::alloc(2, 32).unwrap();
    pt.insert_u64(id, 1).unwrap();
    pt.insert_u32(hits, 10).unwrap();

    column_inplace(&mut pt, &def, hits as usize, InplaceOp::SaturatedAdd, &Value::Uint(5)).unwrap();
    assert_eq!(pt.take().get_u32(hits), 15);

    column_inplace(&mut pt, &def, hits as usize, InplaceOp::SaturatedMul, &Value::Uint(u32::MAX as u64))
        .unwrap();
    assert_eq!(pt.take().get_u32(hits), u32::MAX); // clamped at the type max

    column_inplace(&mut pt, &def, hits as usize, InplaceOp::SaturatedSub, &Value::Uint(u32::MAX as u64))
        .unwrap();
    assert_eq!(pt.take().get_u32(hits), 0);

    // unchanged value reports NoData
    assert_eq!(
        column_inplace(&mut pt, &def, hits as usize, InplaceOp::Min, &Value::Uint(7)),
        Err(Error::NoData)
    );
    column_inplace(&mut pt, &def, hits as usize, InplaceOp::Max, &Value::Uint(7)).unwrap();
    assert_eq!(pt.take().get_u32(hits), 7);

    assert_eq!(
        column_inplace(&mut pt, &def, hits as usize, InplaceOp::SaturatedDiv, &Value::Uint(0)),
        Err(Error::BadValue)
    );
    txn.abort().unwrap();
}

#[test]
fn inplace_bes_smoothing() {
    let db = memdb();
    let (mut table, id, hits) = counter_table(&db);
    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    txn.refresh_table(&mut table).unwrap();
    let def = table.def().unwrap().clone();

    let mut pt = TupleRw::alloc(2, 32).unwrap();
    pt.insert_u64(id, 1).unwrap();
    pt.insert_u32(hits, 100).unwrap();

    // alpha = 0.5: 100 + 0.5 * (200 - 100) = 150
    column_inplace(
        &mut pt,
        &def,
        hits as usize,
        InplaceOp::Bes(BesFactor::Alpha(0.5)),
        &Value::Uint(200),
    )
    .unwrap();
    assert_eq!(pt.take().get_u32(hits), 150);

    // alpha = 2^-1 expressed as a shift
    column_inplace(
        &mut pt,
        &def,
        hits as usize,
        InplaceOp::Bes(BesFactor::Shift(-1)),
        &Value::Uint(250),
    )
    .unwrap();
    assert_eq!(pt.take().get_u32(hits), 200);

    // out-of-range factors are rejected
    assert_eq!(
        column_inplace(
            &mut pt,
            &def,
            hits as usize,
            InplaceOp::Bes(BesFactor::Alpha(1.0)),
            &Value::Uint(1),
        ),
        Err(Error::BadValue)
    );
    assert_eq!(
        column_inplace(
            &mut pt,
            &def,
            hits as usize,
            InplaceOp::Bes(BesFactor::Shift(-24)),
            &Value::Uint(1),
        ),
        Err(Error::BadValue)
    );
    txn.abort().unwrap();
}

// -------------------- filters (standalone) --------------------

#[test]
fn filter_and_combination() {
    let db = memdb();
    let mut set = ColumnSet::new();
    set.add("pk", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    set.add("col7", FieldType::Int64, IndexType::NONE).unwrap();
    set.add("col9", FieldType::Cstr, IndexType::NONE).unwrap();
    let mut txn = Txn::begin(&db, Level::Schema).unwrap();
    txn.table_create("filtered", &set).unwrap();

    let mut table = TableHandle::new("filtered").unwrap();
    let pk = ordinal_of(&mut txn, &mut table, "pk");
    let col7 = ordinal_of(&mut txn, &mut table, "col7");
    let col9 = ordinal_of(&mut txn, &mut table, "col9");

    let mut c7 = ColumnHandle::new(&table, "col7").unwrap();
    let mut c9 = ColumnHandle::new(&table, "col9").unwrap();
    txn.refresh_couple(&mut table, Some(&mut c7)).unwrap();
    txn.refresh_couple(&mut table, Some(&mut c9)).unwrap();

    let filter = Filter::And(
        Box::new(Filter::Cmp(CmpOp::Gt, c7, OwnedValue::Sint(5))),
        Box::new(Filter::Cmp(CmpOp::Eq, c9, OwnedValue::String("ab".into()))),
    );
    assert!(filter.validate());

    let build = |v7: i64, v9: &str| -> Vec<u8> {
        let mut pt = TupleRw::alloc(4, 64).unwrap();
        pt.insert_u64(pk, 1).unwrap();
        pt.insert_i64(col7, v7).unwrap();
        pt.insert_str(col9, v9).unwrap();
        pt.take().as_bytes().to_vec()
    };

    let hit = build(10, "ab");
    assert!(filter.matches(TupleRo::new(&hit).unwrap()));
    let miss_string = build(10, "ac");
    assert!(!filter.matches(TupleRo::new(&miss_string).unwrap()));
    let miss_number = build(5, "ab");
    assert!(!filter.matches(TupleRo::new(&miss_number).unwrap()));
    txn.abort().unwrap();
}
