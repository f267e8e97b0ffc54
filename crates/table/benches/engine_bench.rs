//! Write/read/scan throughput over an in-memory database.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use table::*;

fn bench_db() -> (Database, TableHandle, u16, u16) {
    let db = Database::open(
        None,
        Durability::Weak,
        RegimeFlags::empty(),
        true,
        Geometry::default(),
    )
    .unwrap();

    let mut set = ColumnSet::new();
    set.add("id", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    set.add(
        "tag",
        FieldType::Uint32,
        IndexType::SECONDARY_WITHDUPS_ORDERED_OBVERSE,
    )
    .unwrap();

    let mut txn = Txn::begin(&db, Level::Schema).unwrap();
    txn.table_create("bench", &set).unwrap();
    let mut table = TableHandle::new("bench").unwrap();
    let mut id = ColumnHandle::new(&table, "id").unwrap();
    let mut tag = ColumnHandle::new(&table, "tag").unwrap();
    txn.refresh_couple(&mut table, Some(&mut id)).unwrap();
    txn.refresh_couple(&mut table, Some(&mut tag)).unwrap();
    let id = id.ordinal().unwrap() as u16;
    let tag = tag.ordinal().unwrap() as u16;
    txn.commit().unwrap();
    (db, table, id, tag)
}

fn row_bytes(id_col: u16, tag_col: u16, id: u64) -> Vec<u8> {
    let mut pt = TupleRw::alloc(2, 32).unwrap();
    pt.insert_u64(id_col, id).unwrap();
    pt.insert_u32(tag_col, (id % 16) as u32).unwrap();
    pt.take().as_bytes().to_vec()
}

fn bench_tuple_build(c: &mut Criterion) {
    c.bench_function("tuple_build_take", |b| {
        b.iter(|| {
            let mut pt = TupleRw::alloc(4, 64).unwrap();
            pt.insert_u64(0, black_box(42)).unwrap();
            pt.insert_str(1, black_box("some payload")).unwrap();
            pt.insert_u32(2, black_box(7)).unwrap();
            black_box(pt.take().total_bytes())
        })
    });
}

fn bench_key_derivation(c: &mut Criterion) {
    let shove = Shove::column(
        schema::name_to_shove("k").unwrap(),
        FieldType::Cstr,
        IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE,
    );
    let long = "x".repeat(200);
    c.bench_function("value_to_key_long_string", |b| {
        b.iter(|| value_to_key(shove, &Value::Str(black_box(&long))).unwrap())
    });
}

fn bench_put(c: &mut Criterion) {
    c.bench_function("put_insert_1k", |b| {
        b.iter(|| {
            let (db, mut table, id_col, tag_col) = bench_db();
            let mut txn = Txn::begin(&db, Level::Write).unwrap();
            for id in 0..1000u64 {
                let bytes = row_bytes(id_col, tag_col, id);
                put(&mut txn, &mut table, TupleRo::new(&bytes).unwrap(), PutOp::Insert).unwrap();
            }
            txn.commit().unwrap();
        })
    });
}

fn bench_scan(c: &mut Criterion) {
    let (db, mut table, id_col, tag_col) = bench_db();
    let mut txn = Txn::begin(&db, Level::Write).unwrap();
    for id in 0..1000u64 {
        let bytes = row_bytes(id_col, tag_col, id);
        put(&mut txn, &mut table, TupleRo::new(&bytes).unwrap(), PutOp::Insert).unwrap();
    }
    txn.commit().unwrap();

    c.bench_function("scan_secondary_1k", |b| {
        b.iter(|| {
            let mut txn = Txn::begin(&db, Level::Read).unwrap();
            let mut tag = ColumnHandle::new(&table, "tag").unwrap();
            let mut cursor = Cursor::open(
                &mut txn,
                &mut table,
                &mut tag,
                Value::Begin,
                Value::End,
                None,
                CursorOptions::ASCENDING,
            )
            .unwrap();
            let mut rows = 0u64;
            while cursor.state().is_ok() {
                rows += 1;
                if cursor.seek_move(&mut txn, SeekOp::Next).is_err() {
                    break;
                }
            }
            txn.commit().unwrap();
            black_box(rows)
        })
    });
}

criterion_group!(
    benches,
    bench_tuple_build,
    bench_key_derivation,
    bench_put,
    bench_scan
);
criterion_main!(benches);
