use crate::*;

/// Fresh in-memory database with an alterable schema.
pub fn memdb() -> Database {
    Database::open(
        None,
        Durability::Weak,
        RegimeFlags::empty(),
        true,
        Geometry::default(),
    )
    .unwrap()
}

/// `users`: pk `id` (uint64, unique ordered), `email` (cstr, unique
/// ordered secondary), `age` (uint16, withdups ordered secondary),
/// `name` (cstr, not indexed, nullable).
pub fn create_users(db: &Database) {
    let mut set = ColumnSet::new();
    set.add("id", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    set.add(
        "email",
        FieldType::Cstr,
        IndexType::SECONDARY_UNIQUE_ORDERED_OBVERSE,
    )
    .unwrap();
    set.add(
        "age",
        FieldType::Uint16,
        IndexType::SECONDARY_WITHDUPS_ORDERED_OBVERSE,
    )
    .unwrap();
    set.add("name", FieldType::Cstr, IndexType::NONE_NULLABLE).unwrap();

    let mut txn = Txn::begin(db, Level::Schema).unwrap();
    txn.table_create("users", &set).unwrap();
    txn.commit().unwrap();
}

/// Resolved column ordinal, as a tuple column tag.
pub fn ordinal_of(txn: &mut Txn, table: &mut TableHandle, name: &str) -> u16 {
    let mut column = ColumnHandle::new(table, name).unwrap();
    txn.refresh_couple(table, Some(&mut column)).unwrap();
    column.ordinal().unwrap() as u16
}

pub struct UserCols {
    pub id: u16,
    pub email: u16,
    pub age: u16,
    pub name: u16,
}

pub fn user_cols(txn: &mut Txn, table: &mut TableHandle) -> UserCols {
    UserCols {
        id: ordinal_of(txn, table, "id"),
        email: ordinal_of(txn, table, "email"),
        age: ordinal_of(txn, table, "age"),
        name: ordinal_of(txn, table, "name"),
    }
}

pub fn user_row(cols: &UserCols, id: u64, email: &str, age: u16, name: Option<&str>) -> Vec<u8> {
    let mut pt = TupleRw::alloc(8, 256).unwrap();
    pt.insert_u64(cols.id, id).unwrap();
    pt.insert_str(cols.email, email).unwrap();
    pt.insert_u16(cols.age, age).unwrap();
    if let Some(name) = name {
        pt.insert_str(cols.name, name).unwrap();
    }
    pt.take().as_bytes().to_vec()
}

pub fn insert_user(
    txn: &mut Txn,
    table: &mut TableHandle,
    cols: &UserCols,
    id: u64,
    email: &str,
    age: u16,
) {
    let row = user_row(cols, id, email, age, None);
    put(txn, table, TupleRo::new(&row).unwrap(), PutOp::Insert).unwrap();
}

/// `points`: a single-column table with pk `c` (uint64, unique ordered).
pub fn create_points(db: &Database, keys: &[u64]) -> (TableHandle, u16) {
    let mut set = ColumnSet::new();
    set.add("c", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    set.add("payload", FieldType::Cstr, IndexType::NONE_NULLABLE).unwrap();

    let mut txn = Txn::begin(db, Level::Schema).unwrap();
    txn.table_create("points", &set).unwrap();
    let mut table = TableHandle::new("points").unwrap();
    let c = ordinal_of(&mut txn, &mut table, "c");
    for key in keys {
        let mut pt = TupleRw::alloc(2, 32).unwrap();
        pt.insert_u64(c, *key).unwrap();
        let bytes = pt.take().as_bytes().to_vec();
        put(&mut txn, &mut table, TupleRo::new(&bytes).unwrap(), PutOp::Insert).unwrap();
    }
    txn.commit().unwrap();
    (table, c)
}

/// Walks a cursor from its current position, decoding every landed key as
/// an unsigned integer.
pub fn collect_uints(cursor: &mut Cursor, txn: &mut Txn) -> Vec<u64> {
    let mut keys = Vec::new();
    let mut state = cursor.state();
    while state.is_ok() {
        match cursor.key().unwrap() {
            OwnedValue::Uint(v) => keys.push(v),
            other => panic!("unexpected key {:?}", other),
        }
        state = cursor.seek_move(txn, SeekOp::Next);
    }
    keys
}
