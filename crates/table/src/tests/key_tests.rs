use super::helpers::*;
use crate::key::*;
use crate::*;
use schema::{name_to_shove, Shove};

fn shove_with(ty: FieldType, index: IndexType) -> Shove {
    Shove::column(name_to_shove("k").unwrap(), ty, index)
}

fn unsigned_cmp(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.iter().rev().cmp(b.iter().rev()))
}

// -------------------- monotonicity --------------------

#[test]
fn signed_keys_are_monotone() {
    let samples = [i64::MIN, -1_000_000, -1, 0, 1, 42, i64::MAX];
    for window in samples.windows(2) {
        assert!(key_from_i64(window[0]) < key_from_i64(window[1]));
        assert_eq!(i64_from_key(key_from_i64(window[0])), window[0]);
    }
    let samples = [i32::MIN, -7, 0, 9, i32::MAX];
    for window in samples.windows(2) {
        assert!(key_from_i32(window[0]) < key_from_i32(window[1]));
        assert_eq!(i32_from_key(key_from_i32(window[0])), window[0]);
    }
}

#[test]
fn float_keys_are_monotone() {
    let samples = [
        f64::NEG_INFINITY,
        -1.0e300,
        -2.5,
        -1.0,
        -f64::MIN_POSITIVE,
        0.0,
        f64::MIN_POSITIVE,
        1.0,
        2.5,
        1.0e300,
        f64::INFINITY,
    ];
    for window in samples.windows(2) {
        assert!(
            key_from_f64(window[0]) < key_from_f64(window[1]),
            "{} !< {}",
            window[0],
            window[1]
        );
        assert_eq!(f64_from_key(key_from_f64(window[0])).to_bits(), window[0].to_bits());
    }
    // the canonical DENIL float sits below every real value
    assert_eq!(key_from_f64(tuple::denil::fp64()), 0);
    assert_eq!(key_from_f32(tuple::denil::fp32()), 0);
}

#[test]
fn value_keys_are_monotone_per_type() {
    let shove = shove_with(FieldType::Int64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE);
    let a = value_to_key(shove, &Value::Sint(-5)).unwrap();
    let b = value_to_key(shove, &Value::Sint(7)).unwrap();
    assert_eq!(unsigned_cmp(a.as_slice(), b.as_slice()), std::cmp::Ordering::Less);

    let shove = shove_with(FieldType::Cstr, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE);
    let a = value_to_key(shove, &Value::Str("abc")).unwrap();
    let b = value_to_key(shove, &Value::Str("abd")).unwrap();
    assert!(a.bytes < b.bytes);
}

// -------------------- rejection rules --------------------

#[test]
fn nan_and_oversize_rejected() {
    let fp = shove_with(FieldType::Fp64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE);
    assert_eq!(value_to_key(fp, &Value::Float(f64::NAN)), Err(Error::BadValue));

    let fp32 = shove_with(FieldType::Fp32, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE);
    assert_eq!(value_to_key(fp32, &Value::Float(1.0e300)), Err(Error::BadValue));
    assert!(value_to_key(fp32, &Value::Float(f64::INFINITY)).is_ok());

    let u16col = shove_with(FieldType::Uint16, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE);
    assert_eq!(value_to_key(u16col, &Value::Uint(0x10000)), Err(Error::BadValue));
    assert_eq!(value_to_key(u16col, &Value::Sint(-1)), Err(Error::BadValue));

    let b128 = shove_with(FieldType::B128, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE);
    assert_eq!(
        value_to_key(b128, &Value::Binary(&[0; 12])),
        Err(Error::DataLenMismatch)
    );

    assert_eq!(
        value_to_key(u16col, &Value::Str("nope")),
        Err(Error::TypeMismatch)
    );
    assert_eq!(value_to_key(u16col, &Value::Begin), Err(Error::TypeMismatch));
    // null against a non-nullable index
    assert_eq!(value_to_key(u16col, &Value::Null), Err(Error::TypeMismatch));
}

#[test]
fn zero_and_negative_zero_collapse() {
    let fp = shove_with(FieldType::Fp64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE);
    let pos = value_to_key(fp, &Value::Float(0.0)).unwrap();
    let neg = value_to_key(fp, &Value::Float(-0.0)).unwrap();
    assert_eq!(pos, neg);
}

// -------------------- truncation --------------------

#[test]
fn short_keys_are_verbatim() {
    let shove = shove_with(FieldType::Cstr, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE);
    let value = "x".repeat(MAX_KEYLEN);
    let key = value_to_key(shove, &Value::Str(&value)).unwrap();
    assert_eq!(key.bytes, value.as_bytes());
}

#[test]
fn long_keys_truncate_with_tail_hash() {
    let shove = shove_with(FieldType::Cstr, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE);
    let a = format!("{}{}", "p".repeat(MAX_KEYLEN), "tail-one");
    let b = format!("{}{}", "p".repeat(MAX_KEYLEN), "tail-two");
    let ka = value_to_key(shove, &Value::Str(&a)).unwrap();
    let kb = value_to_key(shove, &Value::Str(&b)).unwrap();
    assert_eq!(ka.bytes.len(), SHOVED_KEYLEN);
    assert_eq!(kb.bytes.len(), SHOVED_KEYLEN);
    assert_eq!(ka.bytes[..MAX_KEYLEN], kb.bytes[..MAX_KEYLEN]);
    assert_ne!(ka.bytes, kb.bytes);

    // the decoded form is the raw comparison key
    match key_to_value(shove, ka.as_slice()).unwrap() {
        OwnedValue::Shoved(bytes) => assert_eq!(bytes, ka.bytes),
        other => panic!("expected shoved, got {:?}", other),
    }
}

#[test]
fn reverse_truncation_keeps_the_tail() {
    let shove = shove_with(FieldType::Cstr, IndexType::PRIMARY_UNIQUE_ORDERED_REVERSE);
    let a = format!("{}{}", "head-one", "s".repeat(MAX_KEYLEN));
    let b = format!("{}{}", "head-two", "s".repeat(MAX_KEYLEN));
    let ka = value_to_key(shove, &Value::Str(&a)).unwrap();
    let kb = value_to_key(shove, &Value::Str(&b)).unwrap();
    assert_eq!(ka.bytes[8..], kb.bytes[8..]); // shared retained suffix
    assert_ne!(ka.bytes[..8], kb.bytes[..8]); // distinct head hashes
}

// -------------------- unordered --------------------

#[test]
fn unordered_keys_are_hashes() {
    let shove = shove_with(FieldType::Cstr, IndexType::SECONDARY_UNIQUE_UNORDERED);
    let short = value_to_key(shove, &Value::Str("ab")).unwrap();
    let long = value_to_key(shove, &Value::Str(&"ab".repeat(100))).unwrap();
    assert_eq!(short.bytes.len(), 8);
    assert_eq!(long.bytes.len(), 8);
    assert_ne!(short.bytes, long.bytes);
    assert_eq!(
        short.bytes,
        t1ha::t1ha2_atonce(b"ab", 2018).to_le_bytes()
    );
}

// -------------------- DENIL --------------------

#[test]
fn denil_sorts_at_the_right_end() {
    // obverse: NIL below every real value
    let shove = shove_with(
        FieldType::Uint32,
        IndexType::SECONDARY_WITHDUPS_ORDERED_OBVERSE_NULLABLE,
    );
    let nil = denil_key(shove).unwrap();
    let real = value_to_key(shove, &Value::Uint(1)).unwrap();
    assert_eq!(unsigned_cmp(nil.as_slice(), real.as_slice()), std::cmp::Ordering::Less);
    assert_eq!(key_to_value(shove, nil.as_slice()).unwrap(), OwnedValue::Null);

    // reverse: NIL above every real value
    let shove = shove_with(
        FieldType::Uint32,
        IndexType::SECONDARY_WITHDUPS_ORDERED_REVERSE_NULLABLE,
    );
    let nil = denil_key(shove).unwrap();
    let real = value_to_key(shove, &Value::Uint((u32::MAX - 1) as u64)).unwrap();
    assert_eq!(
        unsigned_cmp(nil.as_slice(), real.as_slice()),
        std::cmp::Ordering::Greater
    );
}

#[test]
fn nullable_strings_get_the_notnil_prefix() {
    let shove = shove_with(
        FieldType::Cstr,
        IndexType::SECONDARY_WITHDUPS_ORDERED_OBVERSE_NULLABLE,
    );
    let nil = denil_key(shove).unwrap();
    assert!(nil.bytes.is_empty());
    let real = value_to_key(shove, &Value::Str("a")).unwrap();
    assert_eq!(real.bytes, vec![NOTNIL_PREFIX, b'a']);
    // the empty string is distinct from NIL
    let empty = value_to_key(shove, &Value::Str("")).unwrap();
    assert_eq!(empty.bytes, vec![NOTNIL_PREFIX]);
    assert_eq!(
        key_to_value(shove, empty.as_slice()).unwrap(),
        OwnedValue::String(String::new())
    );
    assert_eq!(key_to_value(shove, &[]).unwrap(), OwnedValue::Null);
}

#[test]
fn null_value_yields_denil_key() {
    let shove = shove_with(
        FieldType::Int64,
        IndexType::SECONDARY_WITHDUPS_ORDERED_OBVERSE_NULLABLE,
    );
    let from_null = value_to_key(shove, &Value::Null).unwrap();
    assert_eq!(from_null, denil_key(shove).unwrap());
    // the DENIL bit pattern round-trips back to Null
    assert_eq!(
        key_to_value(shove, from_null.as_slice()).unwrap(),
        OwnedValue::Null
    );
}

// -------------------- key <-> value round trips --------------------

#[test]
fn key_round_trips() {
    let cases: Vec<(Shove, Value<'_>)> = vec![
        (
            shove_with(FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE),
            Value::Uint(0xDEAD_BEEF),
        ),
        (
            shove_with(FieldType::Int32, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE),
            Value::Sint(-42),
        ),
        (
            shove_with(FieldType::Fp64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE),
            Value::Float(-2.75),
        ),
        (
            shove_with(FieldType::Datetime, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE),
            Value::Datetime(DateTime::from_parts(1_600_000_000, 77)),
        ),
        (
            shove_with(FieldType::Cstr, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE),
            Value::Str("round trip"),
        ),
    ];
    for (shove, value) in cases {
        let key = value_to_key(shove, &value).unwrap();
        let back = key_to_value(shove, key.as_slice()).unwrap();
        assert_eq!(back.as_value(), value, "shove {:?}", shove);
    }
}

// -------------------- composites --------------------

#[test]
fn composite_keys_distinguish_member_order() {
    let db = memdb();
    let mut set = ColumnSet::new();
    set.add("id", FieldType::Uint64, IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE)
        .unwrap();
    set.add("first", FieldType::Cstr, IndexType::NONE).unwrap();
    set.add("last", FieldType::Cstr, IndexType::NONE).unwrap();
    set.add_composite(
        "full",
        IndexType::SECONDARY_WITHDUPS_ORDERED_OBVERSE,
        &["first", "last"],
    )
    .unwrap();

    let mut txn = Txn::begin(&db, Level::Schema).unwrap();
    txn.table_create("people", &set).unwrap();
    let mut table = TableHandle::new("people").unwrap();
    txn.refresh_table(&mut table).unwrap();
    let def = table.def().unwrap().clone();

    let id = ordinal_of(&mut txn, &mut table, "id");
    let first = ordinal_of(&mut txn, &mut table, "first");
    let last = ordinal_of(&mut txn, &mut table, "last");
    let full = ordinal_of(&mut txn, &mut table, "full") as usize;

    let build = |a: &str, b: &str| -> Vec<u8> {
        let mut pt = TupleRw::alloc(4, 64).unwrap();
        pt.insert_u64(id, 1).unwrap();
        pt.insert_str(first, a).unwrap();
        pt.insert_str(last, b).unwrap();
        pt.take().as_bytes().to_vec()
    };

    let ab = build("ann", "berg");
    let ba = build("berg", "ann");
    let row_ab = TupleRo::new(&ab).unwrap();
    let row_ba = TupleRo::new(&ba).unwrap();

    let key_ab = row_to_key(&def.schema, full, row_ab).unwrap();
    let key_ba = row_to_key(&def.schema, full, row_ba).unwrap();
    assert_ne!(key_ab, key_ba);

    // a missing non-nullable member is an error
    let mut pt = TupleRw::alloc(4, 64).unwrap();
    pt.insert_u64(id, 2).unwrap();
    pt.insert_str(first, "solo").unwrap();
    let partial = pt.take().as_bytes().to_vec();
    assert_eq!(
        row_to_key(&def.schema, full, TupleRo::new(&partial).unwrap()),
        Err(Error::ColumnMissing)
    );
    txn.abort().unwrap();
}
