use crate::*;

fn env_with(flags: DbiFlags) -> (Env, Dbi) {
    let env = Env::builder().open().unwrap();
    let mut txn = env.begin(TxnMode::Write).unwrap();
    let dbi = txn.open_dbi("t", flags | DbiFlags::CREATE).unwrap();
    txn.commit().unwrap();
    (env, dbi)
}

// -------------------- put flags --------------------

#[test]
fn no_overwrite_rejects_existing_key() {
    let (env, dbi) = env_with(DbiFlags::empty());
    let mut txn = env.begin(TxnMode::Write).unwrap();
    txn.put(dbi, b"k", b"1", PutFlags::empty()).unwrap();
    assert_eq!(
        txn.put(dbi, b"k", b"2", PutFlags::NO_OVERWRITE).err(),
        Some(StorageError::KeyExist)
    );
    txn.put(dbi, b"k", b"2", PutFlags::empty()).unwrap();
    assert_eq!(txn.get(dbi, b"k").unwrap(), b"2");
    txn.abort().unwrap();
}

#[test]
fn dup_flags() {
    let (env, dbi) = env_with(DbiFlags::DUP_SORT);
    let mut txn = env.begin(TxnMode::Write).unwrap();
    txn.put(dbi, b"k", b"a", PutFlags::NO_DUP_DATA).unwrap();
    txn.put(dbi, b"k", b"b", PutFlags::NO_DUP_DATA).unwrap();
    // exact pair again
    assert_eq!(
        txn.put(dbi, b"k", b"a", PutFlags::NO_DUP_DATA).err(),
        Some(StorageError::KeyExist)
    );
    // whole-key uniqueness
    assert_eq!(
        txn.put(dbi, b"k", b"c", PutFlags::NO_DUP_DATA | PutFlags::NO_OVERWRITE)
            .err(),
        Some(StorageError::KeyExist)
    );
    assert_eq!(txn.get_ex(dbi, b"k").unwrap(), (b"a".to_vec(), 2));
    txn.abort().unwrap();
}

// -------------------- delete --------------------

#[test]
fn del_with_data_matches_exactly() {
    let (env, dbi) = env_with(DbiFlags::empty());
    let mut txn = env.begin(TxnMode::Write).unwrap();
    txn.put(dbi, b"k", b"v", PutFlags::empty()).unwrap();
    assert_eq!(
        txn.del(dbi, b"k", Some(b"other")).err(),
        Some(StorageError::NotFound)
    );
    txn.del(dbi, b"k", Some(b"v")).unwrap();
    assert_eq!(txn.get(dbi, b"k").err(), Some(StorageError::NotFound));
    txn.abort().unwrap();
}

#[test]
fn del_single_dup_keeps_others() {
    let (env, dbi) = env_with(DbiFlags::DUP_SORT);
    let mut txn = env.begin(TxnMode::Write).unwrap();
    for value in [b"a", b"b", b"c"] {
        txn.put(dbi, b"k", value, PutFlags::empty()).unwrap();
    }
    txn.del(dbi, b"k", Some(b"b")).unwrap();
    assert_eq!(txn.get_ex(dbi, b"k").unwrap().1, 2);
    txn.del(dbi, b"k", None).unwrap();
    assert_eq!(txn.get(dbi, b"k").err(), Some(StorageError::NotFound));
    txn.abort().unwrap();
}

// -------------------- replace --------------------

#[test]
fn replace_returns_old_value() {
    let (env, dbi) = env_with(DbiFlags::empty());
    let mut txn = env.begin(TxnMode::Write).unwrap();
    assert_eq!(
        txn.replace(dbi, b"k", Some(b"1"), None, PutFlags::empty())
            .unwrap(),
        None
    );
    assert_eq!(
        txn.replace(dbi, b"k", Some(b"2"), None, PutFlags::empty())
            .unwrap(),
        Some(b"1".to_vec())
    );
    // CURRENT demands presence
    assert_eq!(
        txn.replace(dbi, b"absent", Some(b"x"), None, PutFlags::CURRENT)
            .err(),
        Some(StorageError::NotFound)
    );
    // NO_OVERWRITE refuses to replace
    assert_eq!(
        txn.replace(dbi, b"k", Some(b"3"), None, PutFlags::NO_OVERWRITE)
            .err(),
        Some(StorageError::KeyExist)
    );
    // delete-through-replace hands back the old value
    assert_eq!(
        txn.replace(dbi, b"k", None, None, PutFlags::CURRENT).unwrap(),
        Some(b"2".to_vec())
    );
    assert_eq!(txn.get(dbi, b"k").err(), Some(StorageError::NotFound));
    txn.abort().unwrap();
}

#[test]
fn replace_specific_duplicate() {
    let (env, dbi) = env_with(DbiFlags::DUP_SORT);
    let mut txn = env.begin(TxnMode::Write).unwrap();
    txn.put(dbi, b"k", b"old", PutFlags::empty()).unwrap();
    txn.put(dbi, b"k", b"other", PutFlags::empty()).unwrap();

    let prior = txn
        .replace(
            dbi,
            b"k",
            Some(b"new"),
            Some(b"old"),
            PutFlags::CURRENT | PutFlags::NO_DUP_DATA,
        )
        .unwrap();
    assert_eq!(prior, Some(b"old".to_vec()));
    assert_eq!(txn.get_ex(dbi, b"k").unwrap().1, 2);

    // the replaced duplicate is gone
    assert_eq!(
        txn.del(dbi, b"k", Some(b"old")).err(),
        Some(StorageError::NotFound)
    );
    txn.abort().unwrap();
}

// -------------------- sequences & maintenance --------------------

#[test]
fn sequences_are_get_and_add() {
    let (env, dbi) = env_with(DbiFlags::empty());
    let mut txn = env.begin(TxnMode::Write).unwrap();
    assert_eq!(txn.sequence(dbi, 0).unwrap(), 0);
    assert_eq!(txn.sequence(dbi, 5).unwrap(), 0);
    assert_eq!(txn.sequence(dbi, 1).unwrap(), 5);
    assert_eq!(txn.sequence(dbi, 0).unwrap(), 6);
    assert_eq!(
        txn.sequence(dbi, u64::MAX).err(),
        Some(StorageError::SequenceOverflow)
    );
    assert_eq!(txn.sequence(dbi, 0).unwrap(), 6);
    txn.commit().unwrap();

    let mut txn = env.begin(TxnMode::Read).unwrap();
    assert_eq!(txn.sequence(dbi, 0).unwrap(), 6);
    txn.commit().unwrap();
}

#[test]
fn clear_resets_contents_and_sequence() {
    let (env, dbi) = env_with(DbiFlags::empty());
    let mut txn = env.begin(TxnMode::Write).unwrap();
    txn.put(dbi, b"k", b"v", PutFlags::empty()).unwrap();
    txn.sequence(dbi, 9).unwrap();
    txn.clear_dbi(dbi).unwrap();
    assert_eq!(txn.get(dbi, b"k").err(), Some(StorageError::NotFound));
    assert_eq!(txn.sequence(dbi, 0).unwrap(), 0);
    txn.commit().unwrap();
}

#[test]
fn drop_dbi_removes_name_and_handle() {
    let (env, dbi) = env_with(DbiFlags::empty());
    let mut txn = env.begin(TxnMode::Write).unwrap();
    txn.drop_dbi(dbi).unwrap();
    assert_eq!(txn.get(dbi, b"k").err(), Some(StorageError::BadDbi));
    txn.commit().unwrap();

    let mut txn = env.begin(TxnMode::Write).unwrap();
    assert_eq!(
        txn.open_dbi("t", DbiFlags::empty()).err(),
        Some(StorageError::NotFound)
    );
    // recreation allocates a fresh handle; the old one stays dead
    let fresh = txn.open_dbi("t", DbiFlags::CREATE).unwrap();
    assert_ne!(fresh, dbi);
    assert_eq!(txn.get(dbi, b"k").err(), Some(StorageError::BadDbi));
    txn.commit().unwrap();
}

// -------------------- comparators & estimates --------------------

#[test]
fn integer_keys_order_numerically() {
    let (env, dbi) = env_with(DbiFlags::INTEGER_KEY);
    let mut txn = env.begin(TxnMode::Write).unwrap();
    // 0x0100 = 256 > 0x00FF = 255, although memcmp of LE bytes says otherwise
    txn.put(dbi, &255u32.to_le_bytes(), b"small", PutFlags::empty())
        .unwrap();
    txn.put(dbi, &256u32.to_le_bytes(), b"big", PutFlags::empty())
        .unwrap();

    let mut cursor = Cursor::new(dbi);
    let (first, value) = cursor.get(&txn, None, None, CursorOp::First).unwrap();
    assert_eq!(first, 255u32.to_le_bytes());
    assert_eq!(value, b"small");
    assert_eq!(
        txn.cmp(dbi, &255u32.to_le_bytes(), &256u32.to_le_bytes())
            .unwrap(),
        std::cmp::Ordering::Less
    );
    txn.abort().unwrap();
}

#[test]
fn reverse_keys_compare_from_tail() {
    let (env, dbi) = env_with(DbiFlags::REVERSE_KEY);
    let mut txn = env.begin(TxnMode::Write).unwrap();
    txn.put(dbi, b"za", b"1", PutFlags::empty()).unwrap();
    txn.put(dbi, b"ab", b"2", PutFlags::empty()).unwrap();
    // compared from the tail: "za" (…a) < "ab" (…b)
    let mut cursor = Cursor::new(dbi);
    let (first, _) = cursor.get(&txn, None, None, CursorOp::First).unwrap();
    assert_eq!(first, b"za");
    txn.abort().unwrap();
}

#[test]
fn estimate_range_counts() {
    let (env, dbi) = env_with(DbiFlags::DUP_SORT);
    let mut txn = env.begin(TxnMode::Write).unwrap();
    for key in [b"a", b"b", b"c", b"d"] {
        txn.put(dbi, key, b"1", PutFlags::empty()).unwrap();
    }
    txn.put(dbi, b"b", b"2", PutFlags::empty()).unwrap();

    assert_eq!(txn.estimate_range(dbi, None, None).unwrap(), 5);
    assert_eq!(txn.estimate_range(dbi, Some(b"b"), Some(b"d")).unwrap(), 3);
    assert_eq!(txn.estimate_range(dbi, Some(b"b"), Some(b"b")).unwrap(), 2);
    assert_eq!(txn.estimate_range(dbi, Some(b"x"), Some(b"z")).unwrap(), 0);
    // inverted ranges estimate their mirror
    assert_eq!(txn.estimate_range(dbi, Some(b"d"), Some(b"b")).unwrap(), 3);
    txn.abort().unwrap();
}

#[test]
fn stat_reports_entries_and_mod_txnid() {
    let (env, dbi) = env_with(DbiFlags::empty());
    let mut txn = env.begin(TxnMode::Write).unwrap();
    txn.put(dbi, b"k", b"v", PutFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin(TxnMode::Read).unwrap();
    let stat = txn.stat(dbi).unwrap();
    assert_eq!(stat.entries, 1);
    assert_eq!(stat.mod_txnid, 2);
    assert_eq!(stat.page_size, 4096);
    assert!(stat.depth >= 1);
    txn.commit().unwrap();
}
