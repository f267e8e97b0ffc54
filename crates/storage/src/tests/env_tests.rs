use crate::*;

fn mem_env() -> Env {
    Env::builder().open().unwrap()
}

#[test]
fn create_and_reopen_dbi() {
    let env = mem_env();
    let mut txn = env.begin(TxnMode::Write).unwrap();
    let dbi = txn
        .open_dbi("alpha", DbiFlags::CREATE | DbiFlags::DUP_SORT)
        .unwrap();
    txn.put(dbi, b"k", b"v", PutFlags::empty()).unwrap();
    txn.commit().unwrap();

    let mut txn = env.begin(TxnMode::Read).unwrap();
    let dbi = txn.open_dbi("alpha", DbiFlags::DUP_SORT).unwrap();
    assert_eq!(txn.get(dbi, b"k").unwrap(), b"v");
    // different flags on an existing dbi are rejected
    assert_eq!(
        txn.open_dbi("alpha", DbiFlags::empty()).err(),
        Some(StorageError::Incompatible)
    );
    assert_eq!(
        txn.open_dbi("missing", DbiFlags::empty()).err(),
        Some(StorageError::NotFound)
    );
    txn.commit().unwrap();
}

#[test]
fn abort_discards_created_dbis() {
    let env = mem_env();
    let mut txn = env.begin(TxnMode::Write).unwrap();
    let dbi = txn.open_dbi("ghost", DbiFlags::CREATE).unwrap();
    assert!(txn.dbi_created_here(dbi));
    txn.put(dbi, b"k", b"v", PutFlags::empty()).unwrap();
    txn.abort().unwrap();

    let mut txn = env.begin(TxnMode::Read).unwrap();
    assert_eq!(
        txn.open_dbi("ghost", DbiFlags::empty()).err(),
        Some(StorageError::NotFound)
    );
    txn.commit().unwrap();
}

#[test]
fn snapshot_isolation() {
    let env = mem_env();
    let mut w = env.begin(TxnMode::Write).unwrap();
    let dbi = w.open_dbi("iso", DbiFlags::CREATE).unwrap();
    w.put(dbi, b"a", b"1", PutFlags::empty()).unwrap();
    w.commit().unwrap();

    let mut reader = env.begin(TxnMode::Read).unwrap();
    let rdbi = reader.open_dbi("iso", DbiFlags::empty()).unwrap();
    assert_eq!(reader.get(rdbi, b"a").unwrap(), b"1");

    // a later commit is invisible to the pinned snapshot
    let mut w = env.begin(TxnMode::Write).unwrap();
    let wdbi = w.open_dbi("iso", DbiFlags::empty()).unwrap();
    w.put(wdbi, b"a", b"2", PutFlags::empty()).unwrap();
    w.commit().unwrap();

    assert_eq!(reader.get(rdbi, b"a").unwrap(), b"1");
    assert_eq!(reader.info().txn_reader_lag, 1);

    // restart rolls the snapshot forward, preserving the txn object
    reader.restart().unwrap();
    assert_eq!(reader.get(rdbi, b"a").unwrap(), b"2");
    assert_eq!(reader.info().txn_reader_lag, 0);
    reader.commit().unwrap();
}

#[test]
fn writer_sees_own_changes_before_commit() {
    let env = mem_env();
    let mut txn = env.begin(TxnMode::Write).unwrap();
    let dbi = txn.open_dbi("own", DbiFlags::CREATE).unwrap();
    txn.put(dbi, b"x", b"y", PutFlags::empty()).unwrap();
    assert_eq!(txn.get(dbi, b"x").unwrap(), b"y");
    txn.abort().unwrap();
}

#[test]
fn wal_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.log");

    {
        let env = Env::builder()
            .path(&path)
            .durability(Durability::Sync)
            .open()
            .unwrap();
        let mut txn = env.begin(TxnMode::Write).unwrap();
        let dbi = txn
            .open_dbi("persist", DbiFlags::CREATE | DbiFlags::DUP_SORT)
            .unwrap();
        txn.put(dbi, b"k1", b"a", PutFlags::empty()).unwrap();
        txn.put(dbi, b"k1", b"b", PutFlags::empty()).unwrap();
        txn.put(dbi, b"k2", b"c", PutFlags::empty()).unwrap();
        txn.sequence(dbi, 5).unwrap();
        txn.commit().unwrap();

        let mut txn = env.begin(TxnMode::Write).unwrap();
        let dbi = txn.open_dbi("persist", DbiFlags::DUP_SORT).unwrap();
        txn.del(dbi, b"k1", Some(b"a")).unwrap();
        txn.commit().unwrap();
    }

    let env = Env::builder().path(&path).open().unwrap();
    let mut txn = env.begin(TxnMode::Read).unwrap();
    let dbi = txn.open_dbi("persist", DbiFlags::DUP_SORT).unwrap();
    assert_eq!(txn.get(dbi, b"k1").unwrap(), b"b");
    assert_eq!(txn.get(dbi, b"k2").unwrap(), b"c");
    assert_eq!(txn.get_ex(dbi, b"k1").unwrap().1, 1);
    assert_eq!(txn.sequence(dbi, 0).unwrap(), 5);
    assert_eq!(env.recent_txnid(), 2);
    txn.commit().unwrap();
}

#[test]
fn truncated_wal_tail_is_clean_eof() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.log");

    {
        let env = Env::builder().path(&path).open().unwrap();
        let mut txn = env.begin(TxnMode::Write).unwrap();
        let dbi = txn.open_dbi("t", DbiFlags::CREATE).unwrap();
        txn.put(dbi, b"k", b"v", PutFlags::empty()).unwrap();
        txn.commit().unwrap();
        env.sync().unwrap();
    }

    // chop a few bytes off the end, as a crash mid-append would
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    let env = Env::builder().path(&path).open().unwrap();
    let mut txn = env.begin(TxnMode::Read).unwrap();
    // the truncated frame is gone entirely; the log before it is intact
    assert_eq!(
        txn.open_dbi("t", DbiFlags::empty()).err(),
        Some(StorageError::NotFound)
    );
    txn.commit().unwrap();
}

#[test]
fn readonly_env_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.log");
    {
        let env = Env::builder().path(&path).open().unwrap();
        let mut txn = env.begin(TxnMode::Write).unwrap();
        txn.open_dbi("t", DbiFlags::CREATE).unwrap();
        txn.commit().unwrap();
        env.sync().unwrap();
    }
    let env = Env::builder()
        .path(&path)
        .durability(Durability::ReadOnly)
        .open()
        .unwrap();
    assert_eq!(env.begin(TxnMode::Write).err(), Some(StorageError::Perm));
    let mut txn = env.begin(TxnMode::Read).unwrap();
    assert!(txn.open_dbi("t", DbiFlags::empty()).is_ok());
    txn.commit().unwrap();
}

#[test]
fn db_full_rejects_commit() {
    let env = Env::builder()
        .geometry(Geometry {
            size_upper: 256,
            ..Geometry::default()
        })
        .open()
        .unwrap();
    let mut txn = env.begin(TxnMode::Write).unwrap();
    let dbi = txn.open_dbi("fat", DbiFlags::CREATE).unwrap();
    txn.put(dbi, b"key", &[0u8; 1024], PutFlags::empty()).unwrap();
    assert_eq!(txn.commit().err(), Some(StorageError::DbFull));
}

#[test]
fn env_info_reports_readers() {
    let env = mem_env();
    let info = env.info();
    assert_eq!(info.num_readers, 0);
    assert_eq!(info.recent_txnid, 0);

    let reader = env.begin(TxnMode::Read).unwrap();
    assert_eq!(env.info().num_readers, 1);
    reader.commit().unwrap();
    assert_eq!(env.info().num_readers, 0);
}
