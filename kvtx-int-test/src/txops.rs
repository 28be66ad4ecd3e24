//! Transaction and snapshot lifecycle semantics.

use crate::test_util::{collect, keys_of};
use kvtx::engine::StorageEngine;
use kvtx::errors::{ErrorKind, KvError, KvResult};
use kvtx::{KvDatabase, TransactionState};
use std::collections::HashSet;

/// Runs every lifecycle check against `db`, which must be empty.
///
/// Never holds two read-write transactions at once on the calling thread,
/// so it is safe for engines that serialize writers.
pub fn run_tx_ops<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    committed_transaction_is_done(db)?;
    discarded_transaction_is_done(db)?;
    dropped_transaction_rolls_back(db)?;
    snapshot_lifecycle(db)?;
    snapshot_isolation(db)?;
    reads_own_writes_in_scans(db)?;
    update_and_view(db)?;
    identifiers_are_unique(db)?;
    Ok(())
}

fn assert_done<T: std::fmt::Debug>(result: KvResult<T>) {
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyDone, "unexpected error {:?}", err);
}

fn committed_transaction_is_done<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let mut tx = db.new_transaction()?;
    assert_eq!(tx.state(), TransactionState::Active);
    assert!(!tx.is_read_only());
    tx.set("tx/committed", &b"1"[..])?;
    tx.commit()?;
    assert_eq!(tx.state(), TransactionState::Committed);

    assert_done(tx.get("tx/committed"));
    assert_done(tx.set("tx/committed", &b"2"[..]));
    assert_done(tx.delete("tx/committed"));
    assert_done(tx.scan().map(|_| ()));
    assert_done(tx.ascend("a", "z").map(|_| ()));
    assert_done(tx.descend("a", "z").map(|_| ()));
    assert_done(tx.commit());
    assert_done(tx.discard());
    assert_done(tx.rollback());

    // lifecycle is checked before the key
    assert_done(tx.get(""));
    drop(tx);

    assert_eq!(db.view(|s| s.get("tx/committed"))?, b"1");
    Ok(())
}

fn discarded_transaction_is_done<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let mut tx = db.new_transaction()?;
    tx.set("tx/discarded", &b"1"[..])?;
    tx.rollback()?;
    assert_eq!(tx.state(), TransactionState::Discarded);
    assert!(!tx.is_active());

    assert_done(tx.get("tx/discarded"));
    assert_done(tx.commit());
    assert_done(tx.discard());
    drop(tx);

    let err = db.view(|s| s.get("tx/discarded")).unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

fn dropped_transaction_rolls_back<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    {
        let mut tx = db.new_transaction()?;
        tx.set("tx/dropped", &b"1"[..])?;
    }

    let err = db.view(|s| s.get("tx/dropped")).unwrap_err();
    assert!(err.is_not_found());

    // the writer was released on drop
    db.update(|tx| tx.set("tx/after-drop", &b"1"[..]))?;
    Ok(())
}

fn snapshot_lifecycle<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let mut snapshot = db.new_snapshot()?;
    assert!(snapshot.is_active());
    snapshot.discard()?;
    assert_eq!(snapshot.state(), TransactionState::Discarded);

    assert_done(snapshot.get("tx/committed"));
    assert_done(snapshot.scan().map(|_| ()));
    assert_done(snapshot.discard());
    assert_done(snapshot.rollback());
    Ok(())
}

fn snapshot_isolation<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    db.update(|tx| tx.set("tx/isolated", &b"before"[..]))?;

    let snapshot = db.new_snapshot()?;
    db.update(|tx| {
        tx.set("tx/isolated", &b"after"[..])?;
        tx.set("tx/isolated-new", &b"new"[..])
    })?;

    assert_eq!(snapshot.get("tx/isolated")?, b"before");
    assert!(snapshot.get("tx/isolated-new").unwrap_err().is_not_found());
    let seen = collect(snapshot.ascend("tx/isolated", "tx/isolatee")?)?;
    assert_eq!(keys_of(&seen), vec!["tx/isolated"]);
    drop(snapshot);

    assert_eq!(db.view(|s| s.get("tx/isolated"))?, b"after");
    Ok(())
}

fn reads_own_writes_in_scans<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    db.update(|tx| {
        tx.set("own/a", &b"1"[..])?;
        tx.set("own/c", &b"3"[..])
    })?;

    let mut tx = db.new_transaction()?;
    tx.set("own/b", &b"2"[..])?;
    tx.delete("own/c")?;

    let forward = collect(tx.ascend("own/", "own0")?)?;
    assert_eq!(keys_of(&forward), vec!["own/a", "own/b"]);
    let backward = collect(tx.descend("own/", "own0")?)?;
    assert_eq!(keys_of(&backward), vec!["own/b", "own/a"]);
    tx.discard()?;

    let committed = db.view(|s| collect(s.ascend("own/", "own0")?))?;
    assert_eq!(keys_of(&committed), vec!["own/a", "own/c"]);
    Ok(())
}

fn update_and_view<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let value = db.update(|tx| {
        tx.set("tx/update", &b"42"[..])?;
        Ok(42)
    })?;
    assert_eq!(value, 42);

    let err = db
        .update(|tx| -> KvResult<()> {
            tx.set("tx/update-failed", &b"1"[..])?;
            Err(KvError::new("abort", ErrorKind::InvalidArgument))
        })
        .unwrap_err();
    assert_eq!(err.message(), "abort");

    db.view(|s| {
        assert_eq!(s.get("tx/update")?, b"42");
        assert!(s.get("tx/update-failed").unwrap_err().is_not_found());
        Ok(())
    })
}

fn identifiers_are_unique<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let mut ids = HashSet::new();
    for _ in 0..16 {
        let snapshot = db.new_snapshot()?;
        assert!(ids.insert(snapshot.id().to_string()));
    }
    for _ in 0..16 {
        let tx = db.new_transaction()?;
        assert!(ids.insert(tx.id().to_string()));
    }
    Ok(())
}

/// Two writers that touch the same key: the second committer must fail
/// and its write must be lost.
///
/// Requires an engine that runs read-write transactions concurrently and
/// validates at commit time, such as the in-memory engine.
pub fn run_conflict_ops<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    db.update(|tx| tx.set("conflict/key", &b"0"[..]))?;

    let mut first = db.new_transaction()?;
    let mut second = db.new_transaction()?;
    first.get("conflict/key")?;
    second.get("conflict/key")?;
    first.set("conflict/key", &b"first"[..])?;
    second.set("conflict/key", &b"second"[..])?;

    first.commit()?;
    let err = second.commit().unwrap_err();
    assert!(err.is_io_failure());
    assert_eq!(second.state(), TransactionState::Failed);
    assert_done(second.commit());

    assert_eq!(db.view(|s| s.get("conflict/key"))?, b"first");

    // disjoint writers both commit
    let mut left = db.new_transaction()?;
    let mut right = db.new_transaction()?;
    left.set("conflict/left", &b"l"[..])?;
    right.set("conflict/right", &b"r"[..])?;
    left.commit()?;
    right.commit()?;

    db.view(|s| {
        assert_eq!(s.get("conflict/left")?, b"l");
        assert_eq!(s.get("conflict/right")?, b"r");
        Ok(())
    })
}
