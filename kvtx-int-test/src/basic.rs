//! Point operations: get, set and delete through transactions and snapshots.

use kvtx::engine::StorageEngine;
use kvtx::errors::KvResult;
use kvtx::KvDatabase;
use std::io::{self, Read};

/// A reader that fails after handing out `ok_bytes` bytes.
struct FailingReader {
    ok_bytes: usize,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.ok_bytes == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream broke"));
        }
        let n = self.ok_bytes.min(buf.len());
        buf[..n].fill(b'x');
        self.ok_bytes -= n;
        Ok(n)
    }
}

/// Runs every point-operation check against `db`, which must be empty.
pub fn run_basic_ops<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    set_then_get_in_same_transaction(db)?;
    committed_value_is_visible_to_snapshot(db)?;
    overwrite_replaces_value(db)?;
    missing_key_is_not_found(db)?;
    delete_removes_key(db)?;
    empty_key_is_rejected(db)?;
    binary_and_large_values(db)?;
    failing_value_stream(db)?;
    Ok(())
}

fn set_then_get_in_same_transaction<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let mut tx = db.new_transaction()?;
    tx.set("basic/own", &b"mine"[..])?;
    assert_eq!(tx.get("basic/own")?, b"mine");

    // not yet visible outside
    let snapshot = db.new_snapshot()?;
    assert!(snapshot.get("basic/own").unwrap_err().is_not_found());
    drop(snapshot);

    tx.commit()?;
    Ok(())
}

fn committed_value_is_visible_to_snapshot<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    db.update(|tx| tx.set("basic/greeting", &b"hello"[..]))?;

    let value = db.view(|snapshot| snapshot.get("basic/greeting"))?;
    assert_eq!(value, b"hello");

    let tx = db.new_transaction()?;
    assert_eq!(tx.get("basic/greeting")?, b"hello");
    Ok(())
}

fn overwrite_replaces_value<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    db.update(|tx| tx.set("basic/counter", &b"1"[..]))?;
    db.update(|tx| {
        tx.set("basic/counter", &b"2"[..])?;
        assert_eq!(tx.get("basic/counter")?, b"2");
        tx.set("basic/counter", &b"3"[..])
    })?;

    assert_eq!(db.view(|s| s.get("basic/counter"))?, b"3");
    Ok(())
}

fn missing_key_is_not_found<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let snapshot = db.new_snapshot()?;
    let err = snapshot.get("basic/missing").unwrap_err();
    assert!(err.is_not_found());
    drop(snapshot);

    let mut tx = db.new_transaction()?;
    assert!(tx.get("basic/missing").unwrap_err().is_not_found());
    assert!(tx.delete("basic/missing").unwrap_err().is_not_found());
    // a failed point operation leaves the transaction usable
    assert!(tx.is_active());
    tx.set("basic/after-miss", &b"ok"[..])?;
    tx.commit()?;

    assert_eq!(db.view(|s| s.get("basic/after-miss"))?, b"ok");
    Ok(())
}

fn delete_removes_key<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    db.update(|tx| tx.set("basic/doomed", &b"bye"[..]))?;

    let mut tx = db.new_transaction()?;
    tx.delete("basic/doomed")?;
    assert!(tx.get("basic/doomed").unwrap_err().is_not_found());
    assert!(tx.delete("basic/doomed").unwrap_err().is_not_found());

    // still present for readers until commit
    assert_eq!(db.view(|s| s.get("basic/doomed"))?, b"bye");
    tx.commit()?;

    let err = db.view(|s| s.get("basic/doomed")).unwrap_err();
    assert!(err.is_not_found());

    // set after delete in one transaction resurrects the key
    db.update(|tx| {
        tx.set("basic/phoenix", &b"1"[..])?;
        tx.delete("basic/phoenix")?;
        tx.set("basic/phoenix", &b"2"[..])
    })?;
    assert_eq!(db.view(|s| s.get("basic/phoenix"))?, b"2");
    Ok(())
}

fn empty_key_is_rejected<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let mut tx = db.new_transaction()?;
    assert!(tx.get("").unwrap_err().is_invalid_argument());
    assert!(tx.set("", &b"v"[..]).unwrap_err().is_invalid_argument());
    assert!(tx.delete("").unwrap_err().is_invalid_argument());
    assert!(tx.is_active());
    tx.discard()?;

    let snapshot = db.new_snapshot()?;
    assert!(snapshot.get("").unwrap_err().is_invalid_argument());
    Ok(())
}

fn binary_and_large_values<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let binary: Vec<u8> = (0..=255u8).collect();
    let large = vec![0xABu8; 1024 * 1024];
    let empty: &[u8] = &[];

    db.update(|tx| {
        tx.set("basic/binary", binary.as_slice())?;
        tx.set("basic/large", io::Cursor::new(large.clone()))?;
        tx.set("basic/empty", empty)
    })?;

    db.view(|s| {
        assert_eq!(s.get("basic/binary")?, binary);
        assert_eq!(s.get("basic/large")?.len(), large.len());
        assert!(s.get("basic/empty")?.is_empty());
        Ok(())
    })
}

fn failing_value_stream<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let mut tx = db.new_transaction()?;
    let err = tx
        .set("basic/torn", FailingReader { ok_bytes: 16 })
        .unwrap_err();
    assert!(err.is_io_failure());
    // nothing was written
    assert!(tx.get("basic/torn").unwrap_err().is_not_found());
    tx.commit()?;

    let err = db.view(|s| s.get("basic/torn")).unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}
