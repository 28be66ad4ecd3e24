//! Range iteration semantics over `[begin, end)`.

use crate::test_util::{collect, keys_of};
use kvtx::engine::StorageEngine;
use kvtx::errors::KvResult;
use kvtx::KvDatabase;
use rand::Rng;
use std::collections::BTreeMap;

fn pairs(items: &[(&str, &str)]) -> Vec<(String, Vec<u8>)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
        .collect()
}

/// Runs every range check against `db`, which must be empty.
pub fn run_range_ops<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    empty_store(db)?;

    db.update(|tx| {
        tx.set("a", &b"1"[..])?;
        tx.set("b", &b"2"[..])?;
        tx.set("c", &b"3"[..])?;
        tx.set("d", &b"4"[..])
    })?;

    ascend_bounds(db)?;
    descend_bounds(db)?;
    scan_everything(db)?;
    invalid_bounds(db)?;
    manual_stepping(db)?;
    abandoned_iterators(db)?;
    Ok(())
}

fn empty_store<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    db.view(|s| {
        assert!(collect(s.scan()?)?.is_empty());
        assert!(collect(s.descend("", "")?)?.is_empty());
        assert!(collect(s.descend("a", "z")?)?.is_empty());

        let iter = s.ascend("a", "z")?;
        assert!(!iter.is_valid());
        assert!(iter.current().is_none());
        assert!(iter.err().is_none());
        Ok(())
    })
}

fn ascend_bounds<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let snapshot = db.new_snapshot()?;

    assert_eq!(
        collect(snapshot.ascend("b", "d")?)?,
        pairs(&[("b", "2"), ("c", "3")])
    );

    let cases: &[(&str, &str, &[&str])] = &[
        ("", "", &["a", "b", "c", "d"]),
        ("b", "", &["b", "c", "d"]),
        ("", "c", &["a", "b"]),
        ("bb", "cc", &["c"]),
        ("0", "a", &[]),
        ("c", "c", &[]),
        ("a", "a0", &["a"]),
        ("d", "z", &["d"]),
        ("e", "z", &[]),
    ];
    for (begin, end, expected) in cases {
        let got = collect(snapshot.ascend(begin, end)?)?;
        assert_eq!(&keys_of(&got), expected, "ascend({:?}, {:?})", begin, end);
    }
    Ok(())
}

fn descend_bounds<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let snapshot = db.new_snapshot()?;

    assert_eq!(
        collect(snapshot.descend("b", "d")?)?,
        pairs(&[("c", "3"), ("b", "2")])
    );

    let cases: &[(&str, &str, &[&str])] = &[
        ("", "", &["d", "c", "b", "a"]),
        // end present as a key is excluded
        ("", "c", &["b", "a"]),
        // end absent lands on the largest smaller key
        ("", "bb", &["b", "a"]),
        ("b", "", &["d", "c", "b"]),
        ("a", "b", &["a"]),
        ("c", "c", &[]),
        ("b", "z", &["d", "c", "b"]),
        ("0", "a", &[]),
        ("e", "z", &[]),
    ];
    for (begin, end, expected) in cases {
        let got = collect(snapshot.descend(begin, end)?)?;
        assert_eq!(&keys_of(&got), expected, "descend({:?}, {:?})", begin, end);
    }
    Ok(())
}

fn scan_everything<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let tx = db.new_transaction()?;
    let all = collect(tx.scan()?)?;
    assert_eq!(
        all,
        pairs(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")])
    );
    Ok(())
}

fn invalid_bounds<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    db.view(|s| {
        assert!(s.ascend("d", "b").unwrap_err().is_invalid_argument());
        assert!(s.descend("d", "b").unwrap_err().is_invalid_argument());
        // an empty end is unbounded, so any begin is fine
        assert_eq!(collect(s.ascend("zzz", "")?)?.len(), 0);
        Ok(())
    })
}

fn manual_stepping<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let snapshot = db.new_snapshot()?;

    let mut iter = snapshot.ascend("b", "d")?;
    assert!(!iter.is_reverse());
    assert_eq!(iter.current(), Some(("b", &b"2"[..])));
    // current does not advance
    assert_eq!(iter.current(), Some(("b", &b"2"[..])));
    assert_eq!(iter.next(), Some(("c", &b"3"[..])));
    assert_eq!(iter.next(), None);
    assert!(!iter.is_valid());
    assert!(iter.err().is_none());
    // terminal iterators stay terminal
    assert_eq!(iter.next(), None);
    assert!(iter.current().is_none());
    drop(iter);

    let mut iter = snapshot.descend("", "")?;
    assert!(iter.is_reverse());
    let mut keys = Vec::new();
    let mut item = iter.current().map(|(k, _)| k.to_string());
    while let Some(key) = item {
        keys.push(key);
        item = iter.next().map(|(k, _)| k.to_string());
    }
    assert_eq!(keys, vec!["d", "c", "b", "a"]);
    assert!(iter.err().is_none());
    Ok(())
}

fn abandoned_iterators<E: StorageEngine>(db: &KvDatabase<E>) -> KvResult<()> {
    let mut tx = db.new_transaction()?;
    {
        let iter = tx.scan()?;
        assert_eq!(iter.current().map(|(k, _)| k), Some("a"));
    }
    // the handle is usable again once the iterator is gone
    tx.set("e", &b"5"[..])?;
    let first_two: Vec<_> = tx
        .descend("", "")?
        .into_iter()
        .take(2)
        .collect::<KvResult<_>>()?;
    assert_eq!(keys_of(&first_two), vec!["e", "d"]);
    tx.discard()?;
    Ok(())
}

/// Compares ascend and descend against an ordered model for random keys
/// and random bounds. `db` must be empty.
pub fn run_random_range_ops<E: StorageEngine>(db: &KvDatabase<E>, rounds: usize) -> KvResult<()> {
    let mut rng = rand::rng();
    let mut model = BTreeMap::new();

    let mut tx = db.new_transaction()?;
    for i in 0..200 {
        let key = random_key(&mut rng);
        let value = format!("{}", i).into_bytes();
        tx.set(&key, value.as_slice())?;
        model.insert(key, value);
    }
    tx.commit()?;

    let snapshot = db.new_snapshot()?;
    for _ in 0..rounds {
        let mut begin = if rng.random_bool(0.2) {
            String::new()
        } else {
            random_key(&mut rng)
        };
        let mut end = if rng.random_bool(0.2) {
            String::new()
        } else {
            random_key(&mut rng)
        };
        // reuse stored keys as bounds now and then
        if rng.random_bool(0.3) {
            if let Some(key) = model.keys().nth(rng.random_range(0..model.len())) {
                end = key.clone();
            }
        }
        if !end.is_empty() && begin > end {
            std::mem::swap(&mut begin, &mut end);
        }

        let expected: Vec<(String, Vec<u8>)> = model
            .iter()
            .filter(|(k, _)| {
                (begin.is_empty() || k.as_str() >= begin.as_str())
                    && (end.is_empty() || k.as_str() < end.as_str())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let ascending = collect(snapshot.ascend(&begin, &end)?)?;
        assert_eq!(ascending, expected, "ascend({:?}, {:?})", begin, end);

        let mut descending = collect(snapshot.descend(&begin, &end)?)?;
        descending.reverse();
        assert_eq!(descending, expected, "descend({:?}, {:?})", begin, end);
    }
    Ok(())
}

fn random_key<R: Rng>(rng: &mut R) -> String {
    let len = rng.random_range(1..=6);
    (0..len)
        .map(|_| char::from(rng.random_range(b'a'..=b'h')))
        .collect()
}
