use crate::engine::{
    CursorOptions, EngineCursor, EngineError, EngineResult, EngineTransaction, StorageEngine,
    TxMode,
};
use im::OrdMap;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound::{self, Excluded, Included, Unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Snapshot = OrdMap<Vec<u8>, Vec<u8>>;

/// In-memory ordered storage engine.
///
/// # Purpose
/// A non-persistent engine with the same transactional contract as the
/// on-disk engines. Used as the reference engine in tests and for
/// throw-away databases.
///
/// # Characteristics
/// - **Snapshot isolation**: every transaction starts from an O(1) clone of
///   the committed persistent ordered map
/// - **Read-your-own-writes**: writes are applied to the transaction's private
///   view, so gets and cursors observe them before commit
/// - **Optimistic commit**: a commit fails with [`EngineError::Conflict`] if
///   any key the transaction read or wrote was committed by someone else
///   after the transaction began
/// - **Thread-safe**: cheap to clone, all clones share the same state
#[derive(Clone, Default)]
pub struct InMemoryEngine {
    inner: Arc<InMemoryEngineInner>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        InMemoryEngine {
            inner: Arc::new(InMemoryEngineInner::default()),
        }
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.inner.state.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version of the last successful commit; starts at zero.
    pub fn committed_version(&self) -> u64 {
        self.inner.state.read().version
    }

    /// Rejects all transactions begun after this call.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl StorageEngine for InMemoryEngine {
    type Transaction<'a>
        = InMemoryTransaction<'a>
    where
        Self: 'a;

    fn begin(&self, mode: TxMode) -> EngineResult<Self::Transaction<'_>> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        let state = self.inner.state.read();
        Ok(InMemoryTransaction {
            engine: &self.inner,
            mode,
            start_version: state.version,
            view: state.data.clone(),
            reads: RefCell::new(HashSet::new()),
            writes: BTreeMap::new(),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[derive(Default)]
struct InMemoryEngineInner {
    state: RwLock<CommittedState>,
    closed: AtomicBool,
}

#[derive(Default)]
struct CommittedState {
    version: u64,
    data: Snapshot,
    // commit version of the last write to each key, deletes included
    modified: HashMap<Vec<u8>, u64>,
}

/// A transaction against an [`InMemoryEngine`].
pub struct InMemoryTransaction<'a> {
    engine: &'a InMemoryEngineInner,
    mode: TxMode,
    start_version: u64,
    view: Snapshot,
    reads: RefCell<HashSet<Vec<u8>>>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl InMemoryTransaction<'_> {
    fn check_writable(&self) -> EngineResult<()> {
        if self.mode.is_update() {
            Ok(())
        } else {
            Err(EngineError::ReadOnly)
        }
    }
}

impl EngineTransaction for InMemoryTransaction<'_> {
    type Cursor<'c>
        = InMemoryCursor
    where
        Self: 'c;

    fn get(&self, key: &[u8]) -> EngineResult<Vec<u8>> {
        if self.mode.is_update() {
            self.reads.borrow_mut().insert(key.to_vec());
        }
        self.view.get(key).cloned().ok_or(EngineError::KeyNotFound)
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> EngineResult<()> {
        self.check_writable()?;
        self.view.insert(key.to_vec(), value.clone());
        self.writes.insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<()> {
        self.check_writable()?;
        self.reads.borrow_mut().insert(key.to_vec());
        if self.view.remove(key).is_none() {
            return Err(EngineError::KeyNotFound);
        }
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn cursor(&self, options: CursorOptions) -> EngineResult<Self::Cursor<'_>> {
        Ok(InMemoryCursor::new(self.view.clone(), options.reverse))
    }

    fn commit(self) -> EngineResult<()> {
        if !self.mode.is_update() || self.writes.is_empty() {
            return Ok(());
        }
        if self.engine.closed.load(Ordering::Relaxed) {
            return Err(EngineError::Closed);
        }

        let mut state = self.engine.state.write();
        let reads = self.reads.into_inner();
        let conflicted = reads
            .iter()
            .chain(self.writes.keys())
            .any(|key| matches!(state.modified.get(key), Some(v) if *v > self.start_version));
        if conflicted {
            log::debug!(
                "In-memory commit rejected, transaction started at version {} conflicts",
                self.start_version
            );
            return Err(EngineError::Conflict);
        }

        state.version += 1;
        let version = state.version;
        for (key, value) in self.writes {
            match value {
                Some(value) => {
                    state.data.insert(key.clone(), value);
                }
                None => {
                    state.data.remove(&key);
                }
            }
            state.modified.insert(key, version);
        }
        Ok(())
    }

    fn discard(self) {}
}

/// Cursor over a private snapshot of an [`InMemoryTransaction`]'s view.
///
/// Every step is an O(log n) range lookup relative to the current key, so
/// the cursor owns its snapshot and borrows nothing.
pub struct InMemoryCursor {
    data: Snapshot,
    reverse: bool,
    current: Option<(Vec<u8>, Vec<u8>)>,
    closed: bool,
}

impl InMemoryCursor {
    fn new(data: Snapshot, reverse: bool) -> Self {
        InMemoryCursor {
            data,
            reverse,
            current: None,
            closed: false,
        }
    }

    fn load(&mut self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) {
        if self.closed {
            return;
        }
        let mut range = self.data.range((lower, upper));
        let entry = if self.reverse {
            range.next_back()
        } else {
            range.next()
        };
        self.current = entry.map(|(k, v)| (k.clone(), v.clone()));
    }
}

impl EngineCursor for InMemoryCursor {
    fn rewind(&mut self) {
        self.load(Unbounded, Unbounded);
    }

    fn seek(&mut self, key: &[u8]) {
        if self.reverse {
            self.load(Unbounded, Included(key.to_vec()));
        } else {
            self.load(Included(key.to_vec()), Unbounded);
        }
    }

    fn valid(&self) -> bool {
        !self.closed && self.current.is_some()
    }

    fn key(&self) -> EngineResult<&[u8]> {
        match &self.current {
            Some((key, _)) => Ok(key.as_slice()),
            None => Err(EngineError::Backend("cursor is not positioned".to_string())),
        }
    }

    fn value(&self) -> EngineResult<Vec<u8>> {
        match &self.current {
            Some((_, value)) => Ok(value.clone()),
            None => Err(EngineError::Backend("cursor is not positioned".to_string())),
        }
    }

    fn next(&mut self) {
        if let Some((key, _)) = self.current.take() {
            if self.reverse {
                self.load(Unbounded, Excluded(key));
            } else {
                self.load(Excluded(key), Unbounded);
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.current = None;
        self.data = OrdMap::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(keys: &[&str]) -> InMemoryEngine {
        let engine = InMemoryEngine::new();
        let mut tx = engine.begin(TxMode::ReadWrite).unwrap();
        for key in keys {
            tx.set(key.as_bytes(), key.to_uppercase().into_bytes()).unwrap();
        }
        tx.commit().unwrap();
        engine
    }

    fn collect(cursor: &mut InMemoryCursor) -> Vec<String> {
        let mut keys = vec![];
        while cursor.valid() {
            keys.push(String::from_utf8(cursor.key().unwrap().to_vec()).unwrap());
            cursor.next();
        }
        keys
    }

    #[test]
    fn test_set_get_delete() {
        let engine = InMemoryEngine::new();
        let mut tx = engine.begin(TxMode::ReadWrite).unwrap();
        tx.set(b"a", b"1".to_vec()).unwrap();
        assert_eq!(tx.get(b"a").unwrap(), b"1".to_vec());
        tx.delete(b"a").unwrap();
        assert_eq!(tx.get(b"a"), Err(EngineError::KeyNotFound));
        assert_eq!(tx.delete(b"a"), Err(EngineError::KeyNotFound));
        tx.commit().unwrap();
        assert!(engine.is_empty());
    }

    #[test]
    fn test_commit_publishes_writes() {
        let engine = engine_with(&["a", "b"]);
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.committed_version(), 1);

        let tx = engine.begin(TxMode::ReadOnly).unwrap();
        assert_eq!(tx.get(b"b").unwrap(), b"B".to_vec());
    }

    #[test]
    fn test_discard_drops_writes() {
        let engine = InMemoryEngine::new();
        let mut tx = engine.begin(TxMode::ReadWrite).unwrap();
        tx.set(b"a", b"1".to_vec()).unwrap();
        tx.discard();
        assert!(engine.is_empty());
        assert_eq!(engine.committed_version(), 0);
    }

    #[test]
    fn test_snapshot_isolation() {
        let engine = engine_with(&["a"]);
        let reader = engine.begin(TxMode::ReadOnly).unwrap();

        let mut writer = engine.begin(TxMode::ReadWrite).unwrap();
        writer.set(b"a", b"changed".to_vec()).unwrap();
        writer.set(b"b", b"new".to_vec()).unwrap();
        writer.commit().unwrap();

        assert_eq!(reader.get(b"a").unwrap(), b"A".to_vec());
        assert_eq!(reader.get(b"b"), Err(EngineError::KeyNotFound));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let engine = engine_with(&["a"]);
        let mut tx = engine.begin(TxMode::ReadOnly).unwrap();
        assert_eq!(tx.set(b"b", vec![]), Err(EngineError::ReadOnly));
        assert_eq!(tx.delete(b"a"), Err(EngineError::ReadOnly));
        assert!(tx.commit().is_ok());
    }

    #[test]
    fn test_write_write_conflict() {
        let engine = engine_with(&["a"]);
        let mut first = engine.begin(TxMode::ReadWrite).unwrap();
        let mut second = engine.begin(TxMode::ReadWrite).unwrap();
        first.set(b"a", b"1".to_vec()).unwrap();
        second.set(b"a", b"2".to_vec()).unwrap();

        assert!(first.commit().is_ok());
        assert_eq!(second.commit(), Err(EngineError::Conflict));

        let tx = engine.begin(TxMode::ReadOnly).unwrap();
        assert_eq!(tx.get(b"a").unwrap(), b"1".to_vec());
    }

    #[test]
    fn test_read_write_conflict() {
        let engine = engine_with(&["a", "b"]);
        let mut first = engine.begin(TxMode::ReadWrite).unwrap();
        let mut second = engine.begin(TxMode::ReadWrite).unwrap();

        let _ = first.get(b"a").unwrap();
        first.set(b"b", b"from-first".to_vec()).unwrap();
        second.set(b"a", b"from-second".to_vec()).unwrap();

        assert!(second.commit().is_ok());
        assert_eq!(first.commit(), Err(EngineError::Conflict));
    }

    #[test]
    fn test_disjoint_writers_both_commit() {
        let engine = engine_with(&["a", "b"]);
        let mut first = engine.begin(TxMode::ReadWrite).unwrap();
        let mut second = engine.begin(TxMode::ReadWrite).unwrap();
        first.set(b"a", b"1".to_vec()).unwrap();
        second.set(b"b", b"2".to_vec()).unwrap();
        assert!(first.commit().is_ok());
        assert!(second.commit().is_ok());
        assert_eq!(engine.committed_version(), 3);
    }

    #[test]
    fn test_closed_engine_rejects_begin() {
        let engine = InMemoryEngine::new();
        engine.close();
        assert!(engine.is_closed());
        assert!(matches!(
            engine.begin(TxMode::ReadOnly),
            Err(EngineError::Closed)
        ));
    }

    #[test]
    fn test_forward_cursor_rewind_and_seek() {
        let engine = engine_with(&["a", "b", "d"]);
        let tx = engine.begin(TxMode::ReadOnly).unwrap();

        let mut cursor = tx.cursor(CursorOptions::forward()).unwrap();
        assert!(!cursor.valid());
        cursor.rewind();
        assert_eq!(collect(&mut cursor), vec!["a", "b", "d"]);

        cursor.seek(b"c");
        assert_eq!(cursor.key().unwrap(), b"d");
        assert_eq!(cursor.value().unwrap(), b"D".to_vec());

        cursor.seek(b"e");
        assert!(!cursor.valid());
    }

    #[test]
    fn test_reverse_cursor_rewind_and_seek() {
        let engine = engine_with(&["a", "b", "d"]);
        let tx = engine.begin(TxMode::ReadOnly).unwrap();

        let mut cursor = tx.cursor(CursorOptions::reverse()).unwrap();
        cursor.rewind();
        assert_eq!(collect(&mut cursor), vec!["d", "b", "a"]);

        cursor.seek(b"c");
        assert_eq!(cursor.key().unwrap(), b"b");
        cursor.seek(b"d");
        assert_eq!(cursor.key().unwrap(), b"d");
        cursor.seek(b"0");
        assert!(!cursor.valid());
    }

    #[test]
    fn test_cursor_sees_own_writes() {
        let engine = engine_with(&["a", "c"]);
        let mut tx = engine.begin(TxMode::ReadWrite).unwrap();
        tx.set(b"b", b"B".to_vec()).unwrap();
        tx.delete(b"c").unwrap();

        let mut cursor = tx.cursor(CursorOptions::forward()).unwrap();
        cursor.rewind();
        assert_eq!(collect(&mut cursor), vec!["a", "b"]);
    }

    #[test]
    fn test_closed_cursor_is_invalid() {
        let engine = engine_with(&["a"]);
        let tx = engine.begin(TxMode::ReadOnly).unwrap();
        let mut cursor = tx.cursor(CursorOptions::forward()).unwrap();
        cursor.rewind();
        assert!(cursor.valid());
        cursor.close();
        assert!(!cursor.valid());
        cursor.rewind();
        assert!(!cursor.valid());
        assert!(cursor.key().is_err());
    }
}
