use crate::cancel::CancelScope;
use crate::checker::KeyChecker;
use crate::engine::{CursorOptions, EngineError, EngineTransaction, StorageEngine, TxMode};
use crate::errors::{ErrorKind, KvError, KvResult};
use crate::iter::KvIter;
use crate::range::KeyRange;
use std::fmt::{Debug, Formatter};
use std::io::Read;
use uuid::Uuid;

/// Cursor type produced by the engine transaction behind a handle.
pub type CursorOf<'t, 'db, E> =
    <<E as StorageEngine>::Transaction<'db> as EngineTransaction>::Cursor<'t>;

/// Lifecycle state of a transaction or snapshot handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Active,
    Committed,
    Discarded,
    /// Commit was attempted and the engine rejected it.
    Failed,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Active)
    }
}

/// A read-write unit of work against a [`KvDatabase`](crate::database::KvDatabase).
///
/// # Lifecycle
///
/// A transaction is `Active` from creation until exactly one of
/// [`commit`](Self::commit), [`discard`](Self::discard) or
/// [`rollback`](Self::rollback) is called. Afterwards every operation,
/// including a second termination, fails with [`ErrorKind::AlreadyDone`].
/// Dropping an active transaction discards it.
///
/// # Iteration
///
/// [`scan`](Self::scan), [`ascend`](Self::ascend) and
/// [`descend`](Self::descend) return iterators that borrow the transaction.
/// Terminating methods take `&mut self`, so a live iterator keeps the
/// transaction open for as long as it is in use.
///
/// # Examples
///
/// ```rust,ignore
/// let db = KvDatabase::new(InMemoryEngine::new());
/// let mut tx = db.new_transaction()?;
/// tx.set("a", &b"1"[..])?;
/// assert_eq!(tx.get("a")?, b"1");
/// tx.commit()?;
/// ```
pub struct KvTransaction<'db, E: StorageEngine + 'db> {
    id: String,
    checker: &'db KeyChecker,
    txn: Option<E::Transaction<'db>>,
    cancel: CancelScope,
    state: TransactionState,
    mode: TxMode,
}

impl<'db, E: StorageEngine + 'db> KvTransaction<'db, E> {
    pub(crate) fn begin(
        engine: &'db E,
        checker: &'db KeyChecker,
        mode: TxMode,
        cancel: CancelScope,
    ) -> KvResult<Self> {
        cancel.check()?;
        let txn = engine.begin(mode).map_err(|err| {
            log::error!("Failed to begin {:?} transaction on {} engine: {}", mode, engine.name(), err);
            KvError::from(err)
        })?;

        let id = Uuid::new_v4().to_string();
        log::debug!("Transaction {} started on {} engine ({:?})", id, engine.name(), mode);
        Ok(KvTransaction {
            id,
            checker,
            txn: Some(txn),
            cancel,
            state: TransactionState::Active,
            mode,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn is_read_only(&self) -> bool {
        !self.mode.is_update()
    }

    /// Returns an owned copy of the value stored under `key`.
    ///
    /// Fails with [`ErrorKind::NotFound`] when the key is absent.
    pub fn get(&self, key: &str) -> KvResult<Vec<u8>> {
        let txn = self.enter()?;
        self.check_key(key)?;
        txn.get(key.as_bytes())
            .map_err(|err| self.engine_failure("get", err))
    }

    /// Drains `value` into memory and writes it under `key`.
    pub fn set<R: Read>(&mut self, key: &str, mut value: R) -> KvResult<()> {
        self.enter()?;
        self.check_key(key)?;

        let mut buf = Vec::new();
        value.read_to_end(&mut buf).map_err(|err| {
            log::error!("Transaction {} failed to read value for {:?}: {}", self.id, key, err);
            KvError::from(err)
        })?;

        let result = self.active_mut()?.set(key.as_bytes(), buf);
        result.map_err(|err| self.engine_failure("set", err))
    }

    /// Removes `key`, failing with [`ErrorKind::NotFound`] when it is absent.
    pub fn delete(&mut self, key: &str) -> KvResult<()> {
        self.enter()?;
        self.check_key(key)?;
        let result = self.active_mut()?.delete(key.as_bytes());
        result.map_err(|err| self.engine_failure("delete", err))
    }

    /// Commits the transaction.
    ///
    /// The handle is terminated whether or not the engine accepts the
    /// commit. Rejections, write conflicts included, are reported as
    /// [`ErrorKind::IOFailure`] and are not retried. A cancelled
    /// transaction refuses to commit and stays active until discarded.
    pub fn commit(&mut self) -> KvResult<()> {
        self.enter()?;
        let txn = self.terminate(TransactionState::Committed)?;
        match txn.commit() {
            Ok(()) => {
                log::debug!("Transaction {} committed", self.id);
                Ok(())
            }
            Err(err) => {
                self.state = TransactionState::Failed;
                log::error!("Transaction {} failed to commit: {}", self.id, err);
                Err(KvError::new_with_cause(
                    &format!("commit failed: {}", err),
                    ErrorKind::IOFailure,
                    KvError::from(err),
                ))
            }
        }
    }

    /// Abandons the transaction and every write made through it.
    pub fn discard(&mut self) -> KvResult<()> {
        let txn = self.terminate(TransactionState::Discarded)?;
        txn.discard();
        log::debug!("Transaction {} discarded", self.id);
        Ok(())
    }

    /// Alias of [`discard`](Self::discard).
    pub fn rollback(&mut self) -> KvResult<()> {
        self.discard()
    }

    /// Iterates every pair in ascending key order.
    pub fn scan(&self) -> KvResult<KvIter<CursorOf<'_, 'db, E>>> {
        self.ascend("", "")
    }

    /// Iterates `[begin, end)` in ascending key order. An empty bound is
    /// unbounded on that side.
    pub fn ascend(&self, begin: &str, end: &str) -> KvResult<KvIter<CursorOf<'_, 'db, E>>> {
        let txn = self.enter()?;
        let range = KeyRange::new(begin, end)?;
        let cursor = txn
            .cursor(CursorOptions::forward())
            .map_err(|err| self.engine_failure("ascend", err))?;
        Ok(KvIter::ascending(cursor, range).with_cancel(self.cancel.clone()))
    }

    /// Iterates `[begin, end)` in descending key order. An empty bound is
    /// unbounded on that side.
    pub fn descend(&self, begin: &str, end: &str) -> KvResult<KvIter<CursorOf<'_, 'db, E>>> {
        let txn = self.enter()?;
        let range = KeyRange::new(begin, end)?;
        let cursor = txn
            .cursor(CursorOptions::reverse())
            .map_err(|err| self.engine_failure("descend", err))?;
        Ok(KvIter::descending(cursor, range).with_cancel(self.cancel.clone()))
    }

    fn active(&self) -> KvResult<&E::Transaction<'db>> {
        match (&self.state, &self.txn) {
            (TransactionState::Active, Some(txn)) => Ok(txn),
            _ => Err(KvError::already_done()),
        }
    }

    // lifecycle first, then cancellation
    fn enter(&self) -> KvResult<&E::Transaction<'db>> {
        let txn = self.active()?;
        self.cancel.check()?;
        Ok(txn)
    }

    fn active_mut(&mut self) -> KvResult<&mut E::Transaction<'db>> {
        match (&self.state, &mut self.txn) {
            (TransactionState::Active, Some(txn)) => Ok(txn),
            _ => Err(KvError::already_done()),
        }
    }

    fn terminate(&mut self, state: TransactionState) -> KvResult<E::Transaction<'db>> {
        if self.state.is_terminal() {
            return Err(KvError::already_done());
        }
        let txn = self.txn.take().ok_or_else(KvError::already_done)?;
        self.state = state;
        Ok(txn)
    }

    fn check_key(&self, key: &str) -> KvResult<()> {
        if self.checker.accepts(key) {
            Ok(())
        } else {
            Err(KvError::invalid_key(key))
        }
    }

    fn engine_failure(&self, op: &str, err: EngineError) -> KvError {
        if err != EngineError::KeyNotFound {
            log::error!("Transaction {} {} failed: {}", self.id, op, err);
        }
        KvError::from(err)
    }
}

impl<'db, E: StorageEngine + 'db> Drop for KvTransaction<'db, E> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            if self.mode.is_update() {
                log::warn!("Transaction {} dropped while active, discarding", self.id);
            } else {
                log::debug!("Snapshot {} released on drop", self.id);
            }
            txn.discard();
        }
    }
}

impl<'db, E: StorageEngine + 'db> Debug for KvTransaction<'db, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvTransaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .finish()
    }
}

/// A read-only view of the database as of its creation.
///
/// Same read and scan surface as [`KvTransaction`], without mutation.
/// Writes committed by others after the snapshot was taken are not visible.
pub struct KvSnapshot<'db, E: StorageEngine + 'db> {
    inner: KvTransaction<'db, E>,
}

impl<'db, E: StorageEngine + 'db> KvSnapshot<'db, E> {
    pub(crate) fn begin(
        engine: &'db E,
        checker: &'db KeyChecker,
        cancel: CancelScope,
    ) -> KvResult<Self> {
        Ok(KvSnapshot {
            inner: KvTransaction::begin(engine, checker, TxMode::ReadOnly, cancel)?,
        })
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn state(&self) -> TransactionState {
        self.inner.state()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn get(&self, key: &str) -> KvResult<Vec<u8>> {
        self.inner.get(key)
    }

    pub fn scan(&self) -> KvResult<KvIter<CursorOf<'_, 'db, E>>> {
        self.inner.scan()
    }

    pub fn ascend(&self, begin: &str, end: &str) -> KvResult<KvIter<CursorOf<'_, 'db, E>>> {
        self.inner.ascend(begin, end)
    }

    pub fn descend(&self, begin: &str, end: &str) -> KvResult<KvIter<CursorOf<'_, 'db, E>>> {
        self.inner.descend(begin, end)
    }

    /// Releases the snapshot.
    pub fn discard(&mut self) -> KvResult<()> {
        self.inner.discard()
    }

    /// Alias of [`discard`](Self::discard).
    pub fn rollback(&mut self) -> KvResult<()> {
        self.inner.discard()
    }
}

impl<'db, E: StorageEngine + 'db> Debug for KvSnapshot<'db, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvSnapshot")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state)
            .finish()
    }
}
