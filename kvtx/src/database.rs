use crate::cancel::{CancelScope, CancellationToken};
use crate::checker::KeyChecker;
use crate::engine::{StorageEngine, TxMode};
use crate::errors::KvResult;
use crate::transaction::{KvSnapshot, KvTransaction};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Entry point of the key-value layer.
///
/// # Purpose
/// Owns one storage engine and the key validation rules, and hands out
/// transactions and snapshots against them.
///
/// # Characteristics
/// - **Engine-agnostic**: works with any [`StorageEngine`]
/// - **Cheap to clone**: all clones share the same engine and key checker
/// - **Thread-safe**: `Send + Sync` whenever the engine is, so clones can be
///   moved into worker threads that each run their own transactions
/// - **Fixed rules**: the key checker is set when the handle is built and
///   never changes afterwards
/// - **Cooperative cancellation**: once the database's
///   [`CancellationToken`] fires, later operations on every handle fail
///   fast with `Cancelled`; a single handle can also carry its own token
///
/// # Examples
///
/// ```rust,ignore
/// use kvtx::database::KvDatabaseBuilder;
/// use kvtx::engine::memory::InMemoryEngine;
///
/// let db = KvDatabaseBuilder::new()
///     .key_checker(|key| key.starts_with('/'))
///     .open(InMemoryEngine::new());
///
/// let mut tx = db.new_transaction()?;
/// tx.set("/greeting", &b"hello"[..])?;
/// tx.commit()?;
/// ```
pub struct KvDatabase<E: StorageEngine> {
    inner: Arc<KvDatabaseInner<E>>,
}

impl<E: StorageEngine> Clone for KvDatabase<E> {
    fn clone(&self) -> Self {
        KvDatabase {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: StorageEngine> KvDatabase<E> {
    /// Wraps `engine` with the default key checker.
    pub fn new(engine: E) -> Self {
        KvDatabaseBuilder::new().open(engine)
    }

    /// Begins a read-write transaction.
    pub fn new_transaction(&self) -> KvResult<KvTransaction<'_, E>> {
        self.begin_transaction(None)
    }

    /// Begins a read-write transaction that also observes `cancel`.
    pub fn new_transaction_with(
        &self,
        cancel: &CancellationToken,
    ) -> KvResult<KvTransaction<'_, E>> {
        self.begin_transaction(Some(cancel))
    }

    /// Begins a read-only snapshot.
    pub fn new_snapshot(&self) -> KvResult<KvSnapshot<'_, E>> {
        self.begin_snapshot(None)
    }

    /// Begins a read-only snapshot that also observes `cancel`.
    pub fn new_snapshot_with(&self, cancel: &CancellationToken) -> KvResult<KvSnapshot<'_, E>> {
        self.begin_snapshot(Some(cancel))
    }

    /// Runs `f` in a new transaction and commits it when `f` succeeds.
    ///
    /// When `f` fails the transaction is discarded and the error returned.
    /// `f` must not terminate the transaction itself.
    pub fn update<'db, F, T>(&'db self, f: F) -> KvResult<T>
    where
        F: FnOnce(&mut KvTransaction<'db, E>) -> KvResult<T>,
    {
        let mut tx = self.new_transaction()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if tx.is_active() {
                    tx.discard()?;
                }
                Err(err)
            }
        }
    }

    /// Runs `f` against a new snapshot and releases it afterwards.
    pub fn view<'db, F, T>(&'db self, f: F) -> KvResult<T>
    where
        F: FnOnce(&KvSnapshot<'db, E>) -> KvResult<T>,
    {
        let mut snapshot = self.new_snapshot()?;
        let result = f(&snapshot);
        if snapshot.is_active() {
            snapshot.discard()?;
        }
        result
    }

    /// The underlying engine, for engine specific maintenance.
    pub fn engine(&self) -> &E {
        &self.inner.engine
    }

    pub fn key_checker(&self) -> &KeyChecker {
        &self.inner.checker
    }

    /// The database-wide token. Cancelling it fails every later operation
    /// on every handle of this database.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    fn begin_transaction(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> KvResult<KvTransaction<'_, E>> {
        KvTransaction::begin(
            &self.inner.engine,
            &self.inner.checker,
            TxMode::ReadWrite,
            CancelScope::new(&self.inner.cancel, cancel),
        )
    }

    fn begin_snapshot(&self, cancel: Option<&CancellationToken>) -> KvResult<KvSnapshot<'_, E>> {
        KvSnapshot::begin(
            &self.inner.engine,
            &self.inner.checker,
            CancelScope::new(&self.inner.cancel, cancel),
        )
    }
}

impl<E: StorageEngine> Debug for KvDatabase<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvDatabase")
            .field("engine", &self.inner.engine.name())
            .field("checker", &self.inner.checker)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

struct KvDatabaseInner<E> {
    engine: E,
    checker: KeyChecker,
    cancel: CancellationToken,
}

/// Builder for [`KvDatabase`].
#[derive(Debug, Clone, Default)]
pub struct KvDatabaseBuilder {
    checker: KeyChecker,
    cancel: CancellationToken,
}

impl KvDatabaseBuilder {
    pub fn new() -> Self {
        KvDatabaseBuilder::default()
    }

    /// Installs an acceptance predicate for non-empty keys.
    pub fn key_checker<F>(mut self, accept: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.checker = KeyChecker::with_predicate(accept);
        self
    }

    /// Installs a prepared checker, possibly shared with other databases.
    pub fn checker(mut self, checker: KeyChecker) -> Self {
        self.checker = checker;
        self
    }

    /// Uses `token` as the database-wide cancellation signal.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn open<E: StorageEngine>(self, engine: E) -> KvDatabase<E> {
        log::debug!(
            "Opening key-value database on {} engine (key predicate: {})",
            engine.name(),
            self.checker.has_predicate()
        );
        KvDatabase {
            inner: Arc::new(KvDatabaseInner {
                engine,
                checker: self.checker,
                cancel: self.cancel,
            }),
        }
    }
}
