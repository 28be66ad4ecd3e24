use crate::builder::FjallEngineBuilder;
use crate::config::FjallConfig;
use crate::error::{FjallError, FjallResult};
use crate::transaction::FjallTransaction;
use crate::version::fjall_version;
use fjall::{PersistMode, TxKeyspace, TxPartitionHandle};
use kvtx::engine::{EngineError, EngineResult, StorageEngine, TxMode};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A persistent storage engine backed by a fjall transactional keyspace.
///
/// All keys live in one partition of the keyspace. Read-write transactions
/// are serialized by fjall's single-writer lock, so write conflicts cannot
/// occur; read-only transactions are lock-free snapshots.
///
/// # Blocking
///
/// Beginning a read-write transaction waits until no other one is active.
/// A thread that already holds an active read-write transaction and calls
/// `new_transaction` or `update` again on the same database blocks forever.
/// Commit or discard the first transaction before beginning the next one.
///
/// # Examples
///
/// ```rust,ignore
/// use kvtx::KvDatabase;
/// use kvtx_fjall_adapter::FjallEngine;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = FjallEngine::with_config()
///     .db_path("/path/to/db")
///     .low_memory_preset()
///     .open()?;
///
/// let db = KvDatabase::new(engine);
/// let mut tx = db.new_transaction()?;
/// tx.set("greeting", &b"hello"[..])?;
/// tx.commit()?;
///
/// db.engine().close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FjallEngine {
    inner: Arc<FjallEngineInner>,
}

impl FjallEngine {
    /// Creates a builder for configuring a fjall engine.
    #[inline]
    pub fn with_config() -> FjallEngineBuilder {
        FjallEngineBuilder::new()
    }

    /// Opens (or creates) the keyspace and data partition described by `config`.
    pub fn open(config: FjallConfig) -> FjallResult<FjallEngine> {
        config.validate()?;

        let path = config.db_path().to_string();
        let keyspace = config
            .keyspace_config()
            .open_transactional()
            .map_err(|source| {
                log::error!("Failed to open or create keyspace at {}: {}", path, source);
                FjallError::Open {
                    path: path.clone(),
                    source,
                }
            })?;

        let name = config.partition_name();
        let partition = keyspace
            .open_partition(&name, config.partition_config())
            .map_err(|source| {
                log::error!("Failed to open partition {}: {}", name, source);
                FjallError::Partition {
                    name: name.clone(),
                    source,
                }
            })?;

        log::debug!("Opened fjall engine at {} (partition {})", path, name);
        Ok(FjallEngine {
            inner: Arc::new(FjallEngineInner {
                keyspace,
                partition,
                config,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &FjallConfig {
        &self.inner.config
    }

    pub fn path(&self) -> &str {
        self.inner.config.db_path()
    }

    /// Syncs the journal to disk.
    pub fn persist(&self) -> FjallResult<()> {
        if self.is_closed() {
            return Err(FjallError::Closed);
        }
        self.inner.persist()
    }

    /// Persists outstanding writes and rejects every later transaction.
    ///
    /// Files are released once the last clone of the engine is dropped.
    pub fn close(&self) -> FjallResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.inner.persist();
        log::debug!("Closed fjall engine at {}", self.path());
        result
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Storage backend and version, e.g. `Fjall/2.6.3`.
    pub fn store_version(&self) -> FjallResult<String> {
        fjall_version()
            .map(|version| format!("Fjall/{}", version))
            .map_err(FjallError::Version)
    }
}

impl StorageEngine for FjallEngine {
    type Transaction<'a>
        = FjallTransaction<'a>
    where
        Self: 'a;

    fn begin(&self, mode: TxMode) -> EngineResult<Self::Transaction<'_>> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        let partition = &self.inner.partition;
        let txn = match mode {
            TxMode::ReadOnly => FjallTransaction::Read {
                tx: self.inner.keyspace.read_tx(),
                partition,
            },
            TxMode::ReadWrite => FjallTransaction::Write {
                tx: self.inner.keyspace.write_tx(),
                partition,
            },
        };
        Ok(txn)
    }

    fn name(&self) -> &str {
        "fjall"
    }
}

impl Debug for FjallEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FjallEngine")
            .field("path", &self.path())
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct FjallEngineInner {
    keyspace: TxKeyspace,
    partition: TxPartitionHandle,
    config: FjallConfig,
    closed: AtomicBool,
}

impl FjallEngineInner {
    fn persist(&self) -> FjallResult<()> {
        self.keyspace.persist(PersistMode::SyncAll).map_err(|err| {
            log::error!("Failed to persist keyspace: {}", err);
            FjallError::Persist(err)
        })
    }
}

impl Drop for FjallEngineInner {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) || !self.config.commit_before_close() {
            return;
        }
        match self.persist() {
            Ok(_) => log::debug!("Persisted keyspace during drop"),
            Err(e) => log::error!("Failed to persist keyspace during drop: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{cleanup, create_context, run_test};
    use kvtx::engine::{CursorOptions, EngineCursor, EngineTransaction};

    fn write(engine: &FjallEngine, pairs: &[(&str, &str)]) {
        let mut tx = engine.begin(TxMode::ReadWrite).unwrap();
        for (key, value) in pairs {
            tx.set(key.as_bytes(), value.as_bytes().to_vec()).unwrap();
        }
        tx.commit().unwrap();
    }

    fn keys(cursor: &mut impl EngineCursor) -> Vec<String> {
        let mut keys = vec![];
        while cursor.valid() {
            keys.push(String::from_utf8(cursor.key().unwrap().to_vec()).unwrap());
            cursor.next();
        }
        keys
    }

    #[test]
    fn test_open_and_name() {
        run_test(
            create_context,
            |ctx| {
                let engine = ctx.engine_unsafe();
                assert_eq!(engine.name(), "fjall");
                assert_eq!(engine.path(), ctx.path());
                assert!(!engine.is_closed());
                assert!(format!("{:?}", engine).contains(ctx.path()));
            },
            cleanup,
        );
    }

    #[test]
    fn test_open_without_path_fails() {
        let result = FjallEngine::open(FjallConfig::new());
        assert!(matches!(result, Err(FjallError::MissingPath)));
    }

    #[test]
    fn test_set_get_delete() {
        run_test(
            create_context,
            |ctx| {
                let engine = ctx.engine_unsafe();
                write(&engine, &[("a", "1")]);

                let mut tx = engine.begin(TxMode::ReadWrite).unwrap();
                assert_eq!(tx.get(b"a").unwrap(), b"1".to_vec());
                assert_eq!(tx.get(b"b"), Err(EngineError::KeyNotFound));
                assert_eq!(tx.delete(b"b"), Err(EngineError::KeyNotFound));
                tx.delete(b"a").unwrap();
                assert_eq!(tx.get(b"a"), Err(EngineError::KeyNotFound));
                tx.commit().unwrap();

                let tx = engine.begin(TxMode::ReadOnly).unwrap();
                assert_eq!(tx.get(b"a"), Err(EngineError::KeyNotFound));
            },
            cleanup,
        );
    }

    #[test]
    fn test_read_only_rejects_writes() {
        run_test(
            create_context,
            |ctx| {
                let engine = ctx.engine_unsafe();
                let mut tx = engine.begin(TxMode::ReadOnly).unwrap();
                assert_eq!(tx.set(b"a", vec![1]), Err(EngineError::ReadOnly));
                assert_eq!(tx.delete(b"a"), Err(EngineError::ReadOnly));
                assert!(tx.commit().is_ok());
            },
            cleanup,
        );
    }

    #[test]
    fn test_discard_rolls_back() {
        run_test(
            create_context,
            |ctx| {
                let engine = ctx.engine_unsafe();
                let mut tx = engine.begin(TxMode::ReadWrite).unwrap();
                tx.set(b"a", b"1".to_vec()).unwrap();
                tx.discard();

                let tx = engine.begin(TxMode::ReadOnly).unwrap();
                assert_eq!(tx.get(b"a"), Err(EngineError::KeyNotFound));
            },
            cleanup,
        );
    }

    #[test]
    fn test_snapshot_does_not_see_later_commit() {
        run_test(
            create_context,
            |ctx| {
                let engine = ctx.engine_unsafe();
                write(&engine, &[("a", "1")]);
                let snapshot = engine.begin(TxMode::ReadOnly).unwrap();
                write(&engine, &[("a", "2"), ("b", "3")]);

                assert_eq!(snapshot.get(b"a").unwrap(), b"1".to_vec());
                assert_eq!(snapshot.get(b"b"), Err(EngineError::KeyNotFound));
            },
            cleanup,
        );
    }

    #[test]
    fn test_cursor_positioning() {
        run_test(
            create_context,
            |ctx| {
                let engine = ctx.engine_unsafe();
                write(&engine, &[("a", "1"), ("b", "2"), ("d", "4")]);
                let tx = engine.begin(TxMode::ReadOnly).unwrap();

                let mut forward = tx.cursor(CursorOptions::forward()).unwrap();
                assert!(!forward.valid());
                forward.rewind();
                assert_eq!(keys(&mut forward), vec!["a", "b", "d"]);
                forward.seek(b"c");
                assert_eq!(forward.key().unwrap(), b"d");
                assert_eq!(forward.value().unwrap(), b"4".to_vec());

                let mut reverse = tx.cursor(CursorOptions::reverse()).unwrap();
                reverse.rewind();
                assert_eq!(keys(&mut reverse), vec!["d", "b", "a"]);
                reverse.seek(b"c");
                assert_eq!(reverse.key().unwrap(), b"b");
                reverse.seek(b"0");
                assert!(!reverse.valid());

                forward.close();
                assert!(!forward.valid());
            },
            cleanup,
        );
    }

    #[test]
    fn test_cursor_sees_uncommitted_writes() {
        run_test(
            create_context,
            |ctx| {
                let engine = ctx.engine_unsafe();
                write(&engine, &[("a", "1"), ("c", "3")]);

                let mut tx = engine.begin(TxMode::ReadWrite).unwrap();
                tx.set(b"b", b"2".to_vec()).unwrap();
                tx.delete(b"c").unwrap();
                let mut cursor = tx.cursor(CursorOptions::forward()).unwrap();
                cursor.rewind();
                assert_eq!(keys(&mut cursor), vec!["a", "b"]);
            },
            cleanup,
        );
    }

    #[test]
    fn test_close_rejects_new_transactions() {
        run_test(
            create_context,
            |ctx| {
                let engine = ctx.engine_unsafe();
                engine.close().unwrap();
                assert!(engine.is_closed());
                assert!(engine.close().is_ok());
                assert!(matches!(engine.begin(TxMode::ReadOnly), Err(EngineError::Closed)));
                assert!(matches!(engine.persist(), Err(FjallError::Closed)));
            },
            cleanup,
        );
    }

    #[test]
    fn test_reopen_recovers_committed_data() {
        run_test(
            create_context,
            |ctx| {
                let engine = ctx.engine_unsafe();
                write(&engine, &[("a", "1"), ("b", "2")]);
                engine.persist().unwrap();
                drop(engine);
                ctx.reopen();

                let engine = ctx.engine_unsafe();
                let tx = engine.begin(TxMode::ReadOnly).unwrap();
                assert_eq!(tx.get(b"a").unwrap(), b"1".to_vec());
                assert_eq!(tx.get(b"b").unwrap(), b"2".to_vec());
            },
            cleanup,
        );
    }

    #[test]
    fn test_store_version() {
        run_test(
            create_context,
            |ctx| {
                let version = ctx.engine_unsafe().store_version().unwrap();
                assert!(version.starts_with("Fjall/2"));
            },
            cleanup,
        );
    }

    #[test]
    fn test_second_writer_waits_for_first() {
        use std::sync::mpsc;
        use std::time::Duration;

        run_test(
            create_context,
            |ctx| {
                let engine = ctx.engine_unsafe();
                let mut first = engine.begin(TxMode::ReadWrite).unwrap();
                first.set(b"k", b"first".to_vec()).unwrap();

                let (began, waiting) = mpsc::channel();
                std::thread::scope(|scope| {
                    scope.spawn(|| {
                        let second = engine.begin(TxMode::ReadWrite).unwrap();
                        began.send(second.get(b"k").unwrap()).unwrap();
                        second.discard();
                    });

                    assert!(waiting.recv_timeout(Duration::from_millis(200)).is_err());
                    first.commit().unwrap();
                    let seen = waiting.recv_timeout(Duration::from_secs(10)).unwrap();
                    assert_eq!(seen, b"first".to_vec());
                });
            },
            cleanup,
        );
    }
}
