use kvtx::engine::memory::InMemoryEngine;
use kvtx::engine::{EngineCursor, StorageEngine};
use kvtx::errors::{ErrorKind, KvError, KvResult};
use kvtx::{KvDatabase, KvDatabaseBuilder, KvIter};
use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, fs, thread};

/// Engines the suites can be run against.
pub trait TestEngine: StorageEngine + Clone + Sized + 'static {
    /// Whether committed data survives [`TestEngine::reopen`].
    const PERSISTENT: bool;

    fn create(path: &str) -> KvResult<Self>;

    /// Closes this engine and opens the same store again.
    fn reopen(self, path: &str) -> KvResult<Self>;

    fn shutdown(&self) -> KvResult<()>;
}

impl TestEngine for InMemoryEngine {
    const PERSISTENT: bool = false;

    fn create(_path: &str) -> KvResult<Self> {
        Ok(InMemoryEngine::new())
    }

    // nothing to recover from, keep the live engine
    fn reopen(self, _path: &str) -> KvResult<Self> {
        Ok(self)
    }

    fn shutdown(&self) -> KvResult<()> {
        self.close();
        Ok(())
    }
}

#[cfg(feature = "fjall")]
impl TestEngine for kvtx_fjall_adapter::FjallEngine {
    const PERSISTENT: bool = true;

    fn create(path: &str) -> KvResult<Self> {
        // Use low_memory_preset for tests to keep the thread count down
        Ok(kvtx_fjall_adapter::FjallEngine::with_config()
            .db_path(path)
            .low_memory_preset()
            .open()?)
    }

    fn reopen(self, path: &str) -> KvResult<Self> {
        self.close()?;
        drop(self);
        Self::create(path)
    }

    fn shutdown(&self) -> KvResult<()> {
        Ok(self.close()?)
    }
}

/// Runs a test with retry logic and error handling.
/// Tests run on the current thread to avoid thread exhaustion when running many tests in parallel.
pub fn run_test<C, T, B, A>(before: B, test: T, after: A)
where
    C: Clone,
    T: Fn(C) -> KvResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> KvResult<C> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(C) -> KvResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;
    let mut last_backtrace: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => after(ctx)
                        .map_err(|e| (format!("After run failed: {:?}", e), backtrace.to_string())),
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();

        let failure = match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => {
                last_backtrace = Some(bt);
                e
            }
            Err(panic_err) => {
                let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    format!("Unknown panic: {:?}", panic_err.type_id())
                };
                last_backtrace = Some(Backtrace::capture().to_string());
                format!("Panic: {}", err_msg)
            }
        };

        if attempt < MAX_RETRIES {
            eprintln!(
                "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                attempt, MAX_RETRIES, elapsed
            );
            eprintln!("Error: {}", failure);
            eprintln!("Retrying in {}ms...\n", 100 * attempt);
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
        last_error = Some(failure);
    }

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Failed after {} attempts", MAX_RETRIES);
    eprintln!("Last error: {}", last_error.as_deref().unwrap_or("Unknown"));
    if let Some(bt) = &last_backtrace {
        if !bt.is_empty() && !bt.contains("disabled") {
            eprintln!("\nBacktrace:\n{}", bt);
        }
    }
    eprintln!("=====================================================\n");

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

/// A database opened on a fresh store, plus the path it lives at.
///
/// Clones share the database. [`TestContext::reopen`] swaps the database
/// for one opened on the same path, so tests must drop every `KvDatabase`
/// they obtained from [`TestContext::db`] before calling it.
pub struct TestContext<E: TestEngine> {
    path: String,
    db: Arc<Mutex<Option<KvDatabase<E>>>>,
}

impl<E: TestEngine> Clone for TestContext<E> {
    fn clone(&self) -> Self {
        TestContext {
            path: self.path.clone(),
            db: Arc::clone(&self.db),
        }
    }
}

impl<E: TestEngine> TestContext<E> {
    pub fn new(path: String, db: KvDatabase<E>) -> Self {
        Self {
            path,
            db: Arc::new(Mutex::new(Some(db))),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn db(&self) -> KvResult<KvDatabase<E>> {
        self.db
            .lock()
            .clone()
            .ok_or_else(|| KvError::new("test database is closed", ErrorKind::IOFailure))
    }

    pub fn is_persistent(&self) -> bool {
        E::PERSISTENT
    }

    pub fn reopen(&self) -> KvResult<()> {
        let mut guard = self.db.lock();
        let db = guard
            .take()
            .ok_or_else(|| KvError::new("test database is closed", ErrorKind::IOFailure))?;
        let checker = db.key_checker().clone();
        let cancel = db.cancellation_token().clone();
        let engine = db.engine().clone();
        drop(db);

        let engine = engine.reopen(&self.path)?;
        *guard = Some(
            KvDatabaseBuilder::new()
                .checker(checker)
                .cancellation(cancel)
                .open(engine),
        );
        Ok(())
    }

    fn close(&self) -> KvResult<()> {
        match self.db.lock().take() {
            Some(db) => db.engine().shutdown(),
            None => Ok(()),
        }
    }
}

pub fn random_path() -> String {
    let id = uuid::Uuid::new_v4();
    let temp_dir = env::temp_dir();
    temp_dir
        .join(format!("kvtx-{}", id))
        .to_string_lossy()
        .to_string()
}

pub fn create_context<E: TestEngine>() -> KvResult<TestContext<E>> {
    const MAX_ATTEMPTS: u32 = 3;
    let mut last_error: Option<KvError> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let path = random_path();
        match E::create(&path) {
            Ok(engine) => return Ok(TestContext::new(path, KvDatabase::new(engine))),
            Err(e) => {
                let _ = fs::remove_dir_all(&path);
                if attempt < MAX_ATTEMPTS {
                    eprintln!(
                        "Warning: Failed to create test context (attempt {}/{}): {:?}",
                        attempt, MAX_ATTEMPTS, e
                    );
                    thread::sleep(Duration::from_millis(50 * attempt as u64));
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| KvError::new("Failed to create test context", ErrorKind::IOFailure)))
}

pub fn create_memory_context() -> KvResult<TestContext<InMemoryEngine>> {
    create_context()
}

#[cfg(feature = "fjall")]
pub fn create_fjall_context() -> KvResult<TestContext<kvtx_fjall_adapter::FjallEngine>> {
    create_context()
}

pub fn cleanup<E: TestEngine>(ctx: TestContext<E>) -> KvResult<()> {
    ctx.close()?;
    if E::PERSISTENT {
        let mut retry = 0;
        while fs::remove_dir_all(ctx.path()).is_err() && retry < 2 {
            thread::sleep(Duration::from_millis(100));
            retry += 1;
        }
    }
    Ok(())
}

/// Drains a range iterator into owned pairs, stopping at the first failure.
pub fn collect<C: EngineCursor>(iter: KvIter<C>) -> KvResult<Vec<(String, Vec<u8>)>> {
    iter.into_iter().collect()
}

/// Keys of `pairs`, in order.
pub fn keys_of(pairs: &[(String, Vec<u8>)]) -> Vec<&str> {
    pairs.iter().map(|(k, _)| k.as_str()).collect()
}
