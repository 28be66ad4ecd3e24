//! Persistent [`kvtx`] storage engine backed by the fjall LSM-tree keyspace.
//!
//! ```rust,ignore
//! use kvtx::KvDatabase;
//! use kvtx_fjall_adapter::FjallEngine;
//!
//! let engine = FjallEngine::with_config()
//!     .db_path("/path/to/db")
//!     .production_preset()
//!     .open()?;
//! let db = KvDatabase::new(engine);
//! ```

mod builder;
mod config;
mod engine;
mod error;
mod transaction;
mod version;

pub use builder::*;
pub use config::*;
pub use engine::*;
pub use error::{FjallError, FjallResult};
pub use transaction::{FjallCursor, FjallTransaction};

#[cfg(test)]
mod tests {
    use crate::{FjallConfig, FjallEngine};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use std::{fs, thread};

    #[derive(Clone)]
    pub struct Context {
        path: String,
        engine: Arc<Mutex<Option<FjallEngine>>>,
    }

    impl Context {
        pub fn new(path: String, engine: Option<FjallEngine>) -> Self {
            Context {
                path,
                engine: Arc::new(Mutex::new(engine)),
            }
        }

        pub fn path(&self) -> &str {
            &self.path
        }

        pub fn engine(&self) -> Result<FjallEngine, String> {
            self.engine
                .lock()
                .clone()
                .ok_or_else(|| "FjallEngine not available".to_string())
        }

        pub fn engine_unsafe(&self) -> FjallEngine {
            self.engine().expect("FjallEngine not available")
        }

        /// Closes the current engine and opens the same path again.
        /// Callers must drop their own engine clones first.
        pub fn reopen(&self) {
            let mut guard = self.engine.lock();
            if let Some(engine) = guard.take() {
                if let Err(e) = engine.close() {
                    log::error!("Failed to close FjallEngine before reopen: {}", e);
                }
            }
            *guard = Some(open_engine(&self.path));
        }

        fn release(&self) {
            if let Some(engine) = self.engine.lock().take() {
                if let Err(e) = engine.close() {
                    log::error!("Failed to close FjallEngine during cleanup: {}", e);
                }
            }
        }
    }

    pub fn run_test<T, B, A>(before: B, test: T, after: A)
    where
        T: FnOnce(Context) + std::panic::UnwindSafe,
        B: FnOnce() -> Context + std::panic::UnwindSafe,
        A: FnOnce(Context) + std::panic::UnwindSafe,
    {
        let result = std::panic::catch_unwind(|| {
            let ctx = before();
            test(ctx.clone());
            after(ctx);
        });

        if let Err(e) = result {
            let panic_msg = if let Some(msg) = e.downcast_ref::<String>() {
                msg.clone()
            } else if let Some(msg) = e.downcast_ref::<&str>() {
                msg.to_string()
            } else {
                format!("{:?}", e)
            };

            eprintln!("Test execution failed with panic: {}", panic_msg);
            panic!("Test execution failed with panic: {}", panic_msg);
        }
    }

    pub fn random_path() -> String {
        let id = uuid::Uuid::new_v4();
        PathBuf::from(std::env::temp_dir())
            .join(format!("kvtx-fjall-{}", id))
            .to_string_lossy()
            .to_string()
    }

    fn open_engine(path: &str) -> FjallEngine {
        FjallEngine::with_config()
            .low_memory_preset()
            .db_path(path)
            .open()
            .expect("failed to open fjall engine")
    }

    pub fn create_context() -> Context {
        let path = random_path();
        let engine = open_engine(&path);
        Context::new(path, Some(engine))
    }

    pub fn cleanup(ctx: Context) {
        ctx.release();
        let mut retry = 0;
        while fs::remove_dir_all(ctx.path()).is_err() && retry < 2 {
            thread::sleep(Duration::from_millis(100));
            retry += 1;
        }
    }

    #[test]
    fn test_context_without_engine() {
        let ctx = Context::new("unused".to_string(), None);
        assert!(ctx.engine().is_err());
    }

    #[test]
    fn test_harness_preserves_panic_message() {
        let caught = std::panic::catch_unwind(|| {
            run_test(
                || Context::new("unused".to_string(), None),
                |_ctx| panic!("expected failure"),
                |_ctx| {},
            );
        });

        let err = caught.unwrap_err();
        let msg = err.downcast_ref::<String>().cloned().unwrap_or_default();
        assert!(msg.contains("Test execution failed with panic"));
        assert!(msg.contains("expected failure"));
    }

    #[test]
    fn test_harness_passes_without_panic() {
        let caught = std::panic::catch_unwind(|| {
            run_test(|| Context::new("unused".to_string(), None), |_ctx| {}, |_ctx| {});
        });
        assert!(caught.is_ok());
    }

    #[test]
    fn test_cleanup_removes_directory() {
        let ctx = create_context();
        let path = ctx.path().to_string();
        assert!(fs::metadata(&path).is_ok());
        cleanup(ctx);
        assert!(fs::metadata(&path).is_err());
    }

    #[test]
    fn test_config_default_matches_new() {
        let config = FjallConfig::default();
        assert_eq!(config.partition_name(), FjallConfig::new().partition_name());
    }
}
