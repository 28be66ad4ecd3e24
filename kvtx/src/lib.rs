//! # kvtx - Transactional key-value access layer
//!
//! kvtx exposes a small, engine-agnostic contract over an embedded ordered
//! storage engine: transactions, read-only snapshots, point operations and
//! half-open range iteration. Callers depend only on this contract and never
//! on an engine's native API.
//!
//! ## Key Features
//!
//! - **Engine-agnostic**: any ordered engine implementing [`engine::StorageEngine`] plugs in
//! - **Transactions and snapshots**: explicit lifecycle with `AlreadyDone` after termination
//! - **Range iteration**: `scan`, `ascend` and `descend` over `[begin, end)`
//! - **Key validation**: empty keys are rejected, an optional predicate decides the rest
//! - **Cancellation**: a shared token makes later operations fail fast
//! - **In-memory engine**: snapshot-isolated reference engine for tests and scratch data
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kvtx::database::KvDatabase;
//! use kvtx::engine::memory::InMemoryEngine;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = KvDatabase::new(InMemoryEngine::new());
//!
//! let mut tx = db.new_transaction()?;
//! tx.set("a", &b"1"[..])?;
//! tx.set("b", &b"2"[..])?;
//! tx.set("c", &b"3"[..])?;
//! tx.commit()?;
//!
//! let snapshot = db.new_snapshot()?;
//! for item in snapshot.descend("a", "c")? {
//!     let (key, value) = item?;
//!     println!("{key} = {value:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cancel`] - Cooperative cancellation tokens
//! - [`checker`] - Key validation
//! - [`database`] - Database handle and builder
//! - [`engine`] - Storage engine capability and the in-memory engine
//! - [`errors`] - Error types and result definitions
//! - [`iter`] - Range iterator
//! - [`range`] - Half-open key ranges
//! - [`transaction`] - Transaction and snapshot handles

pub mod cancel;
pub mod checker;
pub mod database;
pub mod engine;
pub mod errors;
pub mod iter;
pub mod range;
pub mod transaction;

pub use cancel::CancellationToken;
pub use checker::KeyChecker;
pub use database::{KvDatabase, KvDatabaseBuilder};
pub use errors::{ErrorKind, KvError, KvResult};
pub use iter::KvIter;
pub use range::KeyRange;
pub use transaction::{KvSnapshot, KvTransaction, TransactionState};
