//! Storage engine capability.
//!
//! The key-value layer never talks to a concrete engine. It needs three
//! things from one: a way to begin a transaction, point operations inside a
//! transaction, and a positional cursor that can rewind, seek and step in
//! either key order. Any ordered engine that can provide those plugs in by
//! implementing the traits below.

pub mod memory;

use thiserror::Error;

/// Errors reported by an engine implementation.
///
/// These are internal to the engine seam; the transaction layer translates
/// them into [`KvError`](crate::errors::KvError) before returning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The key is not present in the transaction's view
    #[error("key not found")]
    KeyNotFound,
    /// Another transaction committed a conflicting change first
    #[error("transaction conflict")]
    Conflict,
    /// A write was attempted through a read-only transaction
    #[error("transaction is read-only")]
    ReadOnly,
    /// The engine has been closed
    #[error("engine is closed")]
    Closed,
    /// Stored data could not be decoded
    #[error("data corrupted: {0}")]
    Corrupted(String),
    /// Any other backend failure
    #[error("{0}")]
    Backend(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Access mode of an engine transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxMode {
    ReadWrite,
    ReadOnly,
}

impl TxMode {
    pub fn is_update(&self) -> bool {
        matches!(self, TxMode::ReadWrite)
    }
}

/// Options for a new cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorOptions {
    /// Iterate keys from largest to smallest.
    pub reverse: bool,
}

impl CursorOptions {
    pub fn forward() -> Self {
        CursorOptions { reverse: false }
    }

    pub fn reverse() -> Self {
        CursorOptions { reverse: true }
    }
}

/// An ordered storage engine that hands out transactions.
pub trait StorageEngine: Send + Sync {
    /// The transaction type for this engine.
    type Transaction<'a>: EngineTransaction
    where
        Self: 'a;

    /// Begin a transaction in the given mode.
    fn begin(&self, mode: TxMode) -> EngineResult<Self::Transaction<'_>>;

    /// Short engine name used in log records.
    fn name(&self) -> &str;
}

/// One engine transaction.
///
/// Reads observe a consistent snapshot plus the transaction's own writes.
pub trait EngineTransaction {
    /// The cursor type for iteration.
    type Cursor<'a>: EngineCursor
    where
        Self: 'a;

    /// Returns an owned copy of the value, or [`EngineError::KeyNotFound`].
    fn get(&self, key: &[u8]) -> EngineResult<Vec<u8>>;

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> EngineResult<()>;

    /// Removes the key, or reports [`EngineError::KeyNotFound`] when it is
    /// absent from the transaction's view.
    fn delete(&mut self, key: &[u8]) -> EngineResult<()>;

    /// Creates an unpositioned cursor; call `rewind` or `seek` before use.
    fn cursor(&self, options: CursorOptions) -> EngineResult<Self::Cursor<'_>>;

    fn commit(self) -> EngineResult<()>;

    /// Releases the transaction without applying its writes.
    fn discard(self);
}

/// A positional cursor over the keys visible to one transaction.
///
/// In reverse mode every positioning primitive is mirrored: `rewind` goes
/// to the last key, `seek(k)` lands on the largest key `<= k`, and `next`
/// moves towards smaller keys.
pub trait EngineCursor {
    /// Positions at the first key in iteration order.
    fn rewind(&mut self);

    /// Positions at the first key `>= key` (reverse mode: the last key `<= key`).
    fn seek(&mut self, key: &[u8]);

    /// True while the cursor is positioned at an entry. An entry that failed
    /// to load still counts as positioned; `key` or `value` report the error.
    fn valid(&self) -> bool;

    fn key(&self) -> EngineResult<&[u8]>;

    /// Returns an owned copy of the current value.
    fn value(&self) -> EngineResult<Vec<u8>>;

    fn next(&mut self);

    /// Releases the cursor; it is invalid afterwards.
    fn close(&mut self);
}
