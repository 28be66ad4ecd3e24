use crate::error::to_engine_error;
use fjall::{ReadTransaction, TxPartitionHandle, UserKey, UserValue, WriteTransaction};
use kvtx::engine::{CursorOptions, EngineCursor, EngineError, EngineResult, EngineTransaction};
use std::ops::Bound::{self, Included, Unbounded};

type KvPair = (UserKey, UserValue);
type RangeIter<'c> = Box<dyn DoubleEndedIterator<Item = fjall::Result<KvPair>> + 'c>;

/// A fjall transaction bound to the engine's data partition.
///
/// Read-write transactions are fjall write transactions, which the keyspace
/// serializes: beginning one blocks until the previous one is committed or
/// dropped. Read-only transactions are fjall snapshots and never block.
pub enum FjallTransaction<'a> {
    Read {
        tx: ReadTransaction,
        partition: &'a TxPartitionHandle,
    },
    Write {
        tx: WriteTransaction<'a>,
        partition: &'a TxPartitionHandle,
    },
}

impl<'a> FjallTransaction<'a> {
    fn range(&self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> RangeIter<'_> {
        match self {
            FjallTransaction::Read { tx, partition } => {
                Box::new(tx.range(partition, (lower, upper)))
            }
            FjallTransaction::Write { tx, partition } => {
                Box::new(tx.range(partition, (lower, upper)))
            }
        }
    }
}

impl<'a> EngineTransaction for FjallTransaction<'a> {
    type Cursor<'c>
        = FjallCursor<'c, 'a>
    where
        Self: 'c;

    fn get(&self, key: &[u8]) -> EngineResult<Vec<u8>> {
        let result = match self {
            FjallTransaction::Read { tx, partition } => tx.get(partition, key),
            FjallTransaction::Write { tx, partition } => tx.get(partition, key),
        };
        match result {
            Ok(Some(value)) => Ok(value.to_vec()),
            Ok(None) => Err(EngineError::KeyNotFound),
            Err(err) => Err(to_engine_error(err)),
        }
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> EngineResult<()> {
        match self {
            FjallTransaction::Read { .. } => Err(EngineError::ReadOnly),
            FjallTransaction::Write { tx, partition } => {
                tx.insert(*partition, key, value);
                Ok(())
            }
        }
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<()> {
        match self {
            FjallTransaction::Read { .. } => Err(EngineError::ReadOnly),
            FjallTransaction::Write { tx, partition } => {
                match tx.get(*partition, key) {
                    Ok(Some(_)) => {}
                    Ok(None) => return Err(EngineError::KeyNotFound),
                    Err(err) => return Err(to_engine_error(err)),
                }
                tx.remove(*partition, key);
                Ok(())
            }
        }
    }

    fn cursor(&self, options: CursorOptions) -> EngineResult<Self::Cursor<'_>> {
        Ok(FjallCursor {
            tx: self,
            reverse: options.reverse,
            iter: None,
            current: None,
            error: None,
            closed: false,
        })
    }

    fn commit(self) -> EngineResult<()> {
        match self {
            FjallTransaction::Read { .. } => Ok(()),
            FjallTransaction::Write { tx, .. } => tx.commit().map_err(|err| {
                log::error!("Fjall write transaction failed to commit: {}", err);
                to_engine_error(err)
            }),
        }
    }

    // dropping a fjall write transaction rolls it back and releases the writer lock
    fn discard(self) {}
}

/// Positional cursor over a fjall range iterator.
///
/// `rewind` and `seek` open a fresh range iterator from the transaction;
/// `next` keeps pulling from it, from the back in reverse mode.
pub struct FjallCursor<'c, 'a> {
    tx: &'c FjallTransaction<'a>,
    reverse: bool,
    iter: Option<RangeIter<'c>>,
    current: Option<KvPair>,
    error: Option<EngineError>,
    closed: bool,
}

impl<'c, 'a> FjallCursor<'c, 'a> {
    fn open(&mut self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) {
        if self.closed {
            return;
        }
        self.iter = Some(self.tx.range(lower, upper));
        self.step();
    }

    fn step(&mut self) {
        let item = match self.iter.as_mut() {
            Some(iter) if self.reverse => iter.next_back(),
            Some(iter) => iter.next(),
            None => None,
        };
        match item {
            Some(Ok(pair)) => {
                self.current = Some(pair);
                self.error = None;
            }
            Some(Err(err)) => {
                self.current = None;
                self.error = Some(to_engine_error(err));
            }
            None => {
                self.current = None;
                self.error = None;
                self.iter = None;
            }
        }
    }
}

impl EngineCursor for FjallCursor<'_, '_> {
    fn rewind(&mut self) {
        self.open(Unbounded, Unbounded);
    }

    fn seek(&mut self, key: &[u8]) {
        if self.reverse {
            self.open(Unbounded, Included(key.to_vec()));
        } else {
            self.open(Included(key.to_vec()), Unbounded);
        }
    }

    fn valid(&self) -> bool {
        !self.closed && (self.current.is_some() || self.error.is_some())
    }

    fn key(&self) -> EngineResult<&[u8]> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        match &self.current {
            Some((key, _)) => Ok(&key[..]),
            None => Err(EngineError::Backend("cursor is not positioned".to_string())),
        }
    }

    fn value(&self) -> EngineResult<Vec<u8>> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        match &self.current {
            Some((_, value)) => Ok(value.to_vec()),
            None => Err(EngineError::Backend("cursor is not positioned".to_string())),
        }
    }

    fn next(&mut self) {
        if self.error.is_some() {
            // a failed read ends the underlying iterator
            self.error = None;
            self.iter = None;
            return;
        }
        if self.current.is_some() {
            self.step();
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.iter = None;
        self.current = None;
        self.error = None;
    }
}
