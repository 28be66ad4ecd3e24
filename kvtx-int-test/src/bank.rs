//! Concurrent bank transfers.
//!
//! Every account holds a balance stored as a decimal string. Workers move
//! random amounts between random accounts, each move in its own
//! transaction, while an auditor keeps summing all balances through
//! snapshots. Whatever commits or fails, every snapshot must see the same
//! total.

use kvtx::engine::StorageEngine;
use kvtx::errors::{ErrorKind, KvError, KvResult};
use kvtx::{KvDatabase, KvTransaction};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

const ACCOUNT_PREFIX: &str = "account/";
// first key after every "account/..." key
const ACCOUNT_END: &str = "account0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankTest {
    accounts: usize,
    initial_balance: u64,
    workers: usize,
    transfers_per_worker: usize,
}

/// Outcome of one [`BankTest::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BankReport {
    pub committed: usize,
    pub failed: usize,
    pub audits: usize,
}

impl BankTest {
    pub fn new(accounts: usize, initial_balance: u64) -> Self {
        BankTest {
            accounts,
            initial_balance,
            workers: 4,
            transfers_per_worker: 100,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn transfers_per_worker(mut self, transfers: usize) -> Self {
        self.transfers_per_worker = transfers;
        self
    }

    pub fn expected_total(&self) -> u64 {
        self.accounts as u64 * self.initial_balance
    }

    pub fn account_key(index: usize) -> String {
        format!("{}{:06}", ACCOUNT_PREFIX, index)
    }

    /// Creates every account with the initial balance in one transaction.
    pub fn setup<E: StorageEngine>(&self, db: &KvDatabase<E>) -> KvResult<()> {
        db.update(|tx| {
            for index in 0..self.accounts {
                let balance = self.initial_balance.to_string();
                tx.set(&Self::account_key(index), balance.as_bytes())?;
            }
            Ok(())
        })
    }

    /// Sums every balance as seen by one snapshot, checking the account count.
    pub fn total<E: StorageEngine>(&self, db: &KvDatabase<E>) -> KvResult<u64> {
        db.view(|snapshot| {
            let mut total = 0u64;
            let mut count = 0usize;
            for item in snapshot.ascend(ACCOUNT_PREFIX, ACCOUNT_END)? {
                let (key, value) = item?;
                total += parse_balance(&key, &value)?;
                count += 1;
            }
            if count != self.accounts {
                return Err(KvError::new(
                    &format!("expected {} accounts, found {}", self.accounts, count),
                    ErrorKind::IOFailure,
                ));
            }
            Ok(total)
        })
    }

    /// Runs the workers and the auditor to completion.
    ///
    /// Commit failures are counted, not returned; any other failure, or an
    /// audit that sees the wrong total, ends the run with an error.
    pub fn run<E: StorageEngine>(&self, db: &KvDatabase<E>) -> KvResult<BankReport> {
        let committed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let done = AtomicBool::new(false);

        let (worker_results, audits) = thread::scope(|scope| {
            let mut workers = Vec::with_capacity(self.workers);
            for _ in 0..self.workers {
                workers.push(scope.spawn(|| -> KvResult<()> {
                    let mut rng = rand::rng();
                    for _ in 0..self.transfers_per_worker {
                        if self.transfer(db, &mut rng)? {
                            committed.fetch_add(1, Ordering::Relaxed);
                        } else {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Ok(())
                }));
            }

            let auditor = scope.spawn(|| -> KvResult<usize> {
                let mut audits = 0;
                while !done.load(Ordering::Acquire) {
                    self.audit(db)?;
                    audits += 1;
                    thread::yield_now();
                }
                Ok(audits)
            });

            let results: Vec<KvResult<()>> = workers.into_iter().map(join).collect();
            done.store(true, Ordering::Release);
            (results, join(auditor))
        });

        for result in worker_results {
            result?;
        }
        let audits = audits?;
        self.audit(db)?;

        let report = BankReport {
            committed: committed.into_inner(),
            failed: failed.into_inner(),
            audits,
        };
        log::debug!("Bank run finished: {:?}", report);
        Ok(report)
    }

    fn audit<E: StorageEngine>(&self, db: &KvDatabase<E>) -> KvResult<()> {
        let total = self.total(db)?;
        if total != self.expected_total() {
            return Err(KvError::new(
                &format!(
                    "balance total drifted: expected {}, found {}",
                    self.expected_total(),
                    total
                ),
                ErrorKind::IOFailure,
            ));
        }
        Ok(())
    }

    /// One random transfer. Returns whether it committed.
    fn transfer<E: StorageEngine, R: Rng>(&self, db: &KvDatabase<E>, rng: &mut R) -> KvResult<bool> {
        if self.accounts < 2 {
            return Ok(false);
        }
        let from = rng.random_range(0..self.accounts);
        let mut to = rng.random_range(0..self.accounts - 1);
        if to >= from {
            to += 1;
        }

        let mut tx = db.new_transaction()?;
        let from_key = Self::account_key(from);
        let to_key = Self::account_key(to);
        let from_balance = read_balance(&tx, &from_key)?;
        let to_balance = read_balance(&tx, &to_key)?;

        let amount = rng.random_range(0..=from_balance.min(self.initial_balance));
        if amount == 0 {
            tx.discard()?;
            return Ok(false);
        }

        tx.set(&from_key, (from_balance - amount).to_string().as_bytes())?;
        tx.set(&to_key, (to_balance + amount).to_string().as_bytes())?;
        match tx.commit() {
            Ok(()) => Ok(true),
            Err(err) => {
                log::debug!("Transfer {} -> {} not committed: {}", from, to, err);
                Ok(false)
            }
        }
    }
}

fn read_balance<E: StorageEngine>(tx: &KvTransaction<'_, E>, key: &str) -> KvResult<u64> {
    let value = tx.get(key)?;
    parse_balance(key, &value)
}

fn parse_balance(key: &str, value: &[u8]) -> KvResult<u64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            KvError::new(
                &format!("balance of {} is not a number: {:?}", key, value),
                ErrorKind::IOFailure,
            )
        })
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, KvResult<T>>) -> KvResult<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(KvError::new("bank thread panicked", ErrorKind::IOFailure)))
}
