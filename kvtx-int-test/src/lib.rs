//! Engine-agnostic conformance suites for kvtx.
//!
//! Each suite takes a [`kvtx::KvDatabase`] over an empty store and panics or
//! returns an error on the first violated expectation. The `tests/` directory
//! runs them against every engine through [`test_util::run_test`].

pub mod bank;
pub mod basic;
pub mod range;
pub mod test_util;
pub mod txops;

pub use bank::{BankReport, BankTest};
pub use basic::run_basic_ops;
pub use range::{run_random_range_ops, run_range_ops};
pub use txops::{run_conflict_ops, run_tx_ops};
