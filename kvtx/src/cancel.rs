use crate::errors::{KvError, KvResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation signal for database handles.
///
/// Clones share one flag, so a token can be cancelled from any thread.
/// Cancellation is observed when an operation starts, never while one is
/// running: once the token fires, every later `get`, `set`, `delete`,
/// `commit`, range creation and iterator step fails fast with
/// [`ErrorKind::Cancelled`](crate::errors::ErrorKind::Cancelled) before
/// touching the engine. Discarding a handle always succeeds.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Requests cancellation. Irreversible.
    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The tokens one handle observes: the database's, plus the handle's own
/// when it was created with one.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelScope {
    tokens: Vec<CancellationToken>,
}

impl CancelScope {
    pub(crate) fn new(database: &CancellationToken, handle: Option<&CancellationToken>) -> Self {
        let mut tokens = vec![database.clone()];
        tokens.extend(handle.cloned());
        CancelScope { tokens }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.tokens.iter().any(CancellationToken::is_cancelled)
    }

    pub(crate) fn check(&self) -> KvResult<()> {
        if self.is_cancelled() {
            Err(KvError::cancelled())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_scope_fires_on_either_token() {
        let database = CancellationToken::new();
        let handle = CancellationToken::new();

        let scope = CancelScope::new(&database, Some(&handle));
        assert!(scope.check().is_ok());
        handle.cancel();
        assert!(scope.check().unwrap_err().is_cancelled());

        let database_only = CancelScope::new(&database, None);
        assert!(!database_only.is_cancelled());
        database.cancel();
        assert!(database_only.is_cancelled());
    }

    #[test]
    fn test_default_scope_never_fires() {
        assert!(!CancelScope::default().is_cancelled());
    }
}
