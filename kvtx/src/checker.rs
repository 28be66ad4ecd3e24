use std::fmt::{Debug, Formatter};
use std::sync::Arc;

type AcceptFn = dyn Fn(&str) -> bool + Send + Sync;

/// Decides whether a key is legal for a database instance.
///
/// Empty keys are always rejected. Any other key is accepted unless an
/// acceptance predicate was injected, in which case the predicate decides.
/// The checker is cheap to clone and is shared read-only between a database
/// handle and every transaction it creates.
#[derive(Clone, Default)]
pub struct KeyChecker {
    accept: Option<Arc<AcceptFn>>,
}

impl KeyChecker {
    /// A checker that only rejects empty keys.
    pub fn new() -> Self {
        KeyChecker { accept: None }
    }

    /// A checker that defers every non-empty key to `accept`.
    pub fn with_predicate<F>(accept: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        KeyChecker {
            accept: Some(Arc::new(accept)),
        }
    }

    pub fn has_predicate(&self) -> bool {
        self.accept.is_some()
    }

    #[inline]
    pub fn accepts(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        match &self.accept {
            Some(accept) => accept(key),
            None => true,
        }
    }
}

impl Debug for KeyChecker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyChecker")
            .field("has_predicate", &self.has_predicate())
            .finish()
    }
}
