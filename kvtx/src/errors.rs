use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

use crate::engine::EngineError;

/// Error categories exposed by the key-value layer.
///
/// Engine specific failures never surface with their own types; they are
/// folded into [`ErrorKind::IOFailure`] with the engine message preserved in
/// the error chain.
///
/// # Examples
///
/// ```rust,ignore
/// use kvtx::errors::{ErrorKind, KvError, KvResult};
///
/// fn example() -> KvResult<()> {
///     Err(KvError::new("key must not be empty", ErrorKind::InvalidArgument))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ErrorKind {
    /// A key was rejected by the validator or a range was malformed
    InvalidArgument,
    /// The key is absent from the transaction's view
    NotFound,
    /// The transaction or snapshot was already committed or discarded
    AlreadyDone,
    /// Any failure reported by the underlying engine or an input stream
    IOFailure,
    /// The operation was refused because its cancellation token fired
    Cancelled,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidArgument => write!(f, "Invalid argument"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::AlreadyDone => write!(f, "Transaction already done"),
            ErrorKind::IOFailure => write!(f, "IO failure"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Error type of the key-value layer.
///
/// `KvError` carries a message, an [`ErrorKind`] and an optional cause. A
/// backtrace is captured unresolved at construction and only resolved when
/// the error is debug-printed, so cheap expected errors such as
/// [`ErrorKind::NotFound`] stay cheap.
///
/// # Examples
///
/// ```rust,ignore
/// use kvtx::errors::{ErrorKind, KvError};
///
/// let cause = KvError::new("disk unplugged", ErrorKind::IOFailure);
/// let err = KvError::new_with_cause("commit failed", ErrorKind::IOFailure, cause);
/// assert!(err.is_io_failure());
/// ```
#[derive(Clone)]
pub struct KvError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<KvError>>,
    backtrace: Arc<Backtrace>,
}

impl KvError {
    /// Creates a new `KvError` with the specified message and kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        KvError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(Backtrace::new_unresolved()),
        }
    }

    /// Creates a new `KvError` that keeps `cause` in its error chain.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: KvError) -> Self {
        KvError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(Backtrace::new_unresolved()),
        }
    }

    pub(crate) fn already_done() -> Self {
        KvError::new("transaction already done", ErrorKind::AlreadyDone)
    }

    pub(crate) fn cancelled() -> Self {
        KvError::new("operation cancelled", ErrorKind::Cancelled)
    }

    pub(crate) fn invalid_key(key: &str) -> Self {
        KvError::new(
            &format!("invalid key {:?}", key),
            ErrorKind::InvalidArgument,
        )
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        self.error_kind
    }

    pub fn cause(&self) -> Option<&KvError> {
        self.cause.as_deref()
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.error_kind == ErrorKind::InvalidArgument
    }

    pub fn is_not_found(&self) -> bool {
        self.error_kind == ErrorKind::NotFound
    }

    pub fn is_already_done(&self) -> bool {
        self.error_kind == ErrorKind::AlreadyDone
    }

    pub fn is_io_failure(&self) -> bool {
        self.error_kind == ErrorKind::IOFailure
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_kind == ErrorKind::Cancelled
    }
}

impl Display for KvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for KvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => {
                let mut backtrace = (*self.backtrace).clone();
                backtrace.resolve();
                write!(f, "{}\n{:?}", self.message, backtrace)
            }
        }
    }
}

impl Error for KvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// Shorthand for `Result<T, KvError>`, returned by every fallible operation
/// of the key-value layer.
pub type KvResult<T> = Result<T, KvError>;

impl From<std::io::Error> for KvError {
    fn from(err: std::io::Error) -> Self {
        KvError::new(&format!("IO error: {}", err), ErrorKind::IOFailure)
    }
}

impl From<EngineError> for KvError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::KeyNotFound => KvError::new("key not found", ErrorKind::NotFound),
            other => KvError::new(&format!("engine error: {}", other), ErrorKind::IOFailure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_error_new_creates_error() {
        let error = KvError::new("An error occurred", ErrorKind::IOFailure);
        assert_eq!(error.message, "An error occurred");
        assert_eq!(error.error_kind, ErrorKind::IOFailure);
        assert!(error.cause.is_none());
    }

    #[test]
    fn kv_error_new_with_cause_keeps_chain() {
        let cause = KvError::new("write conflict", ErrorKind::IOFailure);
        let error = KvError::new_with_cause("commit failed", ErrorKind::IOFailure, cause);
        assert_eq!(error.cause().map(|c| c.message()), Some("write conflict"));
        assert!(error.source().is_some());
    }

    #[test]
    fn kv_error_source_is_none_without_cause() {
        let error = KvError::new("An error occurred", ErrorKind::NotFound);
        assert!(error.source().is_none());
    }

    #[test]
    fn kv_error_display_is_message_only() {
        let error = KvError::new("An error occurred", ErrorKind::IOFailure);
        assert_eq!(format!("{}", error), "An error occurred");
    }

    #[test]
    fn kv_error_debug_contains_cause() {
        let cause = KvError::new("disk full", ErrorKind::IOFailure);
        let error = KvError::new_with_cause("commit failed", ErrorKind::IOFailure, cause);
        let formatted = format!("{:?}", error);
        assert!(formatted.contains("commit failed"));
        assert!(formatted.contains("Caused by:"));
        assert!(formatted.contains("disk full"));
    }

    #[test]
    fn kind_predicates_match_kind() {
        assert!(KvError::already_done().is_already_done());
        assert!(KvError::invalid_key("").is_invalid_argument());
        assert!(KvError::new("x", ErrorKind::NotFound).is_not_found());
        assert!(KvError::new("x", ErrorKind::IOFailure).is_io_failure());
        assert!(KvError::cancelled().is_cancelled());
        assert!(!KvError::already_done().is_not_found());
        assert!(!KvError::cancelled().is_io_failure());
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::AlreadyDone.to_string(), "Transaction already done");
        assert_eq!(ErrorKind::InvalidArgument.to_string(), "Invalid argument");
        assert_eq!(ErrorKind::NotFound.to_string(), "Not found");
        assert_eq!(ErrorKind::IOFailure.to_string(), "IO failure");
        assert_eq!(ErrorKind::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn from_io_error_is_io_failure() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: KvError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::IOFailure);
        assert!(err.message().contains("short read"));
    }

    #[test]
    fn from_engine_error_hides_engine_types() {
        let not_found: KvError = EngineError::KeyNotFound.into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let conflict: KvError = EngineError::Conflict.into();
        assert_eq!(conflict.kind(), ErrorKind::IOFailure);
        assert!(conflict.message().contains("conflict"));

        let backend: KvError = EngineError::Backend("journal corrupt".to_string()).into();
        assert_eq!(backend.kind(), ErrorKind::IOFailure);
        assert!(backend.message().contains("journal corrupt"));
    }

    #[test]
    fn question_mark_converts_io_errors() {
        fn read_all() -> KvResult<Vec<u8>> {
            Err(std::io::Error::other("stream closed"))?
        }
        let err = read_all().unwrap_err();
        assert!(err.is_io_failure());
    }
}
