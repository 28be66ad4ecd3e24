use kvtx::engine::EngineError;
use kvtx::errors::{ErrorKind, KvError};
use std::error::Error;
use thiserror::Error;

/// Errors raised while configuring or maintaining a fjall engine.
///
/// Transaction-level failures never use this type; they are reported as
/// [`EngineError`] through the engine traits.
#[derive(Error, Debug)]
pub enum FjallError {
    #[error("database path is not configured")]
    MissingPath,
    #[error("invalid partition name {0:?}")]
    InvalidPartitionName(String),
    #[error("failed to open keyspace at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: fjall::Error,
    },
    #[error("failed to open partition {name}: {source}")]
    Partition {
        name: String,
        #[source]
        source: fjall::Error,
    },
    #[error("failed to persist keyspace: {0}")]
    Persist(#[source] fjall::Error),
    #[error("engine is closed")]
    Closed,
    #[error("failed to determine fjall version: {0}")]
    Version(String),
}

pub type FjallResult<T> = Result<T, FjallError>;

impl From<FjallError> for KvError {
    fn from(err: FjallError) -> Self {
        let kind = match &err {
            FjallError::MissingPath | FjallError::InvalidPartitionName(_) => {
                ErrorKind::InvalidArgument
            }
            _ => ErrorKind::IOFailure,
        };
        KvError::new(&format!("Fjall Error: {}", err), kind)
    }
}

/// Maps a fjall failure onto the engine error categories by its message.
pub(crate) fn to_engine_error(error: impl Error) -> EngineError {
    let message = error.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("closed") || lowered.contains("poisoned") {
        EngineError::Closed
    } else if lowered.contains("conflict") {
        EngineError::Conflict
    } else if lowered.contains("corrupt")
        || lowered.contains("checksum")
        || lowered.contains("decompress")
        || lowered.contains("deserializ")
    {
        EngineError::Corrupted(message)
    } else {
        EngineError::Backend(format!("Fjall Error: {}", message))
    }
}
