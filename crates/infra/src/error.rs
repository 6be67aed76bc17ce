use thiserror::Error;

use shopledger_core::DomainError;

use crate::event_store::EventStoreError;

/// Failure of an engine operation.
///
/// Domain rule violations pass through unchanged. Store-level optimistic
/// concurrency conflicts surface as [`DomainError::StaleWrite`] so callers see
/// a single stale-write kind whichever layer detected it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("event store error: {0}")]
    Store(EventStoreError),

    /// A stored payload no longer matches the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

impl From<EventStoreError> for EngineError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency { stream, detail } => {
                EngineError::Domain(DomainError::stale_write(stream.to_string(), detail))
            }
            other => EngineError::Store(other),
        }
    }
}

impl EngineError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Domain(e) => e.kind(),
            EngineError::Store(_) => "store",
            EngineError::Deserialize(_) => "deserialize",
            EngineError::Lock(_) => "lock",
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
