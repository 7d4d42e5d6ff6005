use thiserror::Error;

use crate::money::MoneyError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{entity} {id} is still referenced and cannot be deleted")]
    Referenced { entity: &'static str, id: i64 },
    #[error(transparent)]
    Money(#[from] MoneyError),
    #[error("storage failure: {0}")]
    Storage(#[source] BoxError),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage(Box::new(err))
    }

    /// Whether reloading and retrying the operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
