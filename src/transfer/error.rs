//! Transfer Error Types

use std::time::Duration;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Source and target account cannot be the same")]
    SameAccount,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    // === Store Errors ===
    /// A statement, begin or commit failed; the unit of work was rolled back
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Rolling back after `cause` failed too. The outcome of the unit of work
    /// is whatever the database decided on its own.
    #[error("rollback failed: {rollback} (after: {cause})")]
    RollbackFailed {
        rollback: StoreError,
        #[source]
        cause: StoreError,
    },

    // === Cancellation ===
    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transfer timed out after {0:?}")]
    TimedOut(Duration),
}

impl TransferError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::SameAccount => "SAME_ACCOUNT",
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::Store(StoreError::NotFound) => "ACCOUNT_NOT_FOUND",
            TransferError::Store(e) if e.is_constraint_violation() => "CONSTRAINT_VIOLATION",
            TransferError::Store(_) => "DATABASE_ERROR",
            TransferError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            TransferError::Cancelled => "CANCELLED",
            TransferError::TimedOut(_) => "TIMED_OUT",
        }
    }

    /// The store error that caused this failure, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            TransferError::Store(e) => Some(e),
            TransferError::RollbackFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}
