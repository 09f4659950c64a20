//! Ledger Store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The addressed row does not exist
    #[error("no rows in result set")]
    NotFound,

    /// Foreign key / check violation raised by the in-memory store
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    /// True for foreign key, unique and check violations from either store
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            StoreError::Constraint(_) => true,
            StoreError::Database(sqlx::Error::Database(db_err)) => db_err.constraint().is_some(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Database(other),
        }
    }
}
