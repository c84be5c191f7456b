use thiserror::Error;

use crate::domain::{BalanceError, IntentError, MoneyError};

/// Coarse classification callers use to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    ValidationError,
    Conflict,
    StorageFailure,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Category not found: {0}")]
    CategoryNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Budget not found: {0}")]
    BudgetNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflicting concurrent write, retry the operation: {0}")]
    Conflict(String),

    #[error("Storage failure: {0}")]
    Storage(anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::AccountNotFound(_)
            | AppError::CategoryNotFound(_)
            | AppError::TransactionNotFound(_)
            | AppError::BudgetNotFound(_) => ErrorKind::NotFound,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::InvalidAmount(_) | AppError::Validation(_) => ErrorKind::ValidationError,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Storage(_) => ErrorKind::StorageFailure,
        }
    }

    /// Conflicts and storage failures leave no trace and may be resubmitted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::StorageFailure
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let source = err.chain().find_map(|e| e.downcast_ref::<sqlx::Error>());
        let busy = source.is_some_and(is_busy);
        let duplicate = source.is_some_and(is_unique_violation);

        if busy {
            AppError::Conflict(format!("{:#}", err))
        } else if duplicate {
            AppError::Validation(format!("Already exists: {:#}", err))
        } else {
            AppError::Storage(err)
        }
    }
}

impl From<MoneyError> for AppError {
    fn from(err: MoneyError) -> Self {
        AppError::InvalidAmount(err.to_string())
    }
}

impl From<IntentError> for AppError {
    fn from(err: IntentError) -> Self {
        match err {
            IntentError::NegativeAmount => AppError::InvalidAmount(err.to_string()),
            IntentError::EmptyDescription => AppError::Validation(err.to_string()),
        }
    }
}

impl From<BalanceError> for AppError {
    fn from(err: BalanceError) -> Self {
        AppError::Validation(err.to_string())
    }
}

// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_pool_timeout_is_a_retryable_conflict() {
        let err: anyhow::Result<()> = Err(sqlx::Error::PoolTimedOut).context("Failed to begin");
        let app_err = AppError::from(err.unwrap_err());
        assert_eq!(app_err.kind(), ErrorKind::Conflict);
        assert!(app_err.is_retryable());
    }

    #[test]
    fn test_other_storage_errors_are_storage_failures() {
        let app_err = AppError::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(app_err.kind(), ErrorKind::StorageFailure);
        assert!(app_err.is_retryable());
    }

    #[test]
    fn test_caller_errors_are_terminal() {
        for err in [
            AppError::TransactionNotFound("x".into()),
            AppError::Unauthorized("x".into()),
            AppError::from(IntentError::NegativeAmount),
        ] {
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }

    #[test]
    fn test_negative_amount_maps_to_validation_kind() {
        let err = AppError::from(IntentError::NegativeAmount);
        assert!(matches!(err, AppError::InvalidAmount(_)));
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
