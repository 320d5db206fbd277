//! Wallet Core Error Types
//!
//! Every public operation of the core returns `WalletError`. The HTTP layer
//! maps each variant to a status code; the saga uses `is_retryable()` to
//! route infrastructure failures through per-step retry.

use thiserror::Error;

/// Error sum type surfaced by the transfer core
#[derive(Error, Debug, Clone)]
pub enum WalletError {
    // === Business errors (terminal, never retried) ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Wallet not found or not accessible")]
    NotFound,

    #[error("Source and destination wallet currencies do not match")]
    CurrencyMismatch,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Transfer limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Conflicting request: {0}")]
    Conflict(String),

    // === Infrastructure errors (retryable) ===
    #[error("Could not acquire wallet lock: {0}")]
    LockTimeout(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Store error: {0}")]
    Store(String),

    // === Operational ===
    #[error("Compensation failed at step {0}")]
    CompensationFailure(String),
}

impl WalletError {
    /// Stable error code for API responses and idempotency failure records
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::InvalidRequest(_) => "invalid_request",
            WalletError::NotFound => "invalid_wallet",
            WalletError::CurrencyMismatch => "currency_mismatch",
            WalletError::InsufficientBalance => "insufficient_balance",
            WalletError::LimitExceeded(_) => "limit_exceeded",
            WalletError::Conflict(_) => "conflict",
            WalletError::LockTimeout(_) => "lock_timeout",
            WalletError::Cache(_) => "cache_error",
            WalletError::Store(_) => "store_error",
            WalletError::CompensationFailure(_) => "compensation_failure",
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            WalletError::InvalidRequest(_)
            | WalletError::CurrencyMismatch
            | WalletError::InsufficientBalance
            | WalletError::LimitExceeded(_) => 400,
            WalletError::NotFound => 404,
            WalletError::Conflict(_) => 409,
            WalletError::LockTimeout(_) | WalletError::Cache(_) => 503,
            WalletError::Store(_) | WalletError::CompensationFailure(_) => 500,
        }
    }

    /// Whether the saga may re-execute a step that failed with this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::LockTimeout(_) | WalletError::Cache(_) | WalletError::Store(_)
        )
    }

    /// Reconstruct the error recorded on a failed transaction row.
    ///
    /// Used by the idempotency gate when a replayed key resolves to a
    /// non-retryable failure.
    pub fn from_code(code: &str, message: &str) -> Self {
        match code {
            "invalid_request" => WalletError::InvalidRequest(message.to_string()),
            "invalid_wallet" => WalletError::NotFound,
            "currency_mismatch" => WalletError::CurrencyMismatch,
            "insufficient_balance" => WalletError::InsufficientBalance,
            "limit_exceeded" => WalletError::LimitExceeded(message.to_string()),
            "conflict" => WalletError::Conflict(message.to_string()),
            "lock_timeout" => WalletError::LockTimeout(message.to_string()),
            "cache_error" => WalletError::Cache(message.to_string()),
            "compensation_failure" => WalletError::CompensationFailure(message.to_string()),
            _ => WalletError::Store(message.to_string()),
        }
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(e: sqlx::Error) -> Self {
        WalletError::Store(e.to_string())
    }
}

impl From<redis::RedisError> for WalletError {
    fn from(e: redis::RedisError) -> Self {
        WalletError::Cache(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(WalletError::InsufficientBalance.code(), "insufficient_balance");
        assert_eq!(WalletError::NotFound.code(), "invalid_wallet");
        assert_eq!(WalletError::CurrencyMismatch.code(), "currency_mismatch");
        assert_eq!(
            WalletError::LimitExceeded("daily".into()).code(),
            "limit_exceeded"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(WalletError::InsufficientBalance.http_status(), 400);
        assert_eq!(WalletError::NotFound.http_status(), 404);
        assert_eq!(WalletError::Conflict("dup".into()).http_status(), 409);
        assert_eq!(WalletError::LockTimeout("w".into()).http_status(), 503);
        assert_eq!(WalletError::Store("db".into()).http_status(), 500);
    }

    #[test]
    fn test_retryability() {
        assert!(WalletError::LockTimeout("w".into()).is_retryable());
        assert!(WalletError::Cache("conn".into()).is_retryable());
        assert!(WalletError::Store("io".into()).is_retryable());

        assert!(!WalletError::InsufficientBalance.is_retryable());
        assert!(!WalletError::CurrencyMismatch.is_retryable());
        assert!(!WalletError::LimitExceeded("daily".into()).is_retryable());
        assert!(!WalletError::NotFound.is_retryable());
    }

    #[test]
    fn test_code_roundtrip() {
        let errors = [
            WalletError::NotFound,
            WalletError::CurrencyMismatch,
            WalletError::InsufficientBalance,
        ];
        for err in errors {
            let rebuilt = WalletError::from_code(err.code(), &err.to_string());
            assert_eq!(rebuilt.code(), err.code());
        }
    }
}
