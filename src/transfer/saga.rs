//! Saga abstractions
//!
//! A transfer is an ordered list of steps, each pairing an `execute`
//! action with its inverse `compensate`. The only durable atomic unit is
//! a single step; `SagaState` snapshots the coordinator's position on the
//! transaction row so a crashed saga is recoverable from the store alone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::CacheService;
use crate::error::WalletError;
use crate::limits::LimitService;
use crate::models::{Transaction, Wallet};
use crate::transfer::TransferPhase;

/// One forward step with its inverse
#[async_trait]
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Phase the transfer advances into when this step commits
    fn phase_on_success(&self) -> TransferPhase;

    /// Whether infrastructure failures in this step may be re-executed
    fn retryable(&self) -> bool {
        true
    }

    fn max_retries(&self) -> u32;

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), WalletError>;

    async fn compensate(&self, ctx: &mut SagaContext) -> Result<(), WalletError>;
}

/// Mutable working state threaded through the steps
pub struct SagaContext {
    pub pool: PgPool,
    pub cache: Arc<CacheService>,
    pub limits: LimitService,
    /// Lease TTL for balance-mutating steps
    pub write_lease: Duration,
    pub user_id: Uuid,
    /// Working copy of the durable transaction row
    pub tx: Transaction,
    /// Loaded by the validation step
    pub source: Option<Wallet>,
    pub destination: Option<Wallet>,
}

impl SagaContext {
    pub fn source_wallet_id(&self) -> Result<Uuid, WalletError> {
        self.tx
            .source_wallet_id
            .ok_or_else(|| WalletError::InvalidRequest("missing source wallet".to_string()))
    }

    pub fn destination_wallet_id(&self) -> Result<Uuid, WalletError> {
        self.tx
            .destination_wallet_id
            .ok_or_else(|| WalletError::InvalidRequest("missing destination wallet".to_string()))
    }
}

/// Last error recorded by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaError {
    pub message: String,
    pub step: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable saga snapshot (JSONB on the transaction row)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaState {
    pub current_step: i32,
    pub completed_steps: Vec<String>,
    pub compensated_steps: Vec<String>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SagaError>,
}

impl SagaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed(&mut self, step: &str) {
        self.completed_steps.push(step.to_string());
    }

    pub fn record_compensated(&mut self, step: &str) {
        self.compensated_steps.push(step.to_string());
    }

    pub fn record_error(&mut self, step: &str, error: &WalletError) {
        self.last_error = Some(SagaError {
            message: error.to_string(),
            step: step.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn to_value(&self) -> Result<serde_json::Value, WalletError> {
        serde_json::to_value(self).map_err(|e| WalletError::Store(e.to_string()))
    }
}

/// Retry policy: a step re-executes only while it is marked retryable,
/// has attempts left, and the failure is an infrastructure error.
/// Business rejections always fall through to compensation.
pub fn should_retry(step: &dyn SagaStep, attempt: u32, error: &WalletError) -> bool {
    step.retryable() && attempt < step.max_retries() && error.is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubStep {
        retryable: bool,
        max_retries: u32,
    }

    #[async_trait]
    impl SagaStep for StubStep {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn phase_on_success(&self) -> TransferPhase {
            TransferPhase::ValidationComplete
        }

        fn retryable(&self) -> bool {
            self.retryable
        }

        fn max_retries(&self) -> u32 {
            self.max_retries
        }

        async fn execute(&self, _ctx: &mut SagaContext) -> Result<(), WalletError> {
            Ok(())
        }

        async fn compensate(&self, _ctx: &mut SagaContext) -> Result<(), WalletError> {
            Ok(())
        }
    }

    #[test]
    fn test_retry_only_infrastructure_errors() {
        let step = StubStep {
            retryable: true,
            max_retries: 2,
        };

        assert!(should_retry(&step, 0, &WalletError::Store("io".into())));
        assert!(should_retry(&step, 1, &WalletError::LockTimeout("w".into())));
        assert!(!should_retry(&step, 2, &WalletError::Store("io".into())));

        // Business errors never retry, regardless of budget
        assert!(!should_retry(&step, 0, &WalletError::InsufficientBalance));
        assert!(!should_retry(&step, 0, &WalletError::CurrencyMismatch));
        assert!(!should_retry(&step, 0, &WalletError::NotFound));
    }

    #[test]
    fn test_non_retryable_step() {
        let step = StubStep {
            retryable: false,
            max_retries: 3,
        };
        assert!(!should_retry(&step, 0, &WalletError::Store("io".into())));
    }

    #[test]
    fn test_saga_state_schema() {
        let mut state = SagaState::new();
        state.current_step = 2;
        state.record_completed("validate_transfer");
        state.record_completed("reserve_funds");
        state.retry_count = 1;
        state.record_error("debit_source", &WalletError::InsufficientBalance);

        let value = state.to_value().unwrap();
        assert_eq!(value["currentStep"], 2);
        assert_eq!(value["completedSteps"][1], "reserve_funds");
        assert_eq!(value["retryCount"], 1);
        assert_eq!(value["lastError"]["step"], "debit_source");
        assert!(value["lastError"]["timestamp"].is_string());

        // Recovery must be deterministic: the snapshot round-trips
        let back: SagaState = serde_json::from_value(value).unwrap();
        assert_eq!(back.completed_steps.len(), 2);
        assert_eq!(back.last_error.unwrap().step, "debit_source");
    }

    #[test]
    fn test_saga_state_omits_absent_error() {
        let state = SagaState::new();
        let value = state.to_value().unwrap();
        assert!(value.get("lastError").is_none());
    }
}
