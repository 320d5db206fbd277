//! Idempotency Gate
//!
//! Deduplicates retried transfers by stable key and by request-content
//! hash. Replay order: result cache, then the durable transaction row,
//! then (for caller-supplied keys) the recent content-hash guard. An
//! `auto_` key is synthesized when the caller supplies none; it is not
//! stable across retries and only dedupes accidental in-flight duplicates
//! of the same submission.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::{
    CacheService, ERROR_TTL_SECS, IDEMPOTENCY_ERROR_PREFIX, IDEMPOTENCY_PREFIX,
    IDEMPOTENCY_REQUEST_PREFIX, REQUEST_HASH_PREFIX, REQUEST_HASH_TTL_SECS, REQUEST_TTL_SECS,
    RESULT_TTL_SECS,
};
use crate::error::WalletError;
use crate::models::{Transaction, TransactionStatus};
use crate::store::transactions;
use crate::transfer::service::{TransferReceipt, TransferRequest};

/// Synthesized keys carry this prefix and skip the content-hash guard
pub const AUTO_KEY_PREFIX: &str = "auto_";

/// A content-hash collision under a different key only conflicts within
/// this window
const HASH_CONFLICT_WINDOW_SECS: i64 = 300;

/// Failed transactions stop being retryable after this many attempts
const MAX_KEY_RETRIES: i32 = 3;

/// Error codes that terminate a key permanently (business rejections)
const TERMINAL_ERROR_CODES: [&str; 4] = [
    "insufficient_balance",
    "invalid_wallet",
    "limit_exceeded",
    "currency_mismatch",
];

/// Gate verdict for an incoming request
pub enum GateDecision {
    /// A completed prior execution: serve its recorded response
    Replay(TransferReceipt),
    /// New work; `prior_attempt` links a retried failure's row
    Proceed { prior_attempt: Option<Uuid> },
}

/// Recent content-hash sighting
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestHashEntry {
    key: String,
    timestamp: DateTime<Utc>,
    endpoint: String,
}

/// In-flight request marker, kept for operational debugging
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestMarker {
    request_hash: String,
    endpoint: String,
    started_at: DateTime<Utc>,
}

/// Failure record so retries observe the terminal verdict quickly
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailureEntry {
    code: String,
    message: String,
    failed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct IdempotencyGate {
    pool: PgPool,
    cache: Arc<CacheService>,
}

impl IdempotencyGate {
    pub fn new(pool: PgPool, cache: Arc<CacheService>) -> Self {
        Self { pool, cache }
    }

    /// Resolve the effective key. Returns `(key, synthesized)`.
    pub fn resolve_key(
        &self,
        user_id: Uuid,
        source_wallet_id: Uuid,
        req: &TransferRequest,
    ) -> (String, bool) {
        if let Some(key) = req.idempotency_key.as_deref()
            && !key.trim().is_empty()
        {
            return (key.to_string(), false);
        }

        let nonce: u64 = rand::thread_rng().r#gen();
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update(source_wallet_id.as_bytes());
        hasher.update(req.destination_wallet_id.as_bytes());
        hasher.update(req.amount.to_string().as_bytes());
        hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or(0).to_be_bytes());
        hasher.update(nonce.to_be_bytes());

        (format!("{}{:x}", AUTO_KEY_PREFIX, hasher.finalize()), true)
    }

    /// Run the dedup workflow for one incoming transfer
    pub async fn begin(
        &self,
        user_id: Uuid,
        source_wallet_id: Uuid,
        req: &TransferRequest,
        key: &str,
        synthesized: bool,
    ) -> Result<GateDecision, WalletError> {
        // 1. Result cache
        let result_key = format!("{}{}", IDEMPOTENCY_PREFIX, key);
        match self.cache.get_json::<TransferReceipt>(&result_key).await {
            Ok(Some(receipt)) => {
                tracing::info!(idempotency_key = %key, "Replaying cached transfer result");
                return Ok(GateDecision::Replay(receipt));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(idempotency_key = %key, error = %e, "Result cache unavailable, using store");
            }
        }

        // 2. Durable transaction row
        let mut prior_attempt = None;
        if let Some(tx) = transactions::latest_by_key(&self.pool, key).await? {
            match tx.status {
                TransactionStatus::Completed => {
                    let receipt = TransferReceipt::from_transaction(&tx);
                    self.record_success(key, &receipt).await;
                    tracing::info!(idempotency_key = %key, transaction_id = %tx.id, "Replaying completed transfer");
                    return Ok(GateDecision::Replay(receipt));
                }
                TransactionStatus::Pending | TransactionStatus::Processing => {
                    return Err(WalletError::Conflict(
                        "a transfer with this idempotency key is in flight".to_string(),
                    ));
                }
                TransactionStatus::Failed | TransactionStatus::Cancelled => {
                    if !retryable_failure(&tx) {
                        let code = tx.error_code.as_deref().unwrap_or("store_error");
                        let message = tx
                            .error_message
                            .as_deref()
                            .unwrap_or("transfer previously failed");
                        return Err(WalletError::from_code(code, message));
                    }
                    // Retryable: detach the key from the failed attempt so
                    // the unique index accepts the new row, and keep the
                    // audit trail through the parent link.
                    transactions::detach_idempotency_key(&self.pool, tx.id).await?;
                    prior_attempt = Some(tx.id);
                    tracing::info!(
                        idempotency_key = %key,
                        prior_transaction_id = %tx.id,
                        "Retrying previously failed transfer"
                    );
                }
                TransactionStatus::Compensated => {
                    let code = tx.error_code.as_deref().unwrap_or("compensation_failure");
                    let message = tx.error_message.as_deref().unwrap_or("transfer compensated");
                    return Err(WalletError::from_code(code, message));
                }
            }
        }

        // 3. Content-hash guard (caller-supplied keys only)
        if !synthesized {
            self.check_request_hash(user_id, source_wallet_id, req, key)
                .await?;
        }

        Ok(GateDecision::Proceed { prior_attempt })
    }

    async fn check_request_hash(
        &self,
        user_id: Uuid,
        source_wallet_id: Uuid,
        req: &TransferRequest,
        key: &str,
    ) -> Result<(), WalletError> {
        let endpoint = transfer_endpoint(source_wallet_id);
        let hash = business_hash(
            user_id,
            &endpoint,
            req.destination_wallet_id,
            req.amount,
            req.description.as_deref(),
        );
        let hash_key = format!("{}{}", REQUEST_HASH_PREFIX, hash);

        match self.cache.get_json::<RequestHashEntry>(&hash_key).await {
            Ok(Some(entry))
                if entry.key != key
                    && (Utc::now() - entry.timestamp).num_seconds()
                        < HASH_CONFLICT_WINDOW_SECS =>
            {
                // Only an in-flight original blocks the new key
                if let Some(original) = transactions::latest_by_key(&self.pool, &entry.key).await?
                    && original.status.is_in_flight()
                {
                    tracing::info!(
                        idempotency_key = %key,
                        original_key = %entry.key,
                        "Content-hash collision with in-flight transfer"
                    );
                    return Err(WalletError::Conflict(
                        "an identical transfer was recently submitted under a different idempotency key"
                            .to_string(),
                    ));
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Request-hash cache unavailable, skipping guard");
                return Ok(());
            }
        }

        let entry = RequestHashEntry {
            key: key.to_string(),
            timestamp: Utc::now(),
            endpoint,
        };
        if let Err(e) = self
            .cache
            .set_json(&hash_key, &entry, REQUEST_HASH_TTL_SECS)
            .await
        {
            tracing::warn!(error = %e, "Request-hash cache write failed");
        }
        Ok(())
    }

    /// Record the in-flight request marker. Best-effort.
    pub async fn mark_in_flight(
        &self,
        user_id: Uuid,
        source_wallet_id: Uuid,
        req: &TransferRequest,
        key: &str,
    ) {
        let endpoint = transfer_endpoint(source_wallet_id);
        let marker = RequestMarker {
            request_hash: business_hash(
                user_id,
                &endpoint,
                req.destination_wallet_id,
                req.amount,
                req.description.as_deref(),
            ),
            endpoint,
            started_at: Utc::now(),
        };
        let marker_key = format!("{}{}", IDEMPOTENCY_REQUEST_PREFIX, key);
        if let Err(e) = self
            .cache
            .set_json(&marker_key, &marker, REQUEST_TTL_SECS)
            .await
        {
            tracing::warn!(idempotency_key = %key, error = %e, "Request marker write failed");
        }
    }

    /// Cache the successful response for replay. Best-effort.
    pub async fn record_success(&self, key: &str, receipt: &TransferReceipt) {
        let result_key = format!("{}{}", IDEMPOTENCY_PREFIX, key);
        if let Err(e) = self
            .cache
            .set_json(&result_key, receipt, RESULT_TTL_SECS)
            .await
        {
            tracing::warn!(idempotency_key = %key, error = %e, "Result cache write failed");
        }
    }

    /// Record the failure entry; the transaction row stays the durable
    /// record. Best-effort.
    pub async fn record_failure(&self, key: &str, error: &WalletError) {
        let entry = FailureEntry {
            code: error.code().to_string(),
            message: error.to_string(),
            failed_at: Utc::now(),
        };
        let error_key = format!("{}{}", IDEMPOTENCY_ERROR_PREFIX, key);
        if let Err(e) = self.cache.set_json(&error_key, &entry, ERROR_TTL_SECS).await {
            tracing::warn!(idempotency_key = %key, error = %e, "Failure record write failed");
        }
    }
}

fn transfer_endpoint(source_wallet_id: Uuid) -> String {
    format!("/wallets/{}/transfer", source_wallet_id)
}

/// Content hash over the business fields only. The idempotency key and
/// external reference are excluded so the same business operation hashes
/// identically under any key.
pub fn business_hash(
    user_id: Uuid,
    endpoint: &str,
    destination_wallet_id: Uuid,
    amount: rust_decimal::Decimal,
    description: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"POST|");
    hasher.update(endpoint.as_bytes());
    hasher.update(b"|");
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(destination_wallet_id.as_bytes());
    hasher.update(b"|");
    hasher.update(amount.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(description.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A failed transaction is retryable while it has budget left and did not
/// fail on a business rejection
fn retryable_failure(tx: &Transaction) -> bool {
    if tx.retry_count >= MAX_KEY_RETRIES {
        return false;
    }
    match tx.error_code.as_deref() {
        Some(code) => !TERMINAL_ERROR_CODES.contains(&code),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TransactionKind, TransactionStatus};
    use crate::transfer::TransferPhase;
    use rust_decimal::Decimal;

    fn failed_tx(retry_count: i32, error_code: Option<&str>) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            kind: TransactionKind::Transfer,
            status: TransactionStatus::Failed,
            phase: TransferPhase::Failed,
            amount: Decimal::from(150),
            source_wallet_id: Some(Uuid::new_v4()),
            destination_wallet_id: Some(Uuid::new_v4()),
            description: None,
            metadata: serde_json::json!({}),
            idempotency_key: Some("abc".to_string()),
            external_reference_id: None,
            parent_transaction_id: None,
            retry_count,
            reserved_amount: None,
            reservation_expires_at: None,
            source_balance_before: None,
            source_balance_after: None,
            destination_balance_before: None,
            destination_balance_after: None,
            error_code: error_code.map(String::from),
            error_message: None,
            saga_state: None,
            processed_at: None,
            completed_at: None,
            failed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_business_hash_excludes_idempotency_fields() {
        let user = Uuid::new_v4();
        let dest = Uuid::new_v4();
        let amount: Decimal = "150.00".parse().unwrap();

        // Hash depends only on business fields; the key and external
        // reference never enter it, so it is identical across both.
        let a = business_hash(user, "/wallets/w1/transfer", dest, amount, Some("dinner"));
        let b = business_hash(user, "/wallets/w1/transfer", dest, amount, Some("dinner"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_business_hash_sensitive_to_business_fields() {
        let user = Uuid::new_v4();
        let dest = Uuid::new_v4();
        let amount: Decimal = "150.00".parse().unwrap();
        let base = business_hash(user, "/wallets/w1/transfer", dest, amount, Some("dinner"));

        let other_amount = business_hash(
            user,
            "/wallets/w1/transfer",
            dest,
            "151.00".parse().unwrap(),
            Some("dinner"),
        );
        assert_ne!(base, other_amount);

        let other_dest = business_hash(
            user,
            "/wallets/w1/transfer",
            Uuid::new_v4(),
            amount,
            Some("dinner"),
        );
        assert_ne!(base, other_dest);

        let other_description =
            business_hash(user, "/wallets/w1/transfer", dest, amount, Some("rent"));
        assert_ne!(base, other_description);
    }

    #[test]
    fn test_retryable_failure_rules() {
        // Network-class failure with budget left: retryable
        assert!(retryable_failure(&failed_tx(0, Some("store_error"))));
        assert!(retryable_failure(&failed_tx(2, Some("lock_timeout"))));
        assert!(retryable_failure(&failed_tx(0, None)));

        // Budget exhausted
        assert!(!retryable_failure(&failed_tx(3, Some("store_error"))));

        // Business rejections are terminal at any count
        assert!(!retryable_failure(&failed_tx(0, Some("insufficient_balance"))));
        assert!(!retryable_failure(&failed_tx(0, Some("invalid_wallet"))));
        assert!(!retryable_failure(&failed_tx(0, Some("limit_exceeded"))));
        assert!(!retryable_failure(&failed_tx(0, Some("currency_mismatch"))));
    }
}
