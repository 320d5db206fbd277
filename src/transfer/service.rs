//! Transfer Service
//!
//! Front door of the execution core: idempotency gate, wallet and limit
//! prechecks, durable transaction record, saga run, and result recording.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::CacheService;
use crate::error::WalletError;
use crate::idempotency::{GateDecision, IdempotencyGate};
use crate::limits::LimitService;
use crate::models::{Transaction, TransactionKind, TransactionStatus};
use crate::store::{transactions, wallets};
use crate::transfer::coordinator::SagaCoordinator;
use crate::transfer::saga::SagaContext;
use crate::transfer::steps::transfer_steps;
use crate::transfer::TransferPhase;

/// Transfer input from the collaborator layer
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub destination_wallet_id: Uuid,
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub external_reference_id: Option<String>,
}

/// Transfer response body (binding external contract)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub id: Uuid,
    pub amount: Decimal,
    pub source_wallet_id: Option<Uuid>,
    pub destination_wallet_id: Option<Uuid>,
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub metadata: ReceiptMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptMetadata {
    pub transfer_state: String,
    pub idempotency_key: Option<String>,
    pub external_reference_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferReceipt {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            amount: tx.amount,
            source_wallet_id: tx.source_wallet_id,
            destination_wallet_id: tx.destination_wallet_id,
            description: tx.description.clone(),
            status: tx.status.as_str().to_string(),
            created_at: tx.created_at,
            metadata: ReceiptMetadata {
                transfer_state: tx.phase.as_str().to_string(),
                idempotency_key: tx.idempotency_key.clone(),
                external_reference_id: tx.external_reference_id.clone(),
                completed_at: tx.completed_at,
            },
        }
    }
}

/// Executes transfers end to end
#[derive(Clone)]
pub struct TransferService {
    pool: PgPool,
    cache: Arc<CacheService>,
    limits: LimitService,
    gate: IdempotencyGate,
    write_lease: Duration,
}

impl TransferService {
    pub fn new(
        pool: PgPool,
        cache: Arc<CacheService>,
        limits: LimitService,
        gate: IdempotencyGate,
        write_lease: Duration,
    ) -> Self {
        Self {
            pool,
            cache,
            limits,
            gate,
            write_lease,
        }
    }

    /// Execute one transfer request for the authenticated caller.
    ///
    /// Each accepted transfer debits exactly one wallet and credits
    /// exactly one other, or fully unwinds on failure.
    pub async fn transfer(
        &self,
        user_id: Uuid,
        source_wallet_id: Uuid,
        req: TransferRequest,
    ) -> Result<TransferReceipt, WalletError> {
        validate_request(source_wallet_id, &req)?;

        let (key, synthesized) = self.gate.resolve_key(user_id, source_wallet_id, &req);
        let prior_attempt = match self
            .gate
            .begin(user_id, source_wallet_id, &req, &key, synthesized)
            .await?
        {
            GateDecision::Replay(receipt) => return Ok(receipt),
            GateDecision::Proceed { prior_attempt } => prior_attempt,
        };

        // Prechecks: ownership before limits, limits before any durable
        // record (a limit rejection never records a transaction row).
        wallets::fetch_owned(&self.pool, source_wallet_id, user_id).await?;
        self.limits.check_and_project(user_id, req.amount).await?;

        let tx = new_transfer_record(source_wallet_id, &req, &key, prior_attempt);
        match transactions::insert(&self.pool, &tx).await {
            Ok(()) => {}
            // Lost the unique-key race to a concurrent duplicate
            Err(WalletError::Conflict(_)) => return self.resolve_duplicate(&key).await,
            Err(e) => return Err(e),
        }
        transactions::mark_processing(&self.pool, tx.id).await?;
        self.gate
            .mark_in_flight(user_id, source_wallet_id, &req, &key)
            .await;

        let mut ctx = SagaContext {
            pool: self.pool.clone(),
            cache: self.cache.clone(),
            limits: self.limits.clone(),
            write_lease: self.write_lease,
            user_id,
            tx,
            source: None,
            destination: None,
        };
        let steps = transfer_steps();

        match SagaCoordinator::run(&mut ctx, &steps).await {
            Ok(()) => {
                let row = transactions::fetch(&self.pool, ctx.tx.id)
                    .await?
                    .ok_or_else(|| {
                        WalletError::Store(format!("transaction {} vanished", ctx.tx.id))
                    })?;
                let receipt = TransferReceipt::from_transaction(&row);
                self.gate.record_success(&key, &receipt).await;
                Ok(receipt)
            }
            Err(e) => {
                self.gate.record_failure(&key, &e).await;
                Err(e)
            }
        }
    }

    /// Look up a transfer by idempotency key on behalf of `user_id`.
    ///
    /// Access-checked: the caller must own the source or destination
    /// wallet; anything else reads as absent.
    pub async fn find_by_idempotency(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<TransferReceipt>, WalletError> {
        let Some(tx) = transactions::latest_by_key(&self.pool, key).await? else {
            return Ok(None);
        };

        let mut authorized = false;
        for wallet_id in [tx.source_wallet_id, tx.destination_wallet_id]
            .into_iter()
            .flatten()
        {
            if let Some(wallet) = wallets::fetch(&self.pool, wallet_id).await?
                && wallet.user_id == user_id
            {
                authorized = true;
                break;
            }
        }

        if !authorized {
            return Ok(None);
        }
        Ok(Some(TransferReceipt::from_transaction(&tx)))
    }

    /// Ownership precheck for wallet-scoped reads
    pub async fn assert_wallet_access(
        &self,
        user_id: Uuid,
        wallet_id: Uuid,
    ) -> Result<(), WalletError> {
        wallets::fetch_owned(&self.pool, wallet_id, user_id)
            .await
            .map(|_| ())
    }

    /// Race loser path: surface the winner's outcome
    async fn resolve_duplicate(&self, key: &str) -> Result<TransferReceipt, WalletError> {
        match transactions::latest_by_key(&self.pool, key).await? {
            Some(tx) if tx.status == TransactionStatus::Completed => {
                Ok(TransferReceipt::from_transaction(&tx))
            }
            _ => Err(WalletError::Conflict(
                "a transfer with this idempotency key is in flight".to_string(),
            )),
        }
    }
}

fn validate_request(source_wallet_id: Uuid, req: &TransferRequest) -> Result<(), WalletError> {
    if req.amount <= Decimal::ZERO {
        return Err(WalletError::InvalidRequest(
            "amount must be greater than zero".to_string(),
        ));
    }
    if req.amount.scale() > 2 {
        return Err(WalletError::InvalidRequest(
            "amount supports at most 2 decimal places".to_string(),
        ));
    }
    if source_wallet_id == req.destination_wallet_id {
        return Err(WalletError::InvalidRequest(
            "cannot transfer to the same wallet".to_string(),
        ));
    }
    Ok(())
}

fn new_transfer_record(
    source_wallet_id: Uuid,
    req: &TransferRequest,
    key: &str,
    prior_attempt: Option<Uuid>,
) -> Transaction {
    let now = Utc::now();
    let retry_count = if prior_attempt.is_some() { 1 } else { 0 };

    Transaction {
        id: Uuid::new_v4(),
        kind: TransactionKind::Transfer,
        status: TransactionStatus::Pending,
        phase: TransferPhase::Initiated,
        amount: req.amount,
        source_wallet_id: Some(source_wallet_id),
        destination_wallet_id: Some(req.destination_wallet_id),
        description: req.description.clone(),
        metadata: serde_json::json!({}),
        idempotency_key: Some(key.to_string()),
        external_reference_id: req.external_reference_id.clone(),
        parent_transaction_id: prior_attempt,
        retry_count,
        reserved_amount: None,
        reservation_expires_at: None,
        source_balance_before: None,
        source_balance_after: None,
        destination_balance_before: None,
        destination_balance_after: None,
        error_code: None,
        error_message: None,
        saga_state: None,
        processed_at: None,
        completed_at: None,
        failed_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: &str) -> TransferRequest {
        TransferRequest {
            destination_wallet_id: Uuid::new_v4(),
            amount: amount.parse().unwrap(),
            description: Some("dinner".to_string()),
            idempotency_key: Some("abc".to_string()),
            external_reference_id: None,
        }
    }

    #[test]
    fn test_validate_rejects_bad_amounts() {
        let source = Uuid::new_v4();

        assert!(validate_request(source, &request("150.00")).is_ok());
        assert!(validate_request(source, &request("0")).is_err());
        assert!(validate_request(source, &request("-10")).is_err());
        assert!(validate_request(source, &request("10.005")).is_err());
    }

    #[test]
    fn test_validate_rejects_same_wallet() {
        let source = Uuid::new_v4();
        let mut req = request("150.00");
        req.destination_wallet_id = source;

        let err = validate_request(source, &req).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let body = serde_json::json!({
            "destinationWalletId": Uuid::new_v4(),
            "amount": "150.00",
            "description": "dinner",
            "idempotencyKey": "abc",
        });
        let req: TransferRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.amount, "150.00".parse::<Decimal>().unwrap());
        assert_eq!(req.idempotency_key.as_deref(), Some("abc"));
        assert!(req.external_reference_id.is_none());
    }

    #[test]
    fn test_receipt_shape() {
        let req = request("150.00");
        let tx = new_transfer_record(Uuid::new_v4(), &req, "abc", None);
        let receipt = TransferReceipt::from_transaction(&tx);

        assert_eq!(receipt.status, "PENDING");
        assert_eq!(receipt.metadata.transfer_state, "INITIATED");
        assert_eq!(receipt.metadata.idempotency_key.as_deref(), Some("abc"));

        let json = serde_json::to_value(&receipt).unwrap();
        assert!(json.get("sourceWalletId").is_some());
        assert!(json["metadata"].get("transferState").is_some());
        assert!(json["metadata"].get("idempotencyKey").is_some());
    }

    #[test]
    fn test_retry_links_prior_attempt() {
        let req = request("150.00");
        let prior = Uuid::new_v4();
        let tx = new_transfer_record(Uuid::new_v4(), &req, "abc", Some(prior));

        assert_eq!(tx.parent_transaction_id, Some(prior));
        assert_eq!(tx.retry_count, 1);
    }
}
