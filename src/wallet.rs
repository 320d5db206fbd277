//! Wallet Mutation Layer
//!
//! Every balance mutation holds the wallet lease across its full
//! read-compute-commit window and bumps the versioned cache entry after
//! the store commit. Reads serve the cache while the entry is younger
//! than `BALANCE_FRESHNESS_SECS`, otherwise they take a short lease and
//! re-prime from the authoritative store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::{CacheService, WalletLease};
use crate::error::WalletError;
use crate::models::{
    Currency, Transaction, TransactionKind, TransactionStatus, Wallet,
};
use crate::store::wallets;
use crate::transfer::TransferPhase;

/// Cached balances younger than this are served without the lease
pub const BALANCE_FRESHNESS_SECS: i64 = 60;

/// Validates, locks, reads, writes, and caches wallet balances
#[derive(Clone)]
pub struct WalletService {
    pool: PgPool,
    cache: Arc<CacheService>,
    write_lease: Duration,
    read_lease: Duration,
}

impl WalletService {
    pub fn new(
        pool: PgPool,
        cache: Arc<CacheService>,
        write_lease: Duration,
        read_lease: Duration,
    ) -> Self {
        Self {
            pool,
            cache,
            write_lease,
            read_lease,
        }
    }

    /// Create a wallet with zero balance and prime its cache entry at
    /// version 1
    pub async fn create_wallet(
        &self,
        owner: Uuid,
        name: String,
        currency: Currency,
    ) -> Result<Wallet, WalletError> {
        if name.trim().is_empty() {
            return Err(WalletError::InvalidRequest(
                "wallet name must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let wallet = Wallet {
            id: Uuid::new_v4(),
            user_id: owner,
            name,
            balance: Decimal::ZERO,
            currency,
            active: true,
            created_at: now,
            updated_at: now,
        };

        wallets::insert(&self.pool, &wallet).await?;
        self.cache.prime_balance(wallet.id, Decimal::ZERO).await;

        tracing::info!(wallet_id = %wallet.id, user_id = %owner, currency = %wallet.currency, "Wallet created");
        Ok(wallet)
    }

    /// Deposit into an owned wallet.
    ///
    /// Runs under the wallet lease; the balance update and the COMPLETED
    /// DEPOSIT transaction row commit together.
    pub async fn add_funds(
        &self,
        wallet_id: Uuid,
        owner: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Wallet, WalletError> {
        validate_amount(amount)?;

        let lease = WalletLease::acquire(&self.cache, wallet_id, self.write_lease).await?;
        let result = self
            .add_funds_locked(wallet_id, owner, amount, description)
            .await;
        lease.release(&self.cache).await;
        result
    }

    async fn add_funds_locked(
        &self,
        wallet_id: Uuid,
        owner: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Wallet, WalletError> {
        let wallet = wallets::fetch_owned(&self.pool, wallet_id, owner).await?;
        let expected_version = self.cache.balance_version(wallet_id).await.unwrap_or(0);

        let mut db_tx = self.pool.begin().await?;
        let new_balance = wallets::credit(&mut db_tx, wallet_id, amount)
            .await?
            .ok_or(WalletError::NotFound)?;

        let deposit = deposit_record(wallet_id, amount, description, new_balance);
        insert_in_tx(&mut db_tx, &deposit).await?;
        db_tx.commit().await?;

        if let Err(e) = self
            .cache
            .swap_balance(wallet_id, new_balance, expected_version)
            .await
        {
            tracing::warn!(wallet_id = %wallet_id, error = %e, "Balance cache update failed after deposit");
        }

        tracing::info!(wallet_id = %wallet_id, amount = %amount, balance = %new_balance, "Funds added");
        Ok(Wallet {
            balance: new_balance,
            updated_at: Utc::now(),
            ..wallet
        })
    }

    /// Read the wallet balance.
    ///
    /// Cache entries younger than 60s are authoritative enough for reads;
    /// anything older goes through a short read lease and a store read.
    pub async fn get_balance(&self, wallet_id: Uuid, owner: Uuid) -> Result<Decimal, WalletError> {
        let wallet = wallets::fetch_owned(&self.pool, wallet_id, owner).await?;

        let now = Utc::now();
        match self.cache.balance_entry(wallet_id).await {
            Ok(Some(entry)) if entry.is_fresh(now, BALANCE_FRESHNESS_SECS) => {
                return Ok(entry.balance);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(wallet_id = %wallet_id, error = %e, "Balance cache read failed, using store");
                return Ok(wallet.balance);
            }
        }

        let lease = match WalletLease::acquire(&self.cache, wallet_id, self.read_lease).await {
            Ok(lease) => lease,
            // A busy wallet means a writer is refreshing the cache right
            // now; the store value is the correct answer.
            Err(WalletError::LockTimeout(_)) => return Ok(wallet.balance),
            Err(e) => return Err(e),
        };

        let result = self.refresh_balance_locked(wallet_id).await;
        lease.release(&self.cache).await;
        result
    }

    async fn refresh_balance_locked(&self, wallet_id: Uuid) -> Result<Decimal, WalletError> {
        // Another reader may have refreshed while we waited for the lease
        let now = Utc::now();
        if let Ok(Some(entry)) = self.cache.balance_entry(wallet_id).await
            && entry.is_fresh(now, BALANCE_FRESHNESS_SECS)
        {
            return Ok(entry.balance);
        }

        let mut conn = self.pool.acquire().await?;
        let balance = wallets::balance_of(&mut conn, wallet_id)
            .await?
            .ok_or(WalletError::NotFound)?;

        let version = self.cache.balance_version(wallet_id).await.unwrap_or(0);
        if let Err(e) = self.cache.swap_balance(wallet_id, balance, version).await {
            tracing::warn!(wallet_id = %wallet_id, error = %e, "Balance cache refresh failed");
        }

        Ok(balance)
    }
}

fn validate_amount(amount: Decimal) -> Result<(), WalletError> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidRequest(
            "amount must be greater than zero".to_string(),
        ));
    }
    if amount.scale() > 2 {
        return Err(WalletError::InvalidRequest(
            "amount supports at most 2 decimal places".to_string(),
        ));
    }
    Ok(())
}

fn deposit_record(
    wallet_id: Uuid,
    amount: Decimal,
    description: Option<String>,
    balance_after: Decimal,
) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: Uuid::new_v4(),
        kind: TransactionKind::Deposit,
        status: TransactionStatus::Completed,
        phase: TransferPhase::Completed,
        amount,
        source_wallet_id: None,
        destination_wallet_id: Some(wallet_id),
        description,
        metadata: serde_json::json!({}),
        idempotency_key: None,
        external_reference_id: None,
        parent_transaction_id: None,
        retry_count: 0,
        reserved_amount: None,
        reservation_expires_at: None,
        source_balance_before: None,
        source_balance_after: None,
        destination_balance_before: Some(balance_after - amount),
        destination_balance_after: Some(balance_after),
        error_code: None,
        error_message: None,
        saga_state: None,
        processed_at: Some(now),
        completed_at: Some(now),
        failed_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Insert a transaction row inside a caller-owned store transaction
async fn insert_in_tx(
    db_tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tx: &Transaction,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        INSERT INTO transactions_tb
            (transaction_id, kind, status, phase, amount,
             source_wallet_id, destination_wallet_id, description, metadata,
             retry_count, destination_balance_before, destination_balance_after,
             processed_at, completed_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), NOW())
        "#,
    )
    .bind(tx.id)
    .bind(tx.kind.id())
    .bind(tx.status.id())
    .bind(tx.phase.id())
    .bind(tx.amount)
    .bind(tx.source_wallet_id)
    .bind(tx.destination_wallet_id)
    .bind(&tx.description)
    .bind(&tx.metadata)
    .bind(tx.retry_count)
    .bind(tx.destination_balance_before)
    .bind(tx.destination_balance_after)
    .bind(tx.processed_at)
    .bind(tx.completed_at)
    .execute(&mut **db_tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_validation() {
        assert!(validate_amount("150.00".parse().unwrap()).is_ok());
        assert!(validate_amount("0.01".parse().unwrap()).is_ok());

        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount("-5".parse().unwrap()).is_err());
        assert!(validate_amount("1.005".parse().unwrap()).is_err());
    }

    #[test]
    fn test_deposit_record_snapshots() {
        let wallet_id = Uuid::new_v4();
        let tx = deposit_record(
            wallet_id,
            "150.00".parse().unwrap(),
            Some("top up".to_string()),
            "1150.00".parse().unwrap(),
        );

        assert_eq!(tx.kind, TransactionKind::Deposit);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.destination_wallet_id, Some(wallet_id));
        assert_eq!(tx.source_wallet_id, None);
        assert_eq!(
            tx.destination_balance_before,
            Some("1000.00".parse().unwrap())
        );
        assert_eq!(
            tx.destination_balance_after,
            Some("1150.00".parse().unwrap())
        );
    }
}
