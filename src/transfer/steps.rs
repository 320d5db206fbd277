//! Transfer step implementations
//!
//! | # | step               | execute                      | compensate        |
//! |---|--------------------|------------------------------|-------------------|
//! | 0 | validate_transfer  | wallets exist/active/currency| none              |
//! | 1 | reserve_funds      | record advisory reservation  | clear reservation |
//! | 2 | debit_source       | locked `balance -= amount`   | credit back       |
//! | 3 | credit_destination | locked `balance += amount`   | debit back        |
//! | 4 | finalize_transfer  | snapshots + usage + COMPLETED| inherent in 2/3   |
//!
//! The reservation is advisory only; the authoritative guard is the
//! debit's `balance >= amount` check under the source lease.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache::WalletLease;
use crate::error::WalletError;
use crate::store::{transactions, wallets};
use crate::transfer::TransferPhase;
use crate::transfer::saga::{SagaContext, SagaStep};

/// Advisory reservation lifetime
const RESERVATION_MINUTES: i64 = 30;

/// The transfer step sequence, in execution order
pub fn transfer_steps() -> Vec<Box<dyn SagaStep>> {
    vec![
        Box::new(ValidateTransfer),
        Box::new(ReserveFunds),
        Box::new(DebitSource),
        Box::new(CreditDestination),
        Box::new(FinalizeTransfer),
    ]
}

// ============================================================================
// Step 0: validate_transfer
// ============================================================================

pub struct ValidateTransfer;

#[async_trait]
impl SagaStep for ValidateTransfer {
    fn name(&self) -> &'static str {
        "validate_transfer"
    }

    fn phase_on_success(&self) -> TransferPhase {
        TransferPhase::ValidationComplete
    }

    fn max_retries(&self) -> u32 {
        3
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), WalletError> {
        let source_id = ctx.source_wallet_id()?;
        let destination_id = ctx.destination_wallet_id()?;

        if source_id == destination_id {
            return Err(WalletError::InvalidRequest(
                "cannot transfer to the same wallet".to_string(),
            ));
        }

        let source = wallets::fetch(&ctx.pool, source_id)
            .await?
            .filter(|w| w.active)
            .ok_or(WalletError::NotFound)?;
        if source.user_id != ctx.user_id {
            return Err(WalletError::NotFound);
        }

        let destination = wallets::fetch(&ctx.pool, destination_id)
            .await?
            .filter(|w| w.active)
            .ok_or(WalletError::NotFound)?;

        if source.currency != destination.currency {
            return Err(WalletError::CurrencyMismatch);
        }

        ctx.source = Some(source);
        ctx.destination = Some(destination);
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut SagaContext) -> Result<(), WalletError> {
        Ok(())
    }
}

// ============================================================================
// Step 1: reserve_funds
// ============================================================================

pub struct ReserveFunds;

#[async_trait]
impl SagaStep for ReserveFunds {
    fn name(&self) -> &'static str {
        "reserve_funds"
    }

    fn phase_on_success(&self) -> TransferPhase {
        TransferPhase::FundsReserved
    }

    fn max_retries(&self) -> u32 {
        2
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), WalletError> {
        let expires_at = Utc::now() + ChronoDuration::minutes(RESERVATION_MINUTES);
        transactions::set_reservation(&ctx.pool, ctx.tx.id, ctx.tx.amount, expires_at).await?;

        ctx.tx.reserved_amount = Some(ctx.tx.amount);
        ctx.tx.reservation_expires_at = Some(expires_at);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> Result<(), WalletError> {
        transactions::clear_reservation(&ctx.pool, ctx.tx.id).await?;
        ctx.tx.reserved_amount = None;
        ctx.tx.reservation_expires_at = None;
        Ok(())
    }
}

// ============================================================================
// Step 2: debit_source
// ============================================================================

pub struct DebitSource;

#[async_trait]
impl SagaStep for DebitSource {
    fn name(&self) -> &'static str {
        "debit_source"
    }

    fn phase_on_success(&self) -> TransferPhase {
        TransferPhase::DebitComplete
    }

    fn max_retries(&self) -> u32 {
        2
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), WalletError> {
        let source_id = ctx.source_wallet_id()?;

        let lease = WalletLease::acquire(&ctx.cache, source_id, ctx.write_lease).await?;
        let result = debit_locked(ctx, source_id).await;
        lease.release(&ctx.cache).await;
        result
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> Result<(), WalletError> {
        let source_id = ctx.source_wallet_id()?;
        let amount = ctx.tx.amount;

        let lease = WalletLease::acquire(&ctx.cache, source_id, ctx.write_lease).await?;
        let result = apply_credit(ctx, source_id, amount).await;
        lease.release(&ctx.cache).await;
        result.map(|_| ())
    }
}

async fn debit_locked(ctx: &mut SagaContext, source_id: Uuid) -> Result<(), WalletError> {
    let expected_version = ctx.cache.balance_version(source_id).await.unwrap_or(0);

    let mut db_tx = ctx.pool.begin().await?;
    let before = wallets::balance_for_update(&mut db_tx, source_id)
        .await?
        .ok_or(WalletError::NotFound)?;

    // Authoritative funds guard; the reservation was only advisory
    let after = wallets::debit_guarded(&mut db_tx, source_id, ctx.tx.amount)
        .await?
        .ok_or(WalletError::InsufficientBalance)?;

    transactions::record_source_before(&mut db_tx, ctx.tx.id, before).await?;
    db_tx.commit().await?;

    ctx.tx.source_balance_before = Some(before);
    swap_cached_balance(ctx, source_id, after, expected_version).await;

    tracing::debug!(
        wallet_id = %source_id,
        amount = %ctx.tx.amount,
        balance = %after,
        "Source debited"
    );
    Ok(())
}

// ============================================================================
// Step 3: credit_destination
// ============================================================================

pub struct CreditDestination;

#[async_trait]
impl SagaStep for CreditDestination {
    fn name(&self) -> &'static str {
        "credit_destination"
    }

    fn phase_on_success(&self) -> TransferPhase {
        TransferPhase::CreditComplete
    }

    fn max_retries(&self) -> u32 {
        2
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), WalletError> {
        let destination_id = ctx.destination_wallet_id()?;

        let lease = WalletLease::acquire(&ctx.cache, destination_id, ctx.write_lease).await?;
        let result = credit_locked(ctx, destination_id).await;
        lease.release(&ctx.cache).await;
        result
    }

    /// Undo the credit. The guarded debit can fail when the destination
    /// already spent the funds; that surfaces as a compensation failure
    /// for out-of-band reconciliation.
    async fn compensate(&self, ctx: &mut SagaContext) -> Result<(), WalletError> {
        let destination_id = ctx.destination_wallet_id()?;

        let lease = WalletLease::acquire(&ctx.cache, destination_id, ctx.write_lease).await?;
        let result = reverse_credit_locked(ctx, destination_id).await;
        lease.release(&ctx.cache).await;
        result
    }
}

async fn credit_locked(ctx: &mut SagaContext, destination_id: Uuid) -> Result<(), WalletError> {
    let expected_version = ctx.cache.balance_version(destination_id).await.unwrap_or(0);

    let mut db_tx = ctx.pool.begin().await?;
    let before = wallets::balance_for_update(&mut db_tx, destination_id)
        .await?
        .ok_or(WalletError::NotFound)?;

    let after = wallets::credit(&mut db_tx, destination_id, ctx.tx.amount)
        .await?
        .ok_or(WalletError::NotFound)?;

    transactions::record_destination_before(&mut db_tx, ctx.tx.id, before).await?;
    db_tx.commit().await?;

    ctx.tx.destination_balance_before = Some(before);
    swap_cached_balance(ctx, destination_id, after, expected_version).await;

    tracing::debug!(
        wallet_id = %destination_id,
        amount = %ctx.tx.amount,
        balance = %after,
        "Destination credited"
    );
    Ok(())
}

async fn reverse_credit_locked(
    ctx: &mut SagaContext,
    destination_id: Uuid,
) -> Result<(), WalletError> {
    let expected_version = ctx.cache.balance_version(destination_id).await.unwrap_or(0);

    let mut db_tx = ctx.pool.begin().await?;
    let after = wallets::debit_guarded(&mut db_tx, destination_id, ctx.tx.amount)
        .await?
        .ok_or_else(|| WalletError::CompensationFailure("credit_destination".to_string()))?;
    db_tx.commit().await?;

    swap_cached_balance(ctx, destination_id, after, expected_version).await;
    Ok(())
}

// ============================================================================
// Step 4: finalize_transfer
// ============================================================================

pub struct FinalizeTransfer;

#[async_trait]
impl SagaStep for FinalizeTransfer {
    fn name(&self) -> &'static str {
        "finalize_transfer"
    }

    fn phase_on_success(&self) -> TransferPhase {
        TransferPhase::Completed
    }

    fn retryable(&self) -> bool {
        false
    }

    fn max_retries(&self) -> u32 {
        0
    }

    /// Close the transfer: balance-after snapshots, terminal status, and
    /// the limit usage commit, all in one store transaction. A crash here
    /// leaves the saga recoverable with no usage counted and no COMPLETED
    /// status -- never one without the other.
    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), WalletError> {
        let source_id = ctx.source_wallet_id()?;
        let destination_id = ctx.destination_wallet_id()?;

        let mut db_tx = ctx.pool.begin().await?;
        let source_after = wallets::balance_of(&mut db_tx, source_id)
            .await?
            .ok_or(WalletError::NotFound)?;
        let destination_after = wallets::balance_of(&mut db_tx, destination_id)
            .await?
            .ok_or(WalletError::NotFound)?;

        transactions::finalize(&mut db_tx, ctx.tx.id, source_after, destination_after).await?;
        ctx.limits
            .commit_usage_in_tx(&mut db_tx, ctx.user_id, ctx.tx.amount)
            .await?;
        db_tx.commit().await?;

        ctx.limits.invalidate_counters(ctx.user_id).await;

        ctx.tx.status = crate::models::TransactionStatus::Completed;
        ctx.tx.phase = TransferPhase::Completed;
        ctx.tx.source_balance_after = Some(source_after);
        ctx.tx.destination_balance_after = Some(destination_after);
        ctx.tx.completed_at = Some(Utc::now());
        ctx.tx.reserved_amount = None;
        ctx.tx.reservation_expires_at = None;
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut SagaContext) -> Result<(), WalletError> {
        Ok(())
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Credit a wallet under an already-held lease (compensation path)
async fn apply_credit(
    ctx: &mut SagaContext,
    wallet_id: Uuid,
    amount: Decimal,
) -> Result<Decimal, WalletError> {
    let expected_version = ctx.cache.balance_version(wallet_id).await.unwrap_or(0);

    let mut db_tx = ctx.pool.begin().await?;
    let after = wallets::credit(&mut db_tx, wallet_id, amount)
        .await?
        .ok_or(WalletError::NotFound)?;
    db_tx.commit().await?;

    swap_cached_balance(ctx, wallet_id, after, expected_version).await;
    Ok(after)
}

/// Version-checked cache write after a committed balance change.
/// Failures are logged; the dropped entry re-primes from the store.
async fn swap_cached_balance(
    ctx: &SagaContext,
    wallet_id: Uuid,
    balance: Decimal,
    expected_version: i64,
) {
    if let Err(e) = ctx
        .cache
        .swap_balance(wallet_id, balance, expected_version)
        .await
    {
        tracing::warn!(wallet_id = %wallet_id, error = %e, "Balance cache update failed after commit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_sequence_order() {
        let steps = transfer_steps();
        let names: Vec<&str> = steps.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "validate_transfer",
                "reserve_funds",
                "debit_source",
                "credit_destination",
                "finalize_transfer",
            ]
        );
    }

    #[test]
    fn test_step_retry_budgets() {
        let steps = transfer_steps();
        let budgets: Vec<u32> = steps.iter().map(|s| s.max_retries()).collect();
        assert_eq!(budgets, vec![3, 2, 2, 2, 0]);

        // Only finalize is non-retryable
        assert!(steps[..4].iter().all(|s| s.retryable()));
        assert!(!steps[4].retryable());
    }

    #[test]
    fn test_step_phase_mapping() {
        let steps = transfer_steps();
        let phases: Vec<TransferPhase> = steps.iter().map(|s| s.phase_on_success()).collect();
        assert_eq!(
            phases,
            vec![
                TransferPhase::ValidationComplete,
                TransferPhase::FundsReserved,
                TransferPhase::DebitComplete,
                TransferPhase::CreditComplete,
                TransferPhase::Completed,
            ]
        );
    }
}
