//! Transaction row operations
//!
//! The transaction row is the durable record of a transfer: status, phase,
//! reservation, balance snapshots, error detail, and the saga state
//! snapshot that makes a crashed saga recoverable from the store alone.
//! `idempotency_key` carries a unique partial index; the insert surfaces a
//! duplicate as `Conflict` so the gate can branch on the existing row.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use crate::error::WalletError;
use crate::models::{Transaction, TransactionKind, TransactionStatus};
use crate::transfer::TransferPhase;

pub async fn insert(pool: &PgPool, tx: &Transaction) -> Result<(), WalletError> {
    let result = sqlx::query(
        r#"
        INSERT INTO transactions_tb
            (transaction_id, kind, status, phase, amount,
             source_wallet_id, destination_wallet_id, description, metadata,
             idempotency_key, external_reference_id, parent_transaction_id,
             retry_count, source_balance_before, source_balance_after,
             destination_balance_before, destination_balance_after,
             completed_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, NOW(), NOW())
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
    .bind(&tx.idempotency_key)
    .bind(&tx.external_reference_id)
    .bind(tx.parent_transaction_id)
    .bind(tx.retry_count)
    .bind(tx.source_balance_before)
    .bind(tx.source_balance_after)
    .bind(tx.destination_balance_before)
    .bind(tx.destination_balance_after)
    .bind(tx.completed_at)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(WalletError::Conflict(
            "idempotency key already recorded".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch(pool: &PgPool, id: Uuid) -> Result<Option<Transaction>, WalletError> {
    let row = sqlx::query(&select_sql("WHERE transaction_id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(|r| row_to_transaction(&r)).transpose()
}

/// Most recent transaction carrying this idempotency key
pub async fn latest_by_key(pool: &PgPool, key: &str) -> Result<Option<Transaction>, WalletError> {
    let row = sqlx::query(&select_sql(
        "WHERE idempotency_key = $1 ORDER BY created_at DESC LIMIT 1",
    ))
    .bind(key)
    .fetch_optional(pool)
    .await?;

    row.map(|r| row_to_transaction(&r)).transpose()
}

pub async fn mark_processing(pool: &PgPool, id: Uuid) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET status = $1, processed_at = NOW(), updated_at = NOW()
        WHERE transaction_id = $2
        "#,
    )
    .bind(TransactionStatus::Processing.id())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_phase(pool: &PgPool, id: Uuid, phase: TransferPhase) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET phase = $1, updated_at = NOW()
        WHERE transaction_id = $2
        "#,
    )
    .bind(phase.id())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist the saga snapshot (strict JSON schema, see `transfer::saga`)
pub async fn set_saga_state(
    pool: &PgPool,
    id: Uuid,
    saga_state: &serde_json::Value,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET saga_state = $1, updated_at = NOW()
        WHERE transaction_id = $2
        "#,
    )
    .bind(saga_state)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_reservation(
    pool: &PgPool,
    id: Uuid,
    amount: Decimal,
    expires_at: DateTime<Utc>,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET reserved_amount = $1, reservation_expires_at = $2, updated_at = NOW()
        WHERE transaction_id = $3
        "#,
    )
    .bind(amount)
    .bind(expires_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn clear_reservation(pool: &PgPool, id: Uuid) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET reserved_amount = NULL, reservation_expires_at = NULL, updated_at = NOW()
        WHERE transaction_id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Source-side pre-debit snapshot, written inside the debit transaction
pub async fn record_source_before(
    conn: &mut PgConnection,
    id: Uuid,
    before: Decimal,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET source_balance_before = $1, updated_at = NOW()
        WHERE transaction_id = $2
        "#,
    )
    .bind(before)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Destination-side pre-credit snapshot, written inside the credit transaction
pub async fn record_destination_before(
    conn: &mut PgConnection,
    id: Uuid,
    before: Decimal,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET destination_balance_before = $1, updated_at = NOW()
        WHERE transaction_id = $2
        "#,
    )
    .bind(before)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Close a successful transfer: balance-after snapshots, terminal status
/// and phase, completion stamp, reservation cleared. Runs inside the
/// finalize step's transaction so it commits atomically with the limit
/// usage update.
pub async fn finalize(
    conn: &mut PgConnection,
    id: Uuid,
    source_after: Decimal,
    destination_after: Decimal,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET status = $1,
            phase = $2,
            source_balance_after = $3,
            destination_balance_after = $4,
            reserved_amount = NULL,
            reservation_expires_at = NULL,
            completed_at = NOW(),
            updated_at = NOW()
        WHERE transaction_id = $5
        "#,
    )
    .bind(TransactionStatus::Completed.id())
    .bind(TransferPhase::Completed.id())
    .bind(source_after)
    .bind(destination_after)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Record terminal failure with error detail. Never downgrades an already
/// terminal status.
pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    phase: TransferPhase,
    error_code: &str,
    error_message: &str,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET status = $1, phase = $2, error_code = $3, error_message = $4,
            failed_at = NOW(), updated_at = NOW()
        WHERE transaction_id = $5 AND status NOT IN ($6, $7, $8)
        "#,
    )
    .bind(TransactionStatus::Failed.id())
    .bind(phase.id())
    .bind(error_code)
    .bind(error_message)
    .bind(id)
    .bind(TransactionStatus::Completed.id())
    .bind(TransactionStatus::Cancelled.id())
    .bind(TransactionStatus::Compensated.id())
    .execute(pool)
    .await?;

    Ok(())
}

/// Detach the idempotency key from a retried failure so the unique index
/// accepts the fresh attempt. The old row stays as audit via the new
/// row's parent link.
pub async fn detach_idempotency_key(pool: &PgPool, id: Uuid) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET idempotency_key = NULL, updated_at = NOW()
        WHERE transaction_id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn increment_retry(pool: &PgPool, id: Uuid) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE transactions_tb
        SET retry_count = retry_count + 1, updated_at = NOW()
        WHERE transaction_id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Transfers stuck in a non-terminal status for longer than `threshold`.
/// Consumed by the recovery sweep as reconciliation alerts.
pub async fn find_stale(
    pool: &PgPool,
    threshold: Duration,
) -> Result<Vec<Transaction>, WalletError> {
    let rows = sqlx::query(&select_sql(
        r#"
        WHERE kind = $1
          AND status IN ($2, $3)
          AND updated_at < NOW() - INTERVAL '1 second' * $4
        ORDER BY updated_at ASC
        LIMIT 100
        "#,
    ))
    .bind(TransactionKind::Transfer.id())
    .bind(TransactionStatus::Pending.id())
    .bind(TransactionStatus::Processing.id())
    .bind(threshold.as_secs() as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_transaction).collect()
}

fn select_sql(suffix: &str) -> String {
    format!(
        r#"
        SELECT transaction_id, kind, status, phase, amount,
               source_wallet_id, destination_wallet_id, description, metadata,
               idempotency_key, external_reference_id, parent_transaction_id,
               retry_count, reserved_amount, reservation_expires_at,
               source_balance_before, source_balance_after,
               destination_balance_before, destination_balance_after,
               error_code, error_message, saga_state,
               processed_at, completed_at, failed_at, created_at, updated_at
        FROM transactions_tb
        {}
        "#,
        suffix
    )
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn row_to_transaction(row: &PgRow) -> Result<Transaction, WalletError> {
    let kind_id: i16 = row.get("kind");
    let kind = TransactionKind::from_id(kind_id)
        .ok_or_else(|| WalletError::Store(format!("Invalid transaction kind: {}", kind_id)))?;

    let status_id: i16 = row.get("status");
    let status = TransactionStatus::from_id(status_id)
        .ok_or_else(|| WalletError::Store(format!("Invalid transaction status: {}", status_id)))?;

    let phase_id: i16 = row.get("phase");
    let phase = TransferPhase::from_id(phase_id)
        .ok_or_else(|| WalletError::Store(format!("Invalid transfer phase: {}", phase_id)))?;

    Ok(Transaction {
        id: row.get("transaction_id"),
        kind,
        status,
        phase,
        amount: row.get("amount"),
        source_wallet_id: row.get("source_wallet_id"),
        destination_wallet_id: row.get("destination_wallet_id"),
        description: row.get("description"),
        metadata: row.get("metadata"),
        idempotency_key: row.get("idempotency_key"),
        external_reference_id: row.get("external_reference_id"),
        parent_transaction_id: row.get("parent_transaction_id"),
        retry_count: row.get("retry_count"),
        reserved_amount: row.get("reserved_amount"),
        reservation_expires_at: row.get("reservation_expires_at"),
        source_balance_before: row.get("source_balance_before"),
        source_balance_after: row.get("source_balance_after"),
        destination_balance_before: row.get("destination_balance_before"),
        destination_balance_after: row.get("destination_balance_after"),
        error_code: row.get("error_code"),
        error_message: row.get("error_message"),
        saga_state: row.get("saga_state"),
        processed_at: row.get("processed_at"),
        completed_at: row.get("completed_at"),
        failed_at: row.get("failed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
