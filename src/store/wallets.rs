//! Wallet row operations
//!
//! All balance arithmetic is expression-based so the row lock covers the
//! full read-compute-commit window. The debit carries its own
//! `balance >= amount` guard; a zero-row update means insufficient funds.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::WalletError;
use crate::models::{Currency, Wallet};

pub async fn insert(pool: &PgPool, wallet: &Wallet) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        INSERT INTO wallets_tb
            (wallet_id, user_id, name, balance, currency, active, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
        "#,
    )
    .bind(wallet.id)
    .bind(wallet.user_id)
    .bind(&wallet.name)
    .bind(wallet.balance)
    .bind(wallet.currency.as_str())
    .bind(wallet.active)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn fetch(pool: &PgPool, wallet_id: Uuid) -> Result<Option<Wallet>, WalletError> {
    let row = sqlx::query(
        r#"
        SELECT wallet_id, user_id, name, balance, currency, active, created_at, updated_at
        FROM wallets_tb
        WHERE wallet_id = $1
        "#,
    )
    .bind(wallet_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| row_to_wallet(&r)).transpose()
}

/// Fetch a wallet the caller may operate on: it must exist, be active, and
/// be owned by `owner`. Missing, inactive, and foreign wallets are all
/// indistinguishable `NotFound` to the caller.
pub async fn fetch_owned(
    pool: &PgPool,
    wallet_id: Uuid,
    owner: Uuid,
) -> Result<Wallet, WalletError> {
    match fetch(pool, wallet_id).await? {
        Some(w) if w.active && w.user_id == owner => Ok(w),
        _ => Err(WalletError::NotFound),
    }
}

/// Balance snapshot under the row lock (saga debit/credit steps)
pub async fn balance_for_update(
    conn: &mut PgConnection,
    wallet_id: Uuid,
) -> Result<Option<Decimal>, WalletError> {
    let row = sqlx::query("SELECT balance FROM wallets_tb WHERE wallet_id = $1 FOR UPDATE")
        .bind(wallet_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|r| r.get("balance")))
}

/// Guarded debit: `balance -= amount` only while `balance >= amount`.
///
/// Returns the new balance, or None when the guard rejected the update.
pub async fn debit_guarded(
    conn: &mut PgConnection,
    wallet_id: Uuid,
    amount: Decimal,
) -> Result<Option<Decimal>, WalletError> {
    let row = sqlx::query(
        r#"
        UPDATE wallets_tb
        SET balance = balance - $1, updated_at = NOW()
        WHERE wallet_id = $2 AND active AND balance >= $1
        RETURNING balance
        "#,
    )
    .bind(amount)
    .bind(wallet_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|r| r.get("balance")))
}

/// Credit: `balance += amount`. Returns the new balance.
pub async fn credit(
    conn: &mut PgConnection,
    wallet_id: Uuid,
    amount: Decimal,
) -> Result<Option<Decimal>, WalletError> {
    let row = sqlx::query(
        r#"
        UPDATE wallets_tb
        SET balance = balance + $1, updated_at = NOW()
        WHERE wallet_id = $2 AND active
        RETURNING balance
        "#,
    )
    .bind(amount)
    .bind(wallet_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|r| r.get("balance")))
}

/// Absolute balance write inside a caller-provided transaction
pub async fn set_balance(
    conn: &mut PgConnection,
    wallet_id: Uuid,
    new_balance: Decimal,
) -> Result<(), WalletError> {
    let result = sqlx::query(
        r#"
        UPDATE wallets_tb
        SET balance = $1, updated_at = NOW()
        WHERE wallet_id = $2
        "#,
    )
    .bind(new_balance)
    .bind(wallet_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(WalletError::NotFound);
    }
    Ok(())
}

/// Plain balance read (no lock)
pub async fn balance_of(
    conn: &mut PgConnection,
    wallet_id: Uuid,
) -> Result<Option<Decimal>, WalletError> {
    let row = sqlx::query("SELECT balance FROM wallets_tb WHERE wallet_id = $1")
        .bind(wallet_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|r| r.get("balance")))
}

fn row_to_wallet(row: &PgRow) -> Result<Wallet, WalletError> {
    let currency_raw: String = row.get("currency");
    let currency: Currency = currency_raw
        .parse()
        .map_err(|_| WalletError::Store(format!("Invalid currency code: {}", currency_raw)))?;

    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(Wallet {
        id: row.get("wallet_id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        balance: row.get("balance"),
        currency,
        active: row.get("active"),
        created_at,
        updated_at,
    })
}
