//! Limit ledger row operations

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::WalletError;
use crate::models::LimitLedger;

/// Fetch the user's ledger, creating it with the configured defaults on
/// first use. The unique constraint on `user_id` makes concurrent first
/// transfers converge on one row.
pub async fn get_or_create(
    pool: &PgPool,
    user_id: Uuid,
    daily_limit: Decimal,
    monthly_limit: Decimal,
    today: NaiveDate,
) -> Result<LimitLedger, WalletError> {
    sqlx::query(
        r#"
        INSERT INTO limit_ledgers_tb
            (ledger_id, user_id, daily_limit, monthly_limit,
             daily_used, monthly_used, last_daily_reset, last_monthly_reset,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, 0, 0, $5, $5, NOW(), NOW())
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(daily_limit)
    .bind(monthly_limit)
    .bind(today)
    .execute(pool)
    .await?;

    fetch(pool, user_id)
        .await?
        .ok_or_else(|| WalletError::Store(format!("Limit ledger missing for user {}", user_id)))
}

pub async fn fetch(pool: &PgPool, user_id: Uuid) -> Result<Option<LimitLedger>, WalletError> {
    let row = sqlx::query(
        r#"
        SELECT ledger_id, user_id, daily_limit, monthly_limit,
               daily_used, monthly_used, last_daily_reset, last_monthly_reset,
               created_at, updated_at
        FROM limit_ledgers_tb
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| row_to_ledger(&r)))
}

/// Persist a window reset. Independent of transfer outcome: a reset
/// observed before the transfer commits remains.
pub async fn persist_window(pool: &PgPool, ledger: &LimitLedger) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE limit_ledgers_tb
        SET daily_used = $1, monthly_used = $2,
            last_daily_reset = $3, last_monthly_reset = $4,
            updated_at = NOW()
        WHERE user_id = $5
        "#,
    )
    .bind(ledger.daily_used)
    .bind(ledger.monthly_used)
    .bind(ledger.last_daily_reset)
    .bind(ledger.last_monthly_reset)
    .bind(ledger.user_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Advance both usage counters. Runs inside the saga's finalize
/// transaction so usage commits atomically with transfer completion.
pub async fn add_usage(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: Decimal,
) -> Result<(), WalletError> {
    let result = sqlx::query(
        r#"
        UPDATE limit_ledgers_tb
        SET daily_used = daily_used + $1,
            monthly_used = monthly_used + $1,
            updated_at = NOW()
        WHERE user_id = $2
        "#,
    )
    .bind(amount)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(WalletError::Store(format!(
            "Limit ledger missing for user {}",
            user_id
        )));
    }
    Ok(())
}

fn row_to_ledger(row: &PgRow) -> LimitLedger {
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    LimitLedger {
        id: row.get("ledger_id"),
        user_id: row.get("user_id"),
        daily_limit: row.get("daily_limit"),
        monthly_limit: row.get("monthly_limit"),
        daily_used: row.get("daily_used"),
        monthly_used: row.get("monthly_used"),
        last_daily_reset: row.get("last_daily_reset"),
        last_monthly_reset: row.get("last_monthly_reset"),
        created_at,
        updated_at,
    }
}
