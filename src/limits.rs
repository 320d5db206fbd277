//! Limit Ledger
//!
//! Daily/monthly windowed usage tracking. `check_and_project` validates a
//! prospective transfer and persists any window reset it observes --
//! independent of whether the transfer later succeeds. Usage itself is
//! only committed by the saga's finalize step, so limits are never spent
//! on rolled-back transfers.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::{
    CacheService, DAILY_COUNTER_TTL_SECS, MONTHLY_COUNTER_TTL_SECS, TRANSFER_LIMIT_PREFIX,
};
use crate::error::WalletError;
use crate::models::LimitLedger;

/// Snapshot served by the transfer-limits endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitSnapshot {
    pub daily_limit: Decimal,
    pub daily_used: Decimal,
    pub daily_remaining: Decimal,
    pub monthly_limit: Decimal,
    pub monthly_used: Decimal,
    pub monthly_remaining: Decimal,
    pub last_daily_reset: NaiveDate,
    pub last_monthly_reset: NaiveDate,
}

/// Tracks windowed usage and gates transfers
#[derive(Clone)]
pub struct LimitService {
    pool: PgPool,
    cache: Arc<CacheService>,
    default_daily: Decimal,
    default_monthly: Decimal,
}

impl LimitService {
    pub fn new(
        pool: PgPool,
        cache: Arc<CacheService>,
        default_daily: Decimal,
        default_monthly: Decimal,
    ) -> Self {
        Self {
            pool,
            cache,
            default_daily,
            default_monthly,
        }
    }

    /// Validate that `amount` fits the user's remaining daily and monthly
    /// windows, rolling and persisting expired windows first.
    pub async fn check_and_project(
        &self,
        user_id: Uuid,
        amount: Decimal,
    ) -> Result<(), WalletError> {
        let today = Utc::now().date_naive();
        let ledger = self.load_rolled(user_id, today).await?;

        if let Some(window) = ledger.exceeded_window(amount) {
            tracing::info!(
                user_id = %user_id,
                amount = %amount,
                window = window,
                "Transfer rejected by limit ledger"
            );
            return Err(WalletError::LimitExceeded(window.to_string()));
        }

        Ok(())
    }

    /// Advance usage inside the caller's store transaction (saga finalize)
    pub async fn commit_usage_in_tx(
        &self,
        conn: &mut sqlx::PgConnection,
        user_id: Uuid,
        amount: Decimal,
    ) -> Result<(), WalletError> {
        crate::store::limits::add_usage(conn, user_id, amount).await
    }

    /// Drop the cached counters after a usage commit
    pub async fn invalidate_counters(&self, user_id: Uuid) {
        self.cache
            .invalidate(&[
                format!("{}{}:daily", TRANSFER_LIMIT_PREFIX, user_id),
                format!("{}{}:monthly", TRANSFER_LIMIT_PREFIX, user_id),
            ])
            .await;
    }

    /// Full limit snapshot for the transfer-limits endpoint. Refreshes the
    /// cached counters as a side effect.
    pub async fn snapshot(&self, user_id: Uuid) -> Result<LimitSnapshot, WalletError> {
        let today = Utc::now().date_naive();
        let ledger = self.load_rolled(user_id, today).await?;

        let daily_key = format!("{}{}:daily", TRANSFER_LIMIT_PREFIX, user_id);
        let monthly_key = format!("{}{}:monthly", TRANSFER_LIMIT_PREFIX, user_id);
        if let Err(e) = self
            .cache
            .set_json(&daily_key, &ledger.daily_used, DAILY_COUNTER_TTL_SECS)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Daily counter cache write failed");
        }
        if let Err(e) = self
            .cache
            .set_json(&monthly_key, &ledger.monthly_used, MONTHLY_COUNTER_TTL_SECS)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Monthly counter cache write failed");
        }

        Ok(LimitSnapshot {
            daily_limit: ledger.daily_limit,
            daily_used: ledger.daily_used,
            daily_remaining: ledger.daily_remaining(),
            monthly_limit: ledger.monthly_limit,
            monthly_used: ledger.monthly_used,
            monthly_remaining: ledger.monthly_remaining(),
            last_daily_reset: ledger.last_daily_reset,
            last_monthly_reset: ledger.last_monthly_reset,
        })
    }

    /// Load the ledger (creating with defaults on first use) and persist
    /// any window reset observed at `today`
    async fn load_rolled(
        &self,
        user_id: Uuid,
        today: NaiveDate,
    ) -> Result<LimitLedger, WalletError> {
        let mut ledger = crate::store::limits::get_or_create(
            &self.pool,
            user_id,
            self.default_daily,
            self.default_monthly,
            today,
        )
        .await?;

        if ledger.roll_window(today) {
            crate::store::limits::persist_window(&self.pool, &ledger).await?;
            tracing::debug!(user_id = %user_id, "Limit windows rolled to {}", today);
        }

        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_snapshot_serde_shape() {
        let today = Utc::now().date_naive();
        let snapshot = LimitSnapshot {
            daily_limit: Decimal::from(10_000),
            daily_used: Decimal::from(150),
            daily_remaining: Decimal::from(9_850),
            monthly_limit: Decimal::from(100_000),
            monthly_used: Decimal::from(150),
            monthly_remaining: Decimal::from(99_850),
            last_daily_reset: today,
            last_monthly_reset: today,
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        for field in [
            "dailyLimit",
            "dailyUsed",
            "dailyRemaining",
            "monthlyLimit",
            "monthlyUsed",
            "monthlyRemaining",
            "lastDailyReset",
            "lastMonthlyReset",
        ] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
    }
}
