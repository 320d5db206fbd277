//! Core domain entities
//!
//! Wallets, transactions, and limit ledgers. Enums are stored as SMALLINT
//! ids in PostgreSQL; `as_str()` names appear in every external payload.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transfer::TransferPhase;

/// Supported wallet currencies (transfers require matching currency)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    USD,
    EUR,
    GBP,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            _ => Err(()),
        }
    }
}

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum TransactionKind {
    Deposit = 1,
    Withdrawal = 2,
    Transfer = 3,
    Refund = 4,
    Compensation = 5,
}

impl TransactionKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionKind::Deposit),
            2 => Some(TransactionKind::Withdrawal),
            3 => Some(TransactionKind::Transfer),
            4 => Some(TransactionKind::Refund),
            5 => Some(TransactionKind::Compensation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::Transfer => "TRANSFER",
            TransactionKind::Refund => "REFUND",
            TransactionKind::Compensation => "COMPENSATION",
        }
    }
}

/// Transaction status
///
/// Terminal statuses never transition away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum TransactionStatus {
    Pending = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
    Compensated = 6,
}

impl TransactionStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionStatus::Pending),
            2 => Some(TransactionStatus::Processing),
            3 => Some(TransactionStatus::Completed),
            4 => Some(TransactionStatus::Failed),
            5 => Some(TransactionStatus::Cancelled),
            6 => Some(TransactionStatus::Compensated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Compensated => "COMPENSATED",
        }
    }

    /// Terminal statuses admit no further transition
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
                | TransactionStatus::Compensated
        )
    }

    /// An in-flight transaction blocks duplicate idempotency keys
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Pending | TransactionStatus::Processing
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A balance-bearing wallet owned by a user
#[derive(Debug, Clone)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Committed balance, NUMERIC(15,2), never negative
    pub balance: Decimal,
    pub currency: Currency,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A money movement record
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub phase: TransferPhase,
    pub amount: Decimal,
    pub source_wallet_id: Option<Uuid>,
    pub destination_wallet_id: Option<Uuid>,
    pub description: Option<String>,
    /// Opaque key->value map, persisted as JSONB, never read semantically
    pub metadata: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub external_reference_id: Option<String>,
    pub parent_transaction_id: Option<Uuid>,
    pub retry_count: i32,
    pub reserved_amount: Option<Decimal>,
    pub reservation_expires_at: Option<DateTime<Utc>>,
    pub source_balance_before: Option<Decimal>,
    pub source_balance_after: Option<Decimal>,
    pub destination_balance_before: Option<Decimal>,
    pub destination_balance_after: Option<Decimal>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Saga snapshot (strict schema, see `transfer::saga::SagaState`)
    pub saga_state: Option<serde_json::Value>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user daily/monthly transfer limit ledger (1:1 with user)
#[derive(Debug, Clone)]
pub struct LimitLedger {
    pub id: Uuid,
    pub user_id: Uuid,
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    pub daily_used: Decimal,
    pub monthly_used: Decimal,
    pub last_daily_reset: NaiveDate,
    pub last_monthly_reset: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LimitLedger {
    /// Roll the usage windows forward to `today`.
    ///
    /// Returns true when either window was reset and the row must be
    /// persisted. Pure over the injected date so tests control time.
    pub fn roll_window(&mut self, today: NaiveDate) -> bool {
        let mut changed = false;

        if self.last_daily_reset < today {
            self.daily_used = Decimal::ZERO;
            self.last_daily_reset = today;
            changed = true;
        }

        let month_rolled = self.last_monthly_reset.year() < today.year()
            || (self.last_monthly_reset.year() == today.year()
                && self.last_monthly_reset.month() < today.month());
        if month_rolled {
            self.monthly_used = Decimal::ZERO;
            self.last_monthly_reset = today;
            changed = true;
        }

        changed
    }

    /// Check whether `amount` fits both windows after rolling.
    ///
    /// Returns the name of the exceeded window, if any.
    pub fn exceeded_window(&self, amount: Decimal) -> Option<&'static str> {
        if self.daily_used + amount > self.daily_limit {
            Some("daily")
        } else if self.monthly_used + amount > self.monthly_limit {
            Some("monthly")
        } else {
            None
        }
    }

    pub fn daily_remaining(&self) -> Decimal {
        (self.daily_limit - self.daily_used).max(Decimal::ZERO)
    }

    pub fn monthly_remaining(&self) -> Decimal {
        (self.monthly_limit - self.monthly_used).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(daily_used: &str, monthly_used: &str, daily_reset: NaiveDate) -> LimitLedger {
        LimitLedger {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            daily_limit: Decimal::from(10_000),
            monthly_limit: Decimal::from(100_000),
            daily_used: daily_used.parse().unwrap(),
            monthly_used: monthly_used.parse().unwrap(),
            last_daily_reset: daily_reset,
            last_monthly_reset: daily_reset,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_currency_roundtrip() {
        for c in [Currency::USD, Currency::EUR, Currency::GBP] {
            assert_eq!(c.as_str().parse::<Currency>().unwrap(), c);
        }
        assert!("JPY".parse::<Currency>().is_err());
    }

    #[test]
    fn test_status_id_roundtrip() {
        let statuses = [
            TransactionStatus::Pending,
            TransactionStatus::Processing,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
            TransactionStatus::Compensated,
        ];
        for status in statuses {
            assert_eq!(TransactionStatus::from_id(status.id()), Some(status));
        }
        assert!(TransactionStatus::from_id(99).is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(TransactionStatus::Cancelled.is_terminal());
        assert!(TransactionStatus::Compensated.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(!TransactionStatus::Processing.is_terminal());
    }

    #[test]
    fn test_kind_id_roundtrip() {
        for kind in [
            TransactionKind::Deposit,
            TransactionKind::Withdrawal,
            TransactionKind::Transfer,
            TransactionKind::Refund,
            TransactionKind::Compensation,
        ] {
            assert_eq!(TransactionKind::from_id(kind.id()), Some(kind));
        }
    }

    #[test]
    fn test_daily_window_reset() {
        let yesterday = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();

        let mut ledger = ledger("80", "500", yesterday);
        assert!(ledger.roll_window(today));
        assert_eq!(ledger.daily_used, Decimal::ZERO);
        assert_eq!(ledger.last_daily_reset, today);
        // Same month: monthly usage untouched
        assert_eq!(ledger.monthly_used, "500".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_monthly_window_reset() {
        let march = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        let april = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();

        let mut ledger = ledger("80", "500", march);
        assert!(ledger.roll_window(april));
        assert_eq!(ledger.daily_used, Decimal::ZERO);
        assert_eq!(ledger.monthly_used, Decimal::ZERO);
        assert_eq!(ledger.last_monthly_reset, april);
    }

    #[test]
    fn test_monthly_window_reset_across_year() {
        let december = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        let january = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();

        let mut ledger = ledger("0", "900", december);
        assert!(ledger.roll_window(january));
        assert_eq!(ledger.monthly_used, Decimal::ZERO);
    }

    #[test]
    fn test_no_reset_same_day() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let mut ledger = ledger("80", "500", today);
        assert!(!ledger.roll_window(today));
        assert_eq!(ledger.daily_used, "80".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_exceeded_window() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let mut ledger = ledger("80", "500", today);
        ledger.daily_limit = "100".parse().unwrap();

        // 80 + 25 > 100
        assert_eq!(
            ledger.exceeded_window("25".parse().unwrap()),
            Some("daily")
        );
        // 80 + 20 == 100 fits exactly
        assert_eq!(ledger.exceeded_window("20".parse().unwrap()), None);
    }

    #[test]
    fn test_remaining_never_negative() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let mut ledger = ledger("80", "500", today);
        ledger.daily_limit = "50".parse().unwrap();
        assert_eq!(ledger.daily_remaining(), Decimal::ZERO);
    }
}
