//! Versioned wallet balance cache
//!
//! `wallet_balance_v2:{walletId}` holds `{balance, version, lastUpdated}`
//! with a 5 minute TTL. Writes go through a server-side compare-and-swap
//! on the embedded version, so a writer that outlived its lease cannot
//! clobber a newer balance: its expected version no longer matches and the
//! write is rejected. On rejection the entry is dropped and re-primed from
//! the store on the next read (repair path).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BALANCE_TTL_SECS, CacheService, WALLET_BALANCE_PREFIX};
use crate::error::WalletError;

/// CAS: write only when the stored version matches ARGV[1]; an absent
/// entry accepts any write (it will carry the caller's new version)
const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if cur then
    local decoded = cjson.decode(cur)
    if tostring(decoded['version']) ~= ARGV[1] then
        return 0
    end
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[3]))
return 1
"#;

/// Cached balance entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedBalance {
    pub balance: Decimal,
    pub version: i64,
    pub last_updated: DateTime<Utc>,
}

impl CachedBalance {
    /// Whether the entry is fresh enough to serve without the lease
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age_secs: i64) -> bool {
        (now - self.last_updated).num_seconds() < max_age_secs
    }
}

fn balance_key(wallet_id: Uuid) -> String {
    format!("{}{}", WALLET_BALANCE_PREFIX, wallet_id)
}

impl CacheService {
    /// Read the cached balance entry, if any
    pub async fn balance_entry(&self, wallet_id: Uuid) -> Result<Option<CachedBalance>, WalletError> {
        self.get_json(&balance_key(wallet_id)).await
    }

    /// Version currently held in the cache (0 when absent)
    pub async fn balance_version(&self, wallet_id: Uuid) -> Result<i64, WalletError> {
        Ok(self
            .balance_entry(wallet_id)
            .await?
            .map(|e| e.version)
            .unwrap_or(0))
    }

    /// Compare-and-swap the balance entry.
    ///
    /// Writes `{balance, expected_version + 1, now}` only if the stored
    /// version still equals `expected_version`. Returns false on a version
    /// conflict, in which case the stale entry is dropped so the next read
    /// re-primes from the store.
    pub async fn swap_balance(
        &self,
        wallet_id: Uuid,
        balance: Decimal,
        expected_version: i64,
    ) -> Result<bool, WalletError> {
        let key = balance_key(wallet_id);
        let entry = CachedBalance {
            balance,
            version: expected_version + 1,
            last_updated: Utc::now(),
        };
        let raw = serde_json::to_string(&entry)
            .map_err(|e| WalletError::Cache(format!("serialize {}: {}", key, e)))?;

        let mut conn = self.conn().await?;
        let swapped: i64 = redis::Script::new(CAS_SCRIPT)
            .key(&key)
            .arg(expected_version)
            .arg(raw)
            .arg(BALANCE_TTL_SECS)
            .invoke_async(&mut conn)
            .await?;

        if swapped == 1 {
            return Ok(true);
        }

        tracing::warn!(
            wallet_id = %wallet_id,
            expected_version = expected_version,
            "Balance cache version conflict, dropping entry for re-prime"
        );
        let _ = self.delete(&key).await;
        Ok(false)
    }

    /// Prime the entry at version 1 (wallet creation). Best-effort.
    pub async fn prime_balance(&self, wallet_id: Uuid, balance: Decimal) {
        if let Err(e) = self.swap_balance(wallet_id, balance, 0).await {
            tracing::warn!(wallet_id = %wallet_id, error = %e, "Balance cache prime failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_freshness_window() {
        let now = Utc::now();
        let entry = CachedBalance {
            balance: Decimal::from(100),
            version: 3,
            last_updated: now - Duration::seconds(30),
        };
        assert!(entry.is_fresh(now, 60));
        assert!(!entry.is_fresh(now, 30));
        assert!(!entry.is_fresh(now + Duration::seconds(31), 60));
    }

    #[test]
    fn test_entry_serde_shape() {
        let entry = CachedBalance {
            balance: "850.00".parse().unwrap(),
            version: 7,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["version"], 7);
        assert!(json.get("lastUpdated").is_some());
        assert!(json.get("last_updated").is_none());

        let back: CachedBalance = serde_json::from_value(json).unwrap();
        assert_eq!(back.version, 7);
        assert_eq!(back.balance, entry.balance);
    }
}
