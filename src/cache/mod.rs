//! Cache & Lock Service
//!
//! Redis-backed keyed values with TTL, wallet leases, and versioned
//! balances. Cache errors never corrupt durable state: callers treat a
//! failed cache write as a logged non-fatal event and fall back to
//! authoritative store reads on a miss.

pub mod lease;
pub mod versioned;

pub use lease::WalletLease;
pub use versioned::CachedBalance;

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::WalletError;

/// Key namespaces
pub const WALLET_BALANCE_PREFIX: &str = "wallet_balance_v2:";
pub const WALLET_LOCK_PREFIX: &str = "wallet_lock:";
pub const TRANSFER_LIMIT_PREFIX: &str = "transfer_limit:";
pub const IDEMPOTENCY_PREFIX: &str = "idempotency:";
pub const IDEMPOTENCY_REQUEST_PREFIX: &str = "idempotency_request:";
pub const IDEMPOTENCY_ERROR_PREFIX: &str = "idempotency_error:";
pub const REQUEST_HASH_PREFIX: &str = "request_hash:";

/// TTLs in seconds
pub const BALANCE_TTL_SECS: u64 = 300;
pub const RESULT_TTL_SECS: u64 = 3600;
pub const REQUEST_TTL_SECS: u64 = 1800;
pub const REQUEST_HASH_TTL_SECS: u64 = 1800;
pub const ERROR_TTL_SECS: u64 = 300;
pub const DAILY_COUNTER_TTL_SECS: u64 = 86_400;
pub const MONTHLY_COUNTER_TTL_SECS: u64 = 30 * 86_400;

/// Shared Redis client wrapper
#[derive(Clone)]
pub struct CacheService {
    client: redis::Client,
}

impl CacheService {
    pub fn new(redis_url: &str) -> Result<Self, WalletError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub(crate) async fn conn(&self) -> Result<MultiplexedConnection, WalletError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Get a JSON value; a missing or undecodable entry reads as None
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, WalletError> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(s) => match serde_json::from_str(&s) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                    let _: Result<(), _> = conn.del(key).await;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Set a JSON value with TTL
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), WalletError> {
        let mut conn = self.conn().await?;
        let raw = serde_json::to_string(value)
            .map_err(|e| WalletError::Cache(format!("serialize {}: {}", key, e)))?;
        let _: () = conn.set_ex(key, raw, ttl_secs).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), WalletError> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// Delete several keys, logging instead of failing (invalidation path)
    pub async fn invalidate(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.delete(key).await {
                tracing::warn!(key = %key, error = %e, "Cache invalidation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces_are_distinct() {
        let prefixes = [
            WALLET_BALANCE_PREFIX,
            WALLET_LOCK_PREFIX,
            TRANSFER_LIMIT_PREFIX,
            IDEMPOTENCY_PREFIX,
            IDEMPOTENCY_REQUEST_PREFIX,
            IDEMPOTENCY_ERROR_PREFIX,
            REQUEST_HASH_PREFIX,
        ];
        for (i, a) in prefixes.iter().enumerate() {
            for b in prefixes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_ttl_constants() {
        assert_eq!(RESULT_TTL_SECS, 3600);
        assert_eq!(REQUEST_HASH_TTL_SECS, 1800);
        assert_eq!(ERROR_TTL_SECS, 300);
        assert_eq!(BALANCE_TTL_SECS, 300);
    }
}
