//! Wallet lease
//!
//! Named mutual exclusion on `wallet_lock:{walletId}`: set-if-absent with
//! expiry, fresh random token per acquisition, scripted compare-and-delete
//! release so only the holder can release. The TTL bounds progress: a
//! holder that outlives its lease loses the right to apply updates, which
//! the versioned-balance CAS then rejects.

use std::time::{Duration, Instant};

use rand::Rng;
use rand::distributions::Alphanumeric;
use uuid::Uuid;

use super::{CacheService, WALLET_LOCK_PREFIX};
use crate::error::WalletError;

/// Poll interval while waiting for a contended lease
const ACQUIRE_RETRY_MS: u64 = 50;

/// Compare-and-delete: only the token holder releases
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// An exclusive, time-bounded claim on one wallet
pub struct WalletLease {
    key: String,
    token: String,
}

impl WalletLease {
    /// Acquire the lease for `wallet_id`, waiting up to `timeout`.
    ///
    /// The lease expiry equals the acquisition timeout. Fails with
    /// `LockTimeout` when the deadline passes without winning the key.
    pub async fn acquire(
        cache: &CacheService,
        wallet_id: Uuid,
        timeout: Duration,
    ) -> Result<Self, WalletError> {
        let key = format!("{}{}", WALLET_LOCK_PREFIX, wallet_id);
        let token = fresh_token();
        let deadline = Instant::now() + timeout;
        let ttl_ms = timeout.as_millis() as u64;

        let mut conn = cache.conn().await?;
        loop {
            let won: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;

            if won.is_some() {
                tracing::debug!(wallet_id = %wallet_id, "Wallet lease acquired");
                return Ok(Self { key, token });
            }

            if Instant::now() >= deadline {
                return Err(WalletError::LockTimeout(format!(
                    "wallet {} lock busy after {}ms",
                    wallet_id, ttl_ms
                )));
            }

            tokio::time::sleep(Duration::from_millis(ACQUIRE_RETRY_MS)).await;
        }
    }

    /// Release the lease. Best-effort: an expired or stolen lease is a
    /// no-op, a cache error is logged and swallowed (the TTL cleans up).
    pub async fn release(self, cache: &CacheService) {
        let mut conn = match cache.conn().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Lease release skipped");
                return;
            }
        };

        let released: Result<i64, _> = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await;

        match released {
            Ok(1) => tracing::debug!(key = %self.key, "Wallet lease released"),
            Ok(_) => tracing::warn!(key = %self.key, "Lease already expired or taken over"),
            Err(e) => tracing::warn!(key = %self.key, error = %e, "Lease release failed"),
        }
    }

}

fn fresh_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_fresh() {
        let a = fresh_token();
        let b = fresh_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_lock_key_namespace() {
        let id = Uuid::new_v4();
        let key = format!("{}{}", WALLET_LOCK_PREFIX, id);
        assert!(key.starts_with("wallet_lock:"));
        assert!(key.ends_with(&id.to_string()));
    }
}
