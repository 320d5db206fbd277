//! Stale-transfer recovery sweep
//!
//! Periodically surfaces transfers stuck in PENDING/PROCESSING as
//! operational alerts. The durable saga snapshot on each row makes manual
//! reconciliation deterministic; the sweep never re-drives a saga itself.

use std::time::Duration;

use sqlx::PgPool;

use crate::store::transactions;

pub async fn run_sweep_loop(pool: PgPool, interval: Duration, stale_after: Duration) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        stale_after_secs = stale_after.as_secs(),
        "Recovery sweep started"
    );

    loop {
        tokio::time::sleep(interval).await;

        match transactions::find_stale(&pool, stale_after).await {
            Ok(stale) if stale.is_empty() => {
                tracing::debug!("Recovery sweep: no stale transfers");
            }
            Ok(stale) => {
                for tx in &stale {
                    tracing::error!(
                        transaction_id = %tx.id,
                        status = %tx.status,
                        phase = %tx.phase,
                        retry_count = tx.retry_count,
                        age_secs = (chrono::Utc::now() - tx.updated_at).num_seconds(),
                        "STALE TRANSFER requires reconciliation"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Recovery sweep query failed");
            }
        }
    }
}
