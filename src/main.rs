use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use walletflow::cache::CacheService;
use walletflow::config::AppConfig;
use walletflow::gateway::{self, state::AppState};
use walletflow::idempotency::IdempotencyGate;
use walletflow::limits::LimitService;
use walletflow::logging::init_logging;
use walletflow::transfer::TransferService;
use walletflow::wallet::WalletService;
use walletflow::{recovery, store};

#[tokio::main]
async fn main() -> Result<()> {
    let env = std::env::args().nth(1).unwrap_or_else(|| "dev".to_string());
    let config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&config);

    tracing::info!(env = %env, "Starting walletflow");

    let pool = store::connect(&config.store.database_url, config.store.max_connections).await?;
    store::schema::init_schema(&pool).await?;

    let cache = Arc::new(CacheService::new(&config.cache.connection_url())?);

    let write_lease = Duration::from_millis(config.lease.write_timeout_ms);
    let read_lease = Duration::from_millis(config.lease.read_timeout_ms);

    let limits = LimitService::new(
        pool.clone(),
        cache.clone(),
        config.limits.default_daily,
        config.limits.default_monthly,
    );
    let gate = IdempotencyGate::new(pool.clone(), cache.clone());
    let wallets = WalletService::new(pool.clone(), cache.clone(), write_lease, read_lease);
    let transfers = TransferService::new(
        pool.clone(),
        cache.clone(),
        limits.clone(),
        gate,
        write_lease,
    );

    tokio::spawn(recovery::run_sweep_loop(
        pool.clone(),
        Duration::from_secs(config.recovery.sweep_interval_secs),
        Duration::from_secs(config.recovery.stale_after_secs),
    ));

    let state = Arc::new(AppState::new(
        transfers,
        wallets,
        limits,
        config.auth.jwt_secret.clone(),
    ));

    gateway::run_server(state, &config.gateway.host, config.gateway.port).await
}
