//! Durable store
//!
//! PostgreSQL persistence for wallets, transactions, and limit ledgers.
//! Saga steps run their multi-statement writes inside a single sqlx
//! transaction; balance arithmetic uses expression updates so no step does
//! a read-modify-write outside the row lock.

pub mod limits;
pub mod schema;
pub mod transactions;
pub mod wallets;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::WalletError;

/// Connect to PostgreSQL with a bounded pool
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, WalletError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}
