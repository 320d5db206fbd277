//! PostgreSQL schema bootstrap

use sqlx::PgPool;

use crate::error::WalletError;

/// Initialize the wallet schema
pub async fn init_schema(pool: &PgPool) -> Result<(), WalletError> {
    tracing::info!("Initializing PostgreSQL schema...");

    for ddl in [
        CREATE_WALLETS_TABLE,
        CREATE_TRANSACTIONS_TABLE,
        CREATE_IDEMPOTENCY_KEY_INDEX,
        CREATE_SOURCE_WALLET_INDEX,
        CREATE_DESTINATION_WALLET_INDEX,
        CREATE_CREATED_AT_INDEX,
        CREATE_EXTERNAL_REFERENCE_INDEX,
        CREATE_LIMIT_LEDGERS_TABLE,
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("PostgreSQL schema initialized");
    Ok(())
}

const CREATE_WALLETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallets_tb (
    wallet_id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    name TEXT NOT NULL,
    balance NUMERIC(15,2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    currency TEXT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions_tb (
    transaction_id UUID PRIMARY KEY,
    kind SMALLINT NOT NULL,
    status SMALLINT NOT NULL,
    phase SMALLINT NOT NULL,
    amount NUMERIC(15,2) NOT NULL CHECK (amount > 0),
    source_wallet_id UUID,
    destination_wallet_id UUID,
    description TEXT,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    idempotency_key TEXT,
    external_reference_id TEXT,
    parent_transaction_id UUID,
    retry_count INTEGER NOT NULL DEFAULT 0,
    reserved_amount NUMERIC(15,2),
    reservation_expires_at TIMESTAMPTZ,
    source_balance_before NUMERIC(15,2),
    source_balance_after NUMERIC(15,2),
    destination_balance_before NUMERIC(15,2),
    destination_balance_after NUMERIC(15,2),
    error_code TEXT,
    error_message TEXT,
    saga_state JSONB,
    processed_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    failed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_IDEMPOTENCY_KEY_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_idempotency_key
    ON transactions_tb (idempotency_key) WHERE idempotency_key IS NOT NULL
"#;

const CREATE_SOURCE_WALLET_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_source_wallet
    ON transactions_tb (source_wallet_id)
"#;

const CREATE_DESTINATION_WALLET_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_destination_wallet
    ON transactions_tb (destination_wallet_id)
"#;

const CREATE_CREATED_AT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_created_at
    ON transactions_tb (created_at)
"#;

const CREATE_EXTERNAL_REFERENCE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_external_reference
    ON transactions_tb (external_reference_id)
"#;

const CREATE_LIMIT_LEDGERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS limit_ledgers_tb (
    ledger_id UUID PRIMARY KEY,
    user_id UUID NOT NULL UNIQUE,
    daily_limit NUMERIC(15,2) NOT NULL,
    monthly_limit NUMERIC(15,2) NOT NULL,
    daily_used NUMERIC(15,2) NOT NULL DEFAULT 0 CHECK (daily_used >= 0),
    monthly_used NUMERIC(15,2) NOT NULL DEFAULT 0 CHECK (monthly_used >= 0),
    last_daily_reset DATE NOT NULL,
    last_monthly_reset DATE NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;
