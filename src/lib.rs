//! walletflow - Peer-to-Peer Wallet Transfer Service
//!
//! Idempotent, compensatable money movement between user wallets,
//! coordinating a distributed lock, PostgreSQL, and Redis so each
//! accepted transfer debits exactly one wallet and credits exactly one
//! other, or fully unwinds on failure.
//!
//! # Modules
//!
//! - [`models`] - Wallets, transactions, limit ledgers
//! - [`error`] - The `WalletError` sum type
//! - [`cache`] - Redis KV, wallet leases, versioned balances
//! - [`store`] - PostgreSQL persistence
//! - [`wallet`] - Wallet Mutation Layer
//! - [`limits`] - Limit Ledger (daily/monthly windows)
//! - [`idempotency`] - Idempotency Gate
//! - [`transfer`] - Saga Coordinator and transfer steps
//! - [`gateway`] - HTTP collaborator layer

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod idempotency;
pub mod limits;
pub mod logging;
pub mod models;
pub mod recovery;
pub mod store;
pub mod transfer;
pub mod wallet;

pub use cache::CacheService;
pub use config::AppConfig;
pub use error::WalletError;
pub use idempotency::IdempotencyGate;
pub use limits::LimitService;
pub use models::{Currency, LimitLedger, Transaction, TransactionKind, TransactionStatus, Wallet};
pub use transfer::{TransferPhase, TransferReceipt, TransferRequest, TransferService};
pub use wallet::WalletService;
