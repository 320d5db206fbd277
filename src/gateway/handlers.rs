//! Wallet HTTP handlers
//!
//! Thin collaborator layer: maps the bearer identity and request DTOs
//! onto the transfer core and the core's errors onto status codes.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::HeaderMap,
};
use uuid::Uuid;

use super::state::AppState;
use super::types::{
    AddFundsBody, ApiError, BalanceResponse, CreateWalletBody, IdempotencyLookupResponse,
    WalletDto,
};
use crate::auth::AuthUser;
use crate::limits::LimitSnapshot;
use crate::transfer::{TransferReceipt, TransferRequest};

/// POST /wallets
pub async fn create_wallet(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateWalletBody>,
) -> Result<Json<WalletDto>, ApiError> {
    let wallet = state
        .wallets
        .create_wallet(user.user_id, body.name, body.currency)
        .await?;
    Ok(Json(wallet.into()))
}

/// POST /wallets/{walletId}/transfer
///
/// The `Idempotency-Key` header applies when the body carries no key.
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(wallet_id): Path<Uuid>,
    headers: HeaderMap,
    Json(mut body): Json<TransferRequest>,
) -> Result<Json<TransferReceipt>, ApiError> {
    if body.idempotency_key.is_none()
        && let Some(key) = headers.get("Idempotency-Key").and_then(|v| v.to_str().ok())
    {
        body.idempotency_key = Some(key.to_string());
    }

    tracing::info!(
        user_id = %user.user_id,
        source_wallet_id = %wallet_id,
        destination_wallet_id = %body.destination_wallet_id,
        amount = %body.amount,
        "Transfer requested"
    );

    let receipt = state
        .transfers
        .transfer(user.user_id, wallet_id, body)
        .await?;
    Ok(Json(receipt))
}

/// POST /wallets/{walletId}/add-funds
pub async fn add_funds(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(wallet_id): Path<Uuid>,
    Json(body): Json<AddFundsBody>,
) -> Result<Json<WalletDto>, ApiError> {
    let wallet = state
        .wallets
        .add_funds(wallet_id, user.user_id, body.amount, body.description)
        .await?;
    Ok(Json(wallet.into()))
}

/// GET /wallets/{walletId}/balance
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(wallet_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.wallets.get_balance(wallet_id, user.user_id).await?;
    Ok(Json(BalanceResponse { balance }))
}

/// GET /wallets/{walletId}/transfer-limits
pub async fn get_transfer_limits(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(wallet_id): Path<Uuid>,
) -> Result<Json<LimitSnapshot>, ApiError> {
    // Limits are per user; the wallet in the path anchors the access check
    state
        .transfers
        .assert_wallet_access(user.user_id, wallet_id)
        .await?;
    let snapshot = state.limits.snapshot(user.user_id).await?;
    Ok(Json(snapshot))
}

/// GET /wallets/{walletId}/transactions/by-idempotency/{key}
pub async fn find_by_idempotency(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((_wallet_id, key)): Path<(Uuid, String)>,
) -> Result<Json<IdempotencyLookupResponse>, ApiError> {
    let transaction = state.transfers.find_by_idempotency(user.user_id, &key).await?;
    Ok(Json(IdempotencyLookupResponse {
        exists: transaction.is_some(),
        transaction,
    }))
}
