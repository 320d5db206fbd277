//! Gateway DTOs and error mapping
//!
//! Success bodies are the binding camelCase contracts of the transfer
//! core; errors carry an `{error: {code, message}}` detail body.

use axum::{Json, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WalletError;
use crate::models::{Currency, Wallet};
use crate::transfer::TransferReceipt;

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletBody {
    pub name: String,
    pub currency: Currency,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFundsBody {
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDto {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub balance: Decimal,
    pub currency: Currency,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletDto {
    fn from(w: Wallet) -> Self {
        Self {
            id: w.id,
            user_id: w.user_id,
            name: w.name,
            balance: w.balance,
            currency: w.currency,
            active: w.active,
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyLookupResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransferReceipt>,
}

// ============================================================================
// Error body
// ============================================================================

/// Gateway error with automatic IntoResponse
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", msg)
    }
}

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        let status = StatusCode::from_u16(err.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_error_mapping() {
        let err: ApiError = WalletError::InsufficientBalance.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "insufficient_balance");

        let err: ApiError = WalletError::NotFound.into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = WalletError::Conflict("dup".into()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_add_funds_body_camel_case() {
        let body: AddFundsBody =
            serde_json::from_str(r#"{"amount": "25.50", "description": "top up"}"#).unwrap();
        assert_eq!(body.amount, "25.50".parse::<Decimal>().unwrap());
        assert_eq!(body.description.as_deref(), Some("top up"));
    }

    #[test]
    fn test_create_wallet_body_currency() {
        let body: CreateWalletBody =
            serde_json::from_str(r#"{"name": "Main", "currency": "USD"}"#).unwrap();
        assert_eq!(body.currency, Currency::USD);

        let bad: Result<CreateWalletBody, _> =
            serde_json::from_str(r#"{"name": "Main", "currency": "JPY"}"#);
        assert!(bad.is_err());
    }
}
