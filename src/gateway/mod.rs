pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::auth::require_auth;
use state::AppState;

/// Build the wallet router. All routes require a bearer identity.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/wallets", post(handlers::create_wallet))
        .route(
            "/wallets/{wallet_id}/transfer",
            post(handlers::create_transfer),
        )
        .route("/wallets/{wallet_id}/add-funds", post(handlers::add_funds))
        .route("/wallets/{wallet_id}/balance", get(handlers::get_balance))
        .route(
            "/wallets/{wallet_id}/transfer-limits",
            get(handlers::get_transfer_limits),
        )
        .route(
            "/wallets/{wallet_id}/transactions/by-idempotency/{key}",
            get(handlers::find_by_idempotency),
        )
        .layer(from_fn_with_state(state.clone(), require_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until shutdown
pub async fn run_server(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Gateway listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
