//! REST adapter over the exchange core.
//!
//! The narrow request/response interface the external web layer calls. No
//! business logic lives here: handlers translate HTTP to core calls and map
//! the error taxonomy to status codes. Uses Extension for state so the
//! router is `Router<()>` and works with `into_make_service()`.

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::error::EngineError;
use crate::exchange::Exchange;
use crate::types::{Currency, OrderId, SubmitRequest, UserId};

/// Shared app state: one exchange per process.
#[derive(Clone)]
pub struct AppState {
    pub(crate) exchange: Arc<Exchange>,
}

/// Builds the REST router for an exchange.
pub fn create_router(exchange: Arc<Exchange>) -> Router<()> {
    let state = AppState { exchange };
    Router::new()
        .route("/health", get(health))
        .route("/pairs", get(list_pairs))
        .route("/orders", post(submit_order))
        .route("/orders/cancel", post(cancel_order))
        .route("/orders/:id", get(order_status))
        .route("/book/:symbol", get(book_snapshot))
        .route("/balance/:user/:currency", get(balance))
        .route("/deposit", post(deposit))
        .layer(Extension(state))
}

fn error_response(err: &EngineError) -> Response {
    let status = match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::AlreadyTerminal(_, _) => StatusCode::CONFLICT,
        EngineError::InsufficientBalance { .. } | EngineError::NoLiquidity(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::SettlementFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::InvalidPair(_)
        | EngineError::InvalidQuantity(_)
        | EngineError::InvalidState(_) => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(serde_json::json!({ "error": err.to_string(), "kind": err.kind() })),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn list_pairs(Extension(state): Extension<AppState>) -> Response {
    (StatusCode::OK, Json(state.exchange.pairs())).into_response()
}

async fn submit_order(
    Extension(state): Extension<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    match state.exchange.submit_order(request) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(serde::Deserialize)]
struct CancelRequest {
    order_id: u64,
    user_id: u64,
}

async fn cancel_order(
    Extension(state): Extension<AppState>,
    Json(body): Json<CancelRequest>,
) -> Response {
    match state
        .exchange
        .cancel_order(OrderId(body.order_id), UserId(body.user_id))
    {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "cancelled": true })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn order_status(
    Extension(state): Extension<AppState>,
    Path(id): Path<u64>,
) -> Response {
    match state.exchange.get_order_status(OrderId(id)) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(serde::Deserialize)]
struct DepthParams {
    depth: Option<usize>,
}

async fn book_snapshot(
    Extension(state): Extension<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<DepthParams>,
) -> Response {
    match state
        .exchange
        .get_book_snapshot(&symbol, params.depth.unwrap_or(20))
    {
        Ok(depth) => (StatusCode::OK, Json(depth)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn balance(
    Extension(state): Extension<AppState>,
    Path((user, currency)): Path<(u64, String)>,
) -> Response {
    let view = state
        .exchange
        .get_balance(UserId(user), &Currency::new(currency));
    (StatusCode::OK, Json(view)).into_response()
}

#[derive(serde::Deserialize)]
struct DepositRequest {
    user_id: u64,
    currency: String,
    amount: Decimal,
}

async fn deposit(
    Extension(state): Extension<AppState>,
    Json(body): Json<DepositRequest>,
) -> Response {
    match state.exchange.deposit(
        UserId(body.user_id),
        &Currency::new(body.currency),
        body.amount,
    ) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response(),
        Err(e) => error_response(&e),
    }
}
