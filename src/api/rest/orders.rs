use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::auth::Authenticated;
use crate::api::rest::extract::{JsonBody, PathParams, QueryParams};
use crate::engine::lifecycle::PlaceOrder;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::order::{Order, OrderStatus};
use crate::models::review::Review;
use crate::state::AppState;
use crate::store::idempotency::{IDEMPOTENCY_KEY_HEADER, IdempotencyKey};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(place_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", put(change_order_status))
        .route("/orders/:id/assignments", get(list_order_assignments))
        .route("/orders/:id/reviews", get(list_order_reviews))
}

#[derive(Deserialize)]
pub struct StatusChangeQuery {
    pub status: OrderStatus,
    pub version: Option<u64>,
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<IdempotencyKey>, AppError> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| AppError::Validation("idempotency key must be ASCII".to_string()))?;
    IdempotencyKey::parse(raw).map(Some)
}

async fn place_order(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<PlaceOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let key = idempotency_key(&headers)?;
    let order = state.engine.place_order(&actor, payload, key)?;

    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Order>, AppError> {
    state.engine.get_order(&actor, id).map(Json)
}

async fn change_order_status(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
    QueryParams(query): QueryParams<StatusChangeQuery>,
) -> Result<Json<Order>, AppError> {
    let version = query.version.ok_or_else(|| {
        AppError::Validation("version is required to change an order's status".to_string())
    })?;
    state
        .engine
        .change_order_status(&actor, id, query.status, version)
        .await
        .map(Json)
}

async fn list_order_assignments(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    state.engine.assignments_for_order(&actor, id).map(Json)
}

async fn list_order_reviews(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Vec<Review>>, AppError> {
    state.engine.reviews_for_order(&actor, id).map(Json)
}
