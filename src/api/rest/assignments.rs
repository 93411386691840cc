//! Courier assignment endpoints. Couriers and restaurants poll these; the
//! `check-expired` reads also expire offers whose deadline has passed.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::auth::Authenticated;
use crate::api::rest::extract::{JsonBody, PathParams};
use crate::error::AppError;
use crate::models::assignment::{Assignment, AssignmentAction};
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/courier-assignments/:id",
            get(get_assignment).put(apply_action),
        )
        .route("/courier-assignments/:id/check-expired", get(check_expired))
        .route(
            "/courier-assignments/order/:order_id/check-expired",
            get(check_expired_for_order),
        )
        .route(
            "/courier-assignments/restaurant/:id/orders-needing-couriers",
            get(orders_needing_couriers),
        )
        .route("/courier-assignments/courier/:id/pending", get(pending_offers))
        .route("/courier-assignments/courier/:id/active", get(active_deliveries))
}

#[derive(Deserialize)]
pub struct AssignmentActionRequest {
    pub action: AssignmentAction,
    pub version: Option<u64>,
}

#[derive(Serialize)]
pub struct ExpiredCheck {
    pub expired: bool,
}

async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Assignment>, AppError> {
    state.engine.get_assignment(&actor, id).map(Json)
}

async fn apply_action(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<AssignmentActionRequest>,
) -> Result<Json<Assignment>, AppError> {
    state
        .engine
        .apply_assignment_action(&actor, id, payload.action, payload.version)
        .await
        .map(Json)
}

async fn check_expired(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<ExpiredCheck>, AppError> {
    state.engine.get_assignment(&actor, id)?;
    let expired = state.engine.check_expired(id).await?;
    Ok(Json(ExpiredCheck { expired }))
}

async fn check_expired_for_order(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(order_id): PathParams<Uuid>,
) -> Result<Json<ExpiredCheck>, AppError> {
    state.engine.get_order(&actor, order_id)?;
    let expired = state.engine.check_expired_for_order(order_id).await?;
    Ok(Json(ExpiredCheck { expired }))
}

async fn orders_needing_couriers(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Vec<Order>>, AppError> {
    state
        .engine
        .orders_needing_couriers(&actor, id)
        .await
        .map(Json)
}

async fn pending_offers(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    state
        .engine
        .pending_offers_for_courier(&actor, id)
        .await
        .map(Json)
}

async fn active_deliveries(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    state
        .engine
        .active_deliveries_for_courier(&actor, id)
        .map(Json)
}
