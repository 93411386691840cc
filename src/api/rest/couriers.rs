use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::rest::auth::Authenticated;
use crate::api::rest::extract::{JsonBody, PathParams};
use crate::api::rest::{require_text, validate_location};
use crate::error::AppError;
use crate::models::account::{Actor, Role};
use crate::models::courier::{Courier, CourierStatus, GeoPoint};
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(register_courier).get(list_couriers))
        .route("/couriers/:id/status", patch(update_courier_status))
        .route("/couriers/:id/location", patch(update_courier_location))
        .route("/couriers/:id/orders", get(list_courier_orders))
}

#[derive(Deserialize)]
pub struct RegisterCourierRequest {
    pub name: String,
    pub location: GeoPoint,
}

#[derive(Serialize)]
pub struct CourierRegistered {
    pub courier: Courier,
    pub token: String,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CourierStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<RegisterCourierRequest>,
) -> Result<(StatusCode, Json<CourierRegistered>), AppError> {
    let name = require_text("name", payload.name)?;
    validate_location(&payload.location)?;

    let courier = state.directory.add_courier(Courier {
        id: Uuid::new_v4(),
        name,
        location: payload.location,
        status: CourierStatus::Available,
        updated_at: state.engine.now(),
    });
    let token = state.directory.issue_token(Actor::courier(courier.id));

    info!(courier_id = %courier.id, "courier registered");
    Ok((StatusCode::CREATED, Json(CourierRegistered { courier, token })))
}

async fn list_couriers(
    State(state): State<Arc<AppState>>,
    Authenticated(_actor): Authenticated,
) -> Json<Vec<Courier>> {
    Json(state.directory.couriers())
}

async fn update_courier_status(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<UpdateStatusRequest>,
) -> Result<Json<Courier>, AppError> {
    actor.require_self(Role::Courier, id)?;

    let courier = state
        .directory
        .set_courier_status(id, payload.status, state.engine.now())?;

    info!(courier_id = %id, status = ?courier.status, "courier status updated");
    Ok(Json(courier))
}

async fn update_courier_location(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<UpdateLocationRequest>,
) -> Result<Json<Courier>, AppError> {
    actor.require_self(Role::Courier, id)?;
    validate_location(&payload.location)?;

    state
        .directory
        .set_courier_location(id, payload.location, state.engine.now())
        .map(Json)
}

async fn list_courier_orders(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Vec<Order>>, AppError> {
    state.engine.list_orders_for_courier(&actor, id).map(Json)
}
