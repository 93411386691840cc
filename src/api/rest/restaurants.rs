use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::rest::auth::Authenticated;
use crate::api::rest::extract::{JsonBody, PathParams};
use crate::api::rest::{require_text, validate_location};
use crate::error::AppError;
use crate::models::account::Actor;
use crate::models::assignment::Assignment;
use crate::models::courier::{AvailableCourier, GeoPoint};
use crate::models::order::Order;
use crate::models::restaurant::{MenuItem, Restaurant};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/restaurants", post(register_restaurant))
        .route("/restaurants/:id", get(get_restaurant))
        .route("/restaurants/:id/orders", get(list_restaurant_orders))
        .route(
            "/restaurants/:id/available-couriers",
            get(list_available_couriers),
        )
        .route(
            "/restaurants/:id/orders/:order_id/request-courier/:courier_id",
            post(request_courier),
        )
}

#[derive(Deserialize)]
pub struct NewMenuItem {
    pub name: String,
    pub price: Decimal,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

#[derive(Deserialize)]
pub struct RegisterRestaurantRequest {
    pub name: String,
    pub location: GeoPoint,
    pub menu: Vec<NewMenuItem>,
}

#[derive(Serialize)]
pub struct RestaurantRegistered {
    pub restaurant: Restaurant,
    pub token: String,
}

async fn register_restaurant(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<RegisterRestaurantRequest>,
) -> Result<(StatusCode, Json<RestaurantRegistered>), AppError> {
    let name = require_text("name", payload.name)?;
    validate_location(&payload.location)?;
    if payload.menu.is_empty() {
        return Err(AppError::Validation("menu must not be empty".to_string()));
    }

    let menu = payload
        .menu
        .into_iter()
        .map(|item| {
            let name = require_text("menu item name", item.name)?;
            if item.price <= Decimal::ZERO {
                return Err(AppError::Validation(format!(
                    "price of {name} must be greater than 0"
                )));
            }
            Ok(MenuItem {
                id: Uuid::new_v4(),
                name,
                price: item.price,
                available: item.available,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let restaurant = state.directory.add_restaurant(Restaurant {
        id: Uuid::new_v4(),
        name,
        location: payload.location,
        menu,
    });
    let token = state.directory.issue_token(Actor::restaurant(restaurant.id));

    info!(restaurant_id = %restaurant.id, menu_items = restaurant.menu.len(), "restaurant registered");
    Ok((
        StatusCode::CREATED,
        Json(RestaurantRegistered { restaurant, token }),
    ))
}

async fn get_restaurant(
    State(state): State<Arc<AppState>>,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Restaurant>, AppError> {
    state.directory.restaurant(id).map(Json)
}

async fn list_restaurant_orders(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Vec<Order>>, AppError> {
    state
        .engine
        .list_orders_for_restaurant(&actor, id)
        .map(Json)
}

async fn list_available_couriers(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Vec<AvailableCourier>>, AppError> {
    state.engine.available_couriers(&actor, id).map(Json)
}

async fn request_courier(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams((id, order_id, courier_id)): PathParams<(Uuid, Uuid, Uuid)>,
) -> Result<(StatusCode, Json<Assignment>), AppError> {
    let assignment = state
        .engine
        .request_courier(&actor, id, order_id, courier_id)
        .await?;

    Ok((StatusCode::CREATED, Json(assignment)))
}
