use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::rest::auth::Authenticated;
use crate::api::rest::extract::{JsonBody, PathParams};
use crate::api::rest::require_text;
use crate::error::AppError;
use crate::models::account::Actor;
use crate::models::customer::{Address, Customer};
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/customers", post(register_customer))
        .route("/customers/:id/orders", get(list_customer_orders))
}

#[derive(Deserialize)]
pub struct NewAddress {
    pub street: String,
    pub city: String,
    pub postal_code: String,
}

#[derive(Deserialize)]
pub struct RegisterCustomerRequest {
    pub name: String,
    pub addresses: Vec<NewAddress>,
}

#[derive(Serialize)]
pub struct CustomerRegistered {
    pub customer: Customer,
    pub token: String,
}

async fn register_customer(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<RegisterCustomerRequest>,
) -> Result<(StatusCode, Json<CustomerRegistered>), AppError> {
    let name = require_text("name", payload.name)?;
    if payload.addresses.is_empty() {
        return Err(AppError::Validation(
            "at least one delivery address is required".to_string(),
        ));
    }

    let addresses = payload
        .addresses
        .into_iter()
        .map(|address| {
            Ok(Address {
                id: Uuid::new_v4(),
                street: require_text("street", address.street)?,
                city: require_text("city", address.city)?,
                postal_code: require_text("postal_code", address.postal_code)?,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let customer = state.directory.add_customer(Customer {
        id: Uuid::new_v4(),
        name,
        addresses,
    });
    let token = state.directory.issue_token(Actor::customer(customer.id));

    info!(customer_id = %customer.id, "customer registered");
    Ok((StatusCode::CREATED, Json(CustomerRegistered { customer, token })))
}

async fn list_customer_orders(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
) -> Result<Json<Vec<Order>>, AppError> {
    state
        .engine
        .list_orders_for_customer(&actor, id)
        .map(Json)
}
