pub mod assignments;
pub mod auth;
pub mod couriers;
pub mod customers;
pub mod extract;
pub mod orders;
pub mod restaurants;
pub mod reviews;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::rest::auth::Authenticated;
use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(customers::router())
        .merge(restaurants::router())
        .merge(couriers::router())
        .merge(orders::router())
        .merge(assignments::router())
        .merge(reviews::router())
        .route("/accounts/me", delete(close_account))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Trims `value` and rejects it when nothing is left.
pub(crate) fn require_text(field: &str, value: String) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn validate_location(location: &GeoPoint) -> Result<(), AppError> {
    let in_range = (-90.0..=90.0).contains(&location.lat) && (-180.0..=180.0).contains(&location.lng);
    if in_range {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "location ({}, {}) is out of range",
            location.lat, location.lng
        )))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    couriers: usize,
    orders: usize,
    assignments: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        couriers: state.directory.courier_count(),
        orders: state.engine.order_count(),
        assignments: state.engine.assignment_count(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

async fn close_account(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
) -> Result<StatusCode, AppError> {
    state.engine.close_account(&actor).await?;
    Ok(StatusCode::NO_CONTENT)
}
