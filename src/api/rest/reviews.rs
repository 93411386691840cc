use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::auth::Authenticated;
use crate::api::rest::extract::{JsonBody, PathParams, QueryParams};
use crate::engine::reviews::NewReview;
use crate::error::AppError;
use crate::models::review::{Review, ReviewRole};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reviews", post(create_review))
        .route("/reviews/can-review", get(can_review))
        .route("/reviews/can-respond", get(can_respond))
        .route("/reviews/:id/response", post(respond))
}

#[derive(Deserialize)]
pub struct CanReviewQuery {
    pub order_id: Uuid,
    pub role: ReviewRole,
}

#[derive(Deserialize)]
pub struct CanRespondQuery {
    pub review_id: Uuid,
}

#[derive(Deserialize)]
pub struct ResponseRequest {
    pub response: String,
}

#[derive(Serialize)]
pub struct Eligibility {
    pub allowed: bool,
}

async fn create_review(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    JsonBody(payload): JsonBody<NewReview>,
) -> Result<(StatusCode, Json<Review>), AppError> {
    let review = state.engine.create_review(&actor, payload)?;
    Ok((StatusCode::CREATED, Json(review)))
}

async fn can_review(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    QueryParams(query): QueryParams<CanReviewQuery>,
) -> Result<Json<Eligibility>, AppError> {
    let allowed = state
        .engine
        .can_customer_review(&actor, query.order_id, query.role)?;
    Ok(Json(Eligibility { allowed }))
}

async fn can_respond(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    QueryParams(query): QueryParams<CanRespondQuery>,
) -> Result<Json<Eligibility>, AppError> {
    let allowed = state.engine.can_respond(&actor, query.review_id)?;
    Ok(Json(Eligibility { allowed }))
}

async fn respond(
    State(state): State<Arc<AppState>>,
    Authenticated(actor): Authenticated,
    PathParams(id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<ResponseRequest>,
) -> Result<Json<Review>, AppError> {
    state
        .engine
        .respond_to_review(&actor, id, payload.response)
        .map(Json)
}
