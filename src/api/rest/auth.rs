//! Bearer-token authentication for REST handlers.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::models::account::Actor;
use crate::state::AppState;

/// The caller resolved from `Authorization: Bearer <token>`.
pub struct Authenticated(pub Actor);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
        let value = header
            .to_str()
            .map_err(|_| AppError::Unauthorized("malformed authorization header".to_string()))?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Unauthorized("expected a bearer token".to_string()))?;

        state
            .directory
            .authenticate(token)
            .map(Authenticated)
            .ok_or_else(|| AppError::Unauthorized("unknown or revoked token".to_string()))
    }
}
