use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::engine::LifecycleEngine;
use crate::error::AppError;
use crate::models::account::{Actor, Role};
use crate::models::order::{Order, OrderStatus};
use crate::models::review::{MAX_RATING, MIN_RATING, Review, ReviewRole};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    pub order_id: Uuid,
    pub role: ReviewRole,
    pub rating: u8,
    pub comment: Option<String>,
}

impl LifecycleEngine {
    pub fn can_customer_review(
        &self,
        actor: &Actor,
        order_id: Uuid,
        role: ReviewRole,
    ) -> Result<bool, AppError> {
        if actor.role != Role::Customer {
            return Ok(false);
        }
        let order = self.orders.get(order_id)?;
        Ok(self.review_blocker(actor.id, &order, role).is_none())
    }

    pub fn create_review(&self, actor: &Actor, new: NewReview) -> Result<Review, AppError> {
        let started = Instant::now();
        let result = self.create_review_checked(actor, new);
        self.finish("create_review", started, result)
    }

    fn create_review_checked(&self, actor: &Actor, new: NewReview) -> Result<Review, AppError> {
        let customer_id = actor.require(Role::Customer)?;
        if !(MIN_RATING..=MAX_RATING).contains(&new.rating) {
            return Err(AppError::Validation(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}"
            )));
        }

        let order = self.orders.get(new.order_id)?;
        if let Some(err) = self.review_blocker(customer_id, &order, new.role) {
            return Err(err);
        }
        let subject_id = review_subject(&order, new.role).ok_or_else(|| {
            AppError::Validation(format!("order {} has no courier to review", order.id))
        })?;

        let review = self.reviews.create(Review {
            id: Uuid::new_v4(),
            order_id: order.id,
            customer_id,
            role: new.role,
            subject_id,
            rating: new.rating,
            comment: non_blank(new.comment),
            response: None,
            responded_at: None,
            created_at: self.now(),
        })?;

        info!(review_id = %review.id, order_id = %order.id, role = ?review.role, rating = review.rating, "review submitted");
        Ok(review)
    }

    /// The first reason the customer cannot review `order` for `role`, if any.
    fn review_blocker(&self, customer_id: Uuid, order: &Order, role: ReviewRole) -> Option<AppError> {
        if order.customer_id != customer_id {
            return Some(AppError::Forbidden(format!(
                "order {} belongs to another customer",
                order.id
            )));
        }
        if order.status != OrderStatus::Delivered {
            return Some(AppError::Validation(format!(
                "order {} is {}; only delivered orders can be reviewed",
                order.id, order.status
            )));
        }
        if review_subject(order, role).is_none() {
            return Some(AppError::Validation(format!(
                "order {} has no courier to review",
                order.id
            )));
        }
        if self.reviews.find(order.id, role).is_some() {
            return Some(AppError::Conflict(format!(
                "order {} already has a {role:?} review",
                order.id
            )));
        }
        None
    }

    pub fn can_respond(&self, actor: &Actor, review_id: Uuid) -> Result<bool, AppError> {
        let review = self.reviews.get(review_id)?;
        Ok(is_reviewed_party(actor, &review) && review.response.is_none())
    }

    pub fn respond_to_review(
        &self,
        actor: &Actor,
        review_id: Uuid,
        response: String,
    ) -> Result<Review, AppError> {
        let started = Instant::now();
        let result = self.respond_checked(actor, review_id, response);
        self.finish("respond_to_review", started, result)
    }

    fn respond_checked(
        &self,
        actor: &Actor,
        review_id: Uuid,
        response: String,
    ) -> Result<Review, AppError> {
        let response = non_blank(Some(response))
            .ok_or_else(|| AppError::Validation("response must not be empty".to_string()))?;

        let review = self.reviews.get(review_id)?;
        if !is_reviewed_party(actor, &review) {
            return Err(AppError::Forbidden(format!(
                "only the reviewed party can respond to review {review_id}"
            )));
        }

        let responded = self.reviews.respond(review_id, response, self.now())?;
        info!(review_id = %review_id, by = ?actor.role, "review response added");
        Ok(responded)
    }

    pub fn reviews_for_order(&self, actor: &Actor, order_id: Uuid) -> Result<Vec<Review>, AppError> {
        self.order_for(actor, order_id)?;
        Ok(self.reviews.list_for_order(order_id))
    }
}

fn review_subject(order: &Order, role: ReviewRole) -> Option<Uuid> {
    match role {
        ReviewRole::Restaurant => Some(order.restaurant_id),
        ReviewRole::Courier => order.courier_id,
    }
}

fn is_reviewed_party(actor: &Actor, review: &Review) -> bool {
    let role_matches = matches!(
        (actor.role, review.role),
        (Role::Restaurant, ReviewRole::Restaurant) | (Role::Courier, ReviewRole::Courier)
    );
    role_matches && actor.id == review.subject_id
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
