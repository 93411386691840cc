use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::review::{Review, ReviewRole};

#[derive(Default)]
pub struct ReviewStore {
    reviews: DashMap<Uuid, Review>,
    by_order_role: DashMap<(Uuid, ReviewRole), Uuid>,
}

impl ReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// One review per order and role.
    pub fn create(&self, review: Review) -> Result<Review, AppError> {
        match self.by_order_role.entry((review.order_id, review.role)) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "order {} already has a {:?} review",
                review.order_id, review.role
            ))),
            Entry::Vacant(slot) => {
                self.reviews.insert(review.id, review.clone());
                slot.insert(review.id);
                Ok(review)
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Result<Review, AppError> {
        self.reviews
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("review {id} not found")))
    }

    pub fn find(&self, order_id: Uuid, role: ReviewRole) -> Option<Review> {
        let id = *self.by_order_role.get(&(order_id, role))?;
        self.reviews.get(&id).map(|entry| entry.value().clone())
    }

    pub fn list_for_order(&self, order_id: Uuid) -> Vec<Review> {
        [ReviewRole::Restaurant, ReviewRole::Courier]
            .into_iter()
            .filter_map(|role| self.find(order_id, role))
            .collect()
    }

    /// The reviewed party gets a single response.
    pub fn respond(
        &self,
        id: Uuid,
        response: String,
        now: DateTime<Utc>,
    ) -> Result<Review, AppError> {
        let mut entry = self
            .reviews
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("review {id} not found")))?;

        if entry.response.is_some() {
            return Err(AppError::Conflict(format!(
                "review {id} already has a response"
            )));
        }

        entry.response = Some(response);
        entry.responded_at = Some(now);
        Ok(entry.clone())
    }
}
