//! Offer expiry.
//!
//! An offer left in REQUESTED past `assigned_at + offer_window` becomes
//! EXPIRED. The check runs from read paths, from courier responses and from
//! the background sweep; each run re-reads the offer under the order lock, so
//! redundant runs expire it once and then report it as already expired.

use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::LifecycleEngine;
use crate::error::AppError;
use crate::models::assignment::{Assignment, AssignmentStatus};

#[derive(Debug, Clone, Copy)]
pub struct ExpiryPolicy {
    offer_window: TimeDelta,
}

impl ExpiryPolicy {
    pub fn new(offer_window: TimeDelta) -> Self {
        Self { offer_window }
    }

    pub fn deadline(&self, assigned_at: DateTime<Utc>) -> DateTime<Utc> {
        assigned_at + self.offer_window
    }

    pub fn is_due(&self, assignment: &Assignment, now: DateTime<Utc>) -> bool {
        assignment.status == AssignmentStatus::Requested && now > assignment.expires_at
    }
}

impl LifecycleEngine {
    /// Expires the offer if its deadline has passed. Returns whether the
    /// assignment is EXPIRED afterwards.
    pub async fn check_expired(&self, assignment_id: Uuid) -> Result<bool, AppError> {
        let started = Instant::now();
        let result = self.check_expired_locked(assignment_id).await;
        self.finish("check_expired", started, result)
    }

    async fn check_expired_locked(&self, assignment_id: Uuid) -> Result<bool, AppError> {
        let order_id = self.assignments.get(assignment_id)?.order_id;
        let _order_guard = self.order_locks.lock(order_id).await;

        let assignment = self.assignments.get(assignment_id)?;
        let expired_now = self.expire_if_due(&assignment, self.now(), "read")?;

        Ok(expired_now || assignment.status == AssignmentStatus::Expired)
    }

    /// Expires the order's outstanding offer if it is due. Returns whether the
    /// order's most recent assignment is EXPIRED afterwards.
    pub async fn check_expired_for_order(&self, order_id: Uuid) -> Result<bool, AppError> {
        let started = Instant::now();
        let result = self.check_expired_for_order_locked(order_id).await;
        self.finish("check_expired_for_order", started, result)
    }

    async fn check_expired_for_order_locked(&self, order_id: Uuid) -> Result<bool, AppError> {
        self.orders.get(order_id)?;
        let _order_guard = self.order_locks.lock(order_id).await;

        if let Some(live) = self.assignments.active_for_order(order_id) {
            self.expire_if_due(&live, self.now(), "read")?;
        }

        Ok(self
            .assignments
            .latest_for_order(order_id)
            .is_some_and(|last| last.status == AssignmentStatus::Expired))
    }

    /// Expires every offer past its deadline. Returns how many were expired.
    pub async fn expire_due_offers(&self) -> usize {
        let now = self.now();
        let mut expired = 0;

        for offer in self.assignments.list_requested() {
            if !self.policy.is_due(&offer, now) {
                continue;
            }

            let _order_guard = self.order_locks.lock(offer.order_id).await;
            let current = match self.assignments.get(offer.id) {
                Ok(current) => current,
                Err(err) => {
                    warn!(assignment_id = %offer.id, error = %err, "offer vanished during sweep");
                    continue;
                }
            };

            match self.expire_if_due(&current, now, "sweep") {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(assignment_id = %offer.id, error = %err, "failed to expire offer");
                }
            }
        }

        expired
    }

    /// Caller must hold the order lock for `assignment.order_id`.
    pub(super) fn expire_if_due(
        &self,
        assignment: &Assignment,
        now: DateTime<Utc>,
        trigger: &str,
    ) -> Result<bool, AppError> {
        if !self.policy.is_due(assignment, now) {
            return Ok(false);
        }

        let expired = self.assignments.set_status(
            assignment.id,
            Some(assignment.version),
            AssignmentStatus::Expired,
            now,
        )?;

        self.metrics
            .assignments_expired_total
            .with_label_values(&[trigger])
            .inc();
        info!(
            assignment_id = %expired.id,
            order_id = %expired.order_id,
            courier_id = %expired.courier_id,
            trigger,
            "offer expired; order needs a new courier"
        );
        self.publish_assignment(&expired);

        Ok(true)
    }
}
