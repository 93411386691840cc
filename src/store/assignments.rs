//! Courier assignment records plus a per-order index.
//!
//! `create` holds the order's index entry while it checks for a live offer and
//! inserts the new one, so two racing requests for the same order cannot both
//! succeed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::{Assignment, AssignmentStatus};

pub struct NewAssignment {
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub restaurant_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct AssignmentStore {
    assignments: DashMap<Uuid, Assignment>,
    by_order: DashMap<Uuid, Vec<Uuid>>,
}

impl AssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn create(&self, new: NewAssignment) -> Result<Assignment, AppError> {
        let mut order_entry = self.by_order.entry(new.order_id).or_default();

        let live = order_entry.iter().find(|id| {
            self.assignments
                .get(*id)
                .is_some_and(|assignment| assignment.status.is_active())
        });
        if let Some(live_id) = live {
            return Err(AppError::Conflict(format!(
                "order {} already has active assignment {live_id}",
                new.order_id
            )));
        }

        let assignment = Assignment {
            id: Uuid::new_v4(),
            order_id: new.order_id,
            courier_id: new.courier_id,
            restaurant_id: new.restaurant_id,
            status: AssignmentStatus::Requested,
            version: 1,
            assigned_at: new.assigned_at,
            expires_at: new.expires_at,
            responded_at: None,
            picked_up_at: None,
            delivered_at: None,
            ended_at: None,
        };

        self.assignments.insert(assignment.id, assignment.clone());
        order_entry.push(assignment.id);

        Ok(assignment)
    }

    pub fn get(&self, id: Uuid) -> Result<Assignment, AppError> {
        self.assignments
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("courier assignment {id} not found")))
    }

    /// Validates a status change without applying it.
    pub fn check_status(
        assignment: &Assignment,
        expected_version: Option<u64>,
        next: AssignmentStatus,
    ) -> Result<(), AppError> {
        if let Some(expected) = expected_version {
            if expected != assignment.version {
                return Err(AppError::Conflict(format!(
                    "courier assignment {} is at version {}, not {expected}",
                    assignment.id, assignment.version
                )));
            }
        }

        if !assignment.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "courier assignment {} cannot move from {} to {}",
                assignment.id, assignment.status, next
            )));
        }

        Ok(())
    }

    pub fn set_status(
        &self,
        id: Uuid,
        expected_version: Option<u64>,
        next: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Assignment, AppError> {
        let mut entry = self
            .assignments
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier assignment {id} not found")))?;

        Self::check_status(&entry, expected_version, next)?;

        let previous = entry.status;
        entry.status = next;
        entry.version = entry.version.saturating_add(1);

        if previous == AssignmentStatus::Requested {
            entry.responded_at = Some(now);
        }
        match next {
            AssignmentStatus::PickedUp => entry.picked_up_at = Some(now),
            AssignmentStatus::Delivered => {
                entry.delivered_at = Some(now);
                entry.ended_at = Some(now);
            }
            AssignmentStatus::Rejected | AssignmentStatus::Cancelled | AssignmentStatus::Expired => {
                entry.ended_at = Some(now);
            }
            AssignmentStatus::Requested | AssignmentStatus::Accepted => {}
        }

        Ok(entry.clone())
    }

    pub fn list_active_for_courier(&self, courier_id: Uuid) -> Vec<Assignment> {
        self.list_where(|a| a.courier_id == courier_id && a.status.is_active_delivery())
    }

    pub fn count_active_for_courier(&self, courier_id: Uuid) -> usize {
        self.assignments
            .iter()
            .filter(|entry| {
                entry.courier_id == courier_id && entry.status.is_active_delivery()
            })
            .count()
    }

    pub fn list_pending_for_courier(&self, courier_id: Uuid) -> Vec<Assignment> {
        self.list_where(|a| a.courier_id == courier_id && a.status == AssignmentStatus::Requested)
    }

    /// Every outstanding offer, oldest first.
    pub fn list_requested(&self) -> Vec<Assignment> {
        self.list_where(|a| a.status == AssignmentStatus::Requested)
    }

    /// Oldest first.
    pub fn list_for_order(&self, order_id: Uuid) -> Vec<Assignment> {
        let ids = self
            .by_order
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        ids.iter()
            .filter_map(|id| self.assignments.get(id).map(|entry| entry.value().clone()))
            .collect()
    }

    pub fn active_for_order(&self, order_id: Uuid) -> Option<Assignment> {
        self.list_for_order(order_id)
            .into_iter()
            .find(|assignment| assignment.status.is_active())
    }

    pub fn latest_for_order(&self, order_id: Uuid) -> Option<Assignment> {
        self.list_for_order(order_id).into_iter().last()
    }

    fn list_where<P>(&self, predicate: P) -> Vec<Assignment>
    where
        P: Fn(&Assignment) -> bool,
    {
        let mut assignments: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        assignments.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at));
        assignments
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use uuid::Uuid;

    use super::{AssignmentStore, NewAssignment};
    use crate::error::AppError;
    use crate::models::assignment::AssignmentStatus;

    fn offer(order_id: Uuid, courier_id: Uuid) -> NewAssignment {
        let now = Utc::now();
        NewAssignment {
            order_id,
            courier_id,
            restaurant_id: Uuid::from_u128(99),
            assigned_at: now,
            expires_at: now + TimeDelta::minutes(3),
        }
    }

    #[test]
    fn second_live_offer_for_same_order_conflicts() {
        let store = AssignmentStore::new();
        let order_id = Uuid::new_v4();

        store.create(offer(order_id, Uuid::new_v4())).unwrap();
        let err = store.create(offer(order_id, Uuid::new_v4())).unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.list_for_order(order_id).len(), 1);
    }

    #[test]
    fn ended_offer_frees_the_order_for_a_new_one() {
        let store = AssignmentStore::new();
        let order_id = Uuid::new_v4();

        let first = store.create(offer(order_id, Uuid::new_v4())).unwrap();
        store
            .set_status(first.id, None, AssignmentStatus::Rejected, Utc::now())
            .unwrap();
        let second = store.create(offer(order_id, Uuid::new_v4())).unwrap();

        assert_eq!(store.active_for_order(order_id).unwrap().id, second.id);
        assert_eq!(store.latest_for_order(order_id).unwrap().id, second.id);
    }

    #[test]
    fn pickup_before_accept_is_rejected() {
        let store = AssignmentStore::new();
        let created = store.create(offer(Uuid::new_v4(), Uuid::new_v4())).unwrap();

        let err = store
            .set_status(created.id, None, AssignmentStatus::PickedUp, Utc::now())
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(store.get(created.id).unwrap().status, AssignmentStatus::Requested);
    }

    #[test]
    fn timestamps_follow_the_transitions() {
        let store = AssignmentStore::new();
        let created = store.create(offer(Uuid::new_v4(), Uuid::new_v4())).unwrap();
        let now = Utc::now();

        let accepted = store
            .set_status(created.id, Some(1), AssignmentStatus::Accepted, now)
            .unwrap();
        assert_eq!(accepted.responded_at, Some(now));
        assert_eq!(accepted.version, 2);

        let picked = store
            .set_status(created.id, Some(2), AssignmentStatus::PickedUp, now)
            .unwrap();
        assert_eq!(picked.picked_up_at, Some(now));

        let delivered = store
            .set_status(created.id, Some(3), AssignmentStatus::Delivered, now)
            .unwrap();
        assert_eq!(delivered.delivered_at, Some(now));
        assert_eq!(delivered.ended_at, Some(now));
    }

    #[test]
    fn courier_views_split_pending_from_active() {
        let store = AssignmentStore::new();
        let courier = Uuid::new_v4();

        let accepted = store.create(offer(Uuid::new_v4(), courier)).unwrap();
        store
            .set_status(accepted.id, None, AssignmentStatus::Accepted, Utc::now())
            .unwrap();
        let pending = store.create(offer(Uuid::new_v4(), courier)).unwrap();

        let active: Vec<Uuid> = store.list_active_for_courier(courier).iter().map(|a| a.id).collect();
        let offers: Vec<Uuid> = store.list_pending_for_courier(courier).iter().map(|a| a.id).collect();

        assert_eq!(active, vec![accepted.id]);
        assert_eq!(offers, vec![pending.id]);
        assert_eq!(store.count_active_for_courier(courier), 1);
    }
}
