//! Order records keyed by id.
//!
//! Every write goes through a DashMap entry guard, so the version check, the
//! transition check and the mutation happen atomically for a single order.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};

#[derive(Default)]
pub struct OrderStore {
    orders: DashMap<Uuid, Order>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn create(&self, order: Order) -> Result<Order, AppError> {
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "order {} already exists",
                order.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(order)
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Result<Order, AppError> {
        self.orders
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
    }

    /// Validates a status change without applying it.
    pub fn check_status(
        order: &Order,
        expected_version: Option<u64>,
        next: OrderStatus,
    ) -> Result<(), AppError> {
        check_version(order, expected_version)?;

        if !order.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "order {} cannot move from {} to {}",
                order.id, order.status, next
            )));
        }

        Ok(())
    }

    pub fn set_status(
        &self,
        id: Uuid,
        expected_version: Option<u64>,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        self.update_with(id, expected_version, now, |order| {
            Self::check_status(order, None, next)?;
            order.status = next;
            if next == OrderStatus::Delivered {
                order.delivered_at = Some(now);
            }
            Ok(())
        })
    }

    pub fn set_courier(
        &self,
        id: Uuid,
        courier_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        self.update_with(id, None, now, |order| {
            if order.status.is_terminal() {
                return Err(AppError::InvalidTransition(format!(
                    "order {} is already {}",
                    order.id, order.status
                )));
            }
            order.courier_id = courier_id;
            Ok(())
        })
    }

    /// Applies `updater` under the entry guard. Nothing is written when the
    /// updater fails.
    fn update_with<F>(
        &self,
        id: Uuid,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
        updater: F,
    ) -> Result<Order, AppError>
    where
        F: FnOnce(&mut Order) -> Result<(), AppError>,
    {
        let mut entry = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

        check_version(&entry, expected_version)?;

        let mut draft = entry.clone();
        updater(&mut draft)?;
        draft.version = entry.version.saturating_add(1);
        draft.updated_at = now;

        *entry = draft.clone();
        Ok(draft)
    }

    pub fn list_by_customer(&self, customer_id: Uuid) -> Vec<Order> {
        self.list_where(|order| order.customer_id == customer_id)
    }

    pub fn list_by_restaurant(&self, restaurant_id: Uuid) -> Vec<Order> {
        self.list_where(|order| order.restaurant_id == restaurant_id)
    }

    pub fn list_by_courier(&self, courier_id: Uuid) -> Vec<Order> {
        self.list_where(|order| order.courier_id == Some(courier_id))
    }

    fn list_where<P>(&self, predicate: P) -> Vec<Order>
    where
        P: Fn(&Order) -> bool,
    {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }
}

fn check_version(order: &Order, expected_version: Option<u64>) -> Result<(), AppError> {
    match expected_version {
        Some(expected) if expected != order.version => Err(AppError::Conflict(format!(
            "order {} is at version {}, not {expected}",
            order.id, order.version
        ))),
        _ => Ok(()),
    }
}
