//! Order lifecycle engine.
//!
//! All mutations of an order and of its courier assignments run while holding
//! that order's lock. Accepting an offer additionally takes the courier's lock
//! first, so the capacity count and the write that raises it cannot interleave
//! with another accept by the same courier. Locks are always taken courier
//! before order.

pub mod expiry;
pub mod lifecycle;
pub mod locks;
pub mod reviews;
pub mod sweep;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::engine::expiry::ExpiryPolicy;
use crate::engine::locks::KeyedLocks;
use crate::error::AppError;
use crate::models::account::{Actor, Role};
use crate::models::assignment::Assignment;
use crate::models::event::LifecycleEvent;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::store::assignments::AssignmentStore;
use crate::store::directory::Directory;
use crate::store::idempotency::IdempotencyStore;
use crate::store::orders::OrderStore;
use crate::store::reviews::ReviewStore;

pub type SharedClock = Arc<dyn Clock + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub offer_window: TimeDelta,
    pub courier_capacity: usize,
}

pub struct LifecycleEngine {
    directory: Arc<Directory>,
    orders: OrderStore,
    assignments: AssignmentStore,
    reviews: ReviewStore,
    idempotency: IdempotencyStore,
    policy: ExpiryPolicy,
    courier_capacity: usize,
    order_locks: KeyedLocks,
    courier_locks: KeyedLocks,
    clock: SharedClock,
    events_tx: broadcast::Sender<LifecycleEvent>,
    metrics: Metrics,
}

impl LifecycleEngine {
    pub fn new(
        directory: Arc<Directory>,
        settings: EngineSettings,
        clock: SharedClock,
        events_tx: broadcast::Sender<LifecycleEvent>,
        metrics: Metrics,
    ) -> Self {
        Self {
            directory,
            orders: OrderStore::new(),
            assignments: AssignmentStore::new(),
            reviews: ReviewStore::new(),
            idempotency: IdempotencyStore::new(),
            policy: ExpiryPolicy::new(settings.offer_window),
            courier_capacity: settings.courier_capacity,
            order_locks: KeyedLocks::new(),
            courier_locks: KeyedLocks::new(),
            clock,
            events_tx,
            metrics,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }

    fn publish_order(&self, order: &Order) {
        self.metrics.record_transition("order", order.status.as_str());
        // nobody listening is fine
        let _ = self.events_tx.send(LifecycleEvent::from(order));
    }

    fn publish_assignment(&self, assignment: &Assignment) {
        self.metrics
            .record_transition("assignment", assignment.status.as_str());
        let _ = self.events_tx.send(LifecycleEvent::from(assignment));
    }

    fn refresh_utilization(&self, courier_id: Uuid) {
        let active = self.assignments.count_active_for_courier(courier_id);
        let utilization = active as f64 / self.courier_capacity as f64;
        self.metrics
            .courier_utilization
            .with_label_values(&[&courier_id.to_string()])
            .set(utilization);
    }

    /// Records latency and, on failure, the error kind for `operation`.
    fn finish<T>(
        &self,
        operation: &'static str,
        started: Instant,
        result: Result<T, AppError>,
    ) -> Result<T, AppError> {
        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(_) => self.metrics.record_outcome(operation, elapsed, None),
            Err(err) => {
                self.metrics
                    .record_outcome(operation, elapsed, Some(err.kind()));
                warn!(operation, kind = err.kind(), error = %err, "lifecycle operation rejected");
            }
        }
        result
    }

    /// Whether `actor` is a party to `order`: its customer, its restaurant, or
    /// a courier that has been offered it.
    fn can_view_order(&self, actor: &Actor, order: &Order) -> bool {
        match actor.role {
            Role::Customer => order.customer_id == actor.id,
            Role::Restaurant => order.restaurant_id == actor.id,
            Role::Courier => {
                order.courier_id == Some(actor.id)
                    || self
                        .assignments
                        .list_for_order(order.id)
                        .iter()
                        .any(|assignment| assignment.courier_id == actor.id)
            }
        }
    }

    fn order_for(&self, actor: &Actor, order_id: Uuid) -> Result<Order, AppError> {
        let order = self.orders.get(order_id)?;
        if self.can_view_order(actor, &order) {
            Ok(order)
        } else {
            Err(AppError::Forbidden(format!(
                "order {order_id} is not visible to this account"
            )))
        }
    }
}
