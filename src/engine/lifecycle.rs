use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::engine::LifecycleEngine;
use crate::error::AppError;
use crate::models::account::{Actor, Role};
use crate::models::assignment::{Assignment, AssignmentAction, AssignmentStatus};
use crate::models::courier::{AvailableCourier, CourierStatus};
use crate::models::order::{LineItem, Order, OrderStatus};
use crate::store::assignments::{AssignmentStore, NewAssignment};
use crate::store::idempotency::{IdempotencyKey, IdempotentOutcome, PayloadHash};
use crate::store::orders::OrderStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub menu_item_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub restaurant_id: Uuid,
    pub address_id: Uuid,
    pub items: Vec<OrderLine>,
}

impl LifecycleEngine {
    /// Creates a PENDING order priced from the restaurant's menu. With an
    /// idempotency key, a retried request returns the order created by the
    /// first attempt.
    pub fn place_order(
        &self,
        actor: &Actor,
        request: PlaceOrder,
        key: Option<IdempotencyKey>,
    ) -> Result<Order, AppError> {
        let started = Instant::now();
        let result = self.place_order_keyed(actor, &request, key);
        self.finish("place_order", started, result)
    }

    fn place_order_keyed(
        &self,
        actor: &Actor,
        request: &PlaceOrder,
        key: Option<IdempotencyKey>,
    ) -> Result<Order, AppError> {
        let customer_id = actor.require(Role::Customer)?;

        let Some(key) = key else {
            return self.create_order(customer_id, request);
        };

        let payload_hash = PayloadHash::of(request)?;
        let outcome = self.idempotency.run_once(customer_id, key, payload_hash, || {
            self.create_order(customer_id, request).map(|order| order.id)
        })?;

        match outcome {
            IdempotentOutcome::Created(order_id) => self.orders.get(order_id),
            IdempotentOutcome::Replay(order_id) => {
                info!(order_id = %order_id, idempotency_key = %key, "replayed order placement");
                self.orders.get(order_id)
            }
        }
    }

    fn create_order(&self, customer_id: Uuid, request: &PlaceOrder) -> Result<Order, AppError> {
        if request.items.is_empty() {
            return Err(AppError::Validation(
                "order must contain at least one item".to_string(),
            ));
        }

        let customer = self.directory.customer(customer_id)?;
        let address = customer
            .address(request.address_id)
            .cloned()
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "address {} is not one of the customer's addresses",
                    request.address_id
                ))
            })?;
        let restaurant = self.directory.restaurant(request.restaurant_id)?;

        let items = request
            .items
            .iter()
            .map(|line| {
                if line.quantity == 0 {
                    return Err(AppError::Validation(format!(
                        "quantity for menu item {} must be at least 1",
                        line.menu_item_id
                    )));
                }

                let menu_item = restaurant.menu_item(line.menu_item_id).ok_or_else(|| {
                    AppError::Validation(format!(
                        "menu item {} is not on the menu of restaurant {}",
                        line.menu_item_id, restaurant.id
                    ))
                })?;
                if !menu_item.available {
                    return Err(AppError::Validation(format!(
                        "menu item {} is currently unavailable",
                        menu_item.id
                    )));
                }

                let subtotal = LineItem::subtotal_of(menu_item.price, line.quantity)
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "{} x menu item {} exceeds the largest order amount",
                            line.quantity, menu_item.id
                        ))
                    })?;

                Ok(LineItem {
                    menu_item_id: menu_item.id,
                    name: menu_item.name.clone(),
                    unit_price: menu_item.price,
                    quantity: line.quantity,
                    subtotal,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let total_price = Order::items_total(&items).ok_or_else(|| {
            AppError::Validation("order total exceeds the largest order amount".to_string())
        })?;

        let now = self.now();
        let order = self.orders.create(Order {
            id: Uuid::new_v4(),
            customer_id,
            restaurant_id: restaurant.id,
            address,
            total_price,
            items,
            status: OrderStatus::Pending,
            courier_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        })?;

        info!(
            order_id = %order.id,
            restaurant_id = %order.restaurant_id,
            total = %order.total_price,
            "order placed"
        );
        self.publish_order(&order);

        Ok(order)
    }

    pub fn get_order(&self, actor: &Actor, order_id: Uuid) -> Result<Order, AppError> {
        self.order_for(actor, order_id)
    }

    /// Requested status changes from outside the engine. Only approval and
    /// cancellation can be asked for; pickup and delivery follow the courier.
    pub async fn change_order_status(
        &self,
        actor: &Actor,
        order_id: Uuid,
        target: OrderStatus,
        expected_version: u64,
    ) -> Result<Order, AppError> {
        let started = Instant::now();
        let result = match target {
            OrderStatus::Processing => self.approve_order(actor, order_id, expected_version).await,
            OrderStatus::Cancelled => self.cancel_order(actor, order_id, expected_version).await,
            OrderStatus::Pending | OrderStatus::OutForDelivery | OrderStatus::Delivered => {
                Err(AppError::InvalidTransition(format!(
                    "{target} cannot be requested directly; it follows the courier assignment"
                )))
            }
        };
        self.finish("change_order_status", started, result)
    }

    pub async fn approve_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
        expected_version: u64,
    ) -> Result<Order, AppError> {
        let restaurant_id = actor.require(Role::Restaurant)?;
        let _order_guard = self.order_locks.lock(order_id).await;

        let order = self.orders.get(order_id)?;
        ensure_restaurant(&order, restaurant_id)?;

        let approved =
            self.orders
                .set_status(order_id, Some(expected_version), OrderStatus::Processing, self.now())?;

        info!(order_id = %order_id, version = approved.version, "order approved");
        self.publish_order(&approved);
        Ok(approved)
    }

    /// Cancels the order and voids its live courier assignment, if any. Both
    /// changes are validated before either is written.
    pub async fn cancel_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
        expected_version: u64,
    ) -> Result<Order, AppError> {
        let _order_guard = self.order_locks.lock(order_id).await;

        let order = self.orders.get(order_id)?;
        match actor.role {
            Role::Customer if order.customer_id != actor.id => {
                return Err(AppError::Forbidden(format!(
                    "order {order_id} belongs to another customer"
                )));
            }
            Role::Customer => {}
            Role::Restaurant => ensure_restaurant(&order, actor.id)?,
            Role::Courier => {
                return Err(AppError::Forbidden(
                    "couriers cancel their assignment, not the order".to_string(),
                ));
            }
        }

        OrderStore::check_status(&order, Some(expected_version), OrderStatus::Cancelled)?;
        if actor.role == Role::Customer && order.status != OrderStatus::Pending {
            return Err(AppError::InvalidTransition(format!(
                "order {order_id} is {}; customers can only cancel PENDING orders",
                order.status
            )));
        }

        let live = self.assignments.active_for_order(order_id);
        if let Some(assignment) = &live {
            AssignmentStore::check_status(assignment, None, AssignmentStatus::Cancelled)?;
        }

        let now = self.now();
        let voided = match live {
            Some(assignment) => Some(self.assignments.set_status(
                assignment.id,
                Some(assignment.version),
                AssignmentStatus::Cancelled,
                now,
            )?),
            None => None,
        };
        let cancelled =
            self.orders
                .set_status(order_id, Some(expected_version), OrderStatus::Cancelled, now)?;

        info!(
            order_id = %order_id,
            by = ?actor.role,
            voided_assignment = ?voided.as_ref().map(|a| a.id),
            "order cancelled"
        );
        if let Some(assignment) = &voided {
            self.publish_assignment(assignment);
            self.refresh_utilization(assignment.courier_id);
        }
        self.publish_order(&cancelled);

        Ok(cancelled)
    }

    pub fn list_orders_for_customer(
        &self,
        actor: &Actor,
        customer_id: Uuid,
    ) -> Result<Vec<Order>, AppError> {
        actor.require_self(Role::Customer, customer_id)?;
        Ok(self.orders.list_by_customer(customer_id))
    }

    pub fn list_orders_for_restaurant(
        &self,
        actor: &Actor,
        restaurant_id: Uuid,
    ) -> Result<Vec<Order>, AppError> {
        actor.require_self(Role::Restaurant, restaurant_id)?;
        Ok(self.orders.list_by_restaurant(restaurant_id))
    }

    pub fn list_orders_for_courier(
        &self,
        actor: &Actor,
        courier_id: Uuid,
    ) -> Result<Vec<Order>, AppError> {
        actor.require_self(Role::Courier, courier_id)?;
        Ok(self.orders.list_by_courier(courier_id))
    }

    pub fn assignments_for_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<Vec<Assignment>, AppError> {
        self.order_for(actor, order_id)?;
        Ok(self.assignments.list_for_order(order_id))
    }

    pub fn get_assignment(&self, actor: &Actor, assignment_id: Uuid) -> Result<Assignment, AppError> {
        let assignment = self.assignments.get(assignment_id)?;
        self.order_for(actor, assignment.order_id)?;
        Ok(assignment)
    }

    /// Available couriers under their delivery cap, nearest to the restaurant
    /// first.
    pub fn available_couriers(
        &self,
        actor: &Actor,
        restaurant_id: Uuid,
    ) -> Result<Vec<AvailableCourier>, AppError> {
        actor.require_self(Role::Restaurant, restaurant_id)?;
        let restaurant = self.directory.restaurant(restaurant_id)?;

        let mut available: Vec<AvailableCourier> = self
            .directory
            .couriers()
            .into_iter()
            .filter(|courier| courier.status == CourierStatus::Available)
            .filter_map(|courier| {
                let active_deliveries = self.assignments.count_active_for_courier(courier.id);
                if active_deliveries >= self.courier_capacity {
                    return None;
                }
                let distance_km = restaurant.location.distance_km(&courier.location);
                Some(AvailableCourier {
                    courier,
                    active_deliveries,
                    distance_km,
                })
            })
            .collect();

        available.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(available)
    }

    /// Offers a PROCESSING order (or one whose courier dropped it after
    /// pickup) to a specific courier.
    pub async fn request_courier(
        &self,
        actor: &Actor,
        restaurant_id: Uuid,
        order_id: Uuid,
        courier_id: Uuid,
    ) -> Result<Assignment, AppError> {
        let started = Instant::now();
        let result = self
            .request_courier_locked(actor, restaurant_id, order_id, courier_id)
            .await;
        self.finish("request_courier", started, result)
    }

    async fn request_courier_locked(
        &self,
        actor: &Actor,
        restaurant_id: Uuid,
        order_id: Uuid,
        courier_id: Uuid,
    ) -> Result<Assignment, AppError> {
        actor.require_self(Role::Restaurant, restaurant_id)?;
        // courier before order, as in accept; close_account holds the same lock
        let _courier_guard = self.courier_locks.lock(courier_id).await;
        let _order_guard = self.order_locks.lock(order_id).await;

        let order = self.orders.get(order_id)?;
        ensure_restaurant(&order, restaurant_id)?;
        if !order.status.accepts_courier() {
            return Err(AppError::InvalidTransition(format!(
                "order {order_id} is {}; couriers can only be requested for PROCESSING orders",
                order.status
            )));
        }

        let courier = self.directory.courier(courier_id)?;
        if courier.status == CourierStatus::Offline {
            return Err(AppError::Validation(format!("courier {courier_id} is offline")));
        }

        let now = self.now();
        if let Some(live) = self.assignments.active_for_order(order_id) {
            self.expire_if_due(&live, now, "request")?;
        }

        let assignment = self.assignments.create(NewAssignment {
            order_id,
            courier_id,
            restaurant_id,
            assigned_at: now,
            expires_at: self.policy.deadline(now),
        })?;

        info!(
            assignment_id = %assignment.id,
            order_id = %order_id,
            courier_id = %courier_id,
            expires_at = %assignment.expires_at,
            "courier requested"
        );
        self.publish_assignment(&assignment);

        Ok(assignment)
    }

    pub async fn apply_assignment_action(
        &self,
        actor: &Actor,
        assignment_id: Uuid,
        action: AssignmentAction,
        expected_version: Option<u64>,
    ) -> Result<Assignment, AppError> {
        let started = Instant::now();
        let result = match action {
            AssignmentAction::Accept => self.accept(actor, assignment_id, expected_version).await,
            AssignmentAction::Reject => self.reject(actor, assignment_id, expected_version).await,
            AssignmentAction::Pickup => self.pickup(actor, assignment_id, expected_version).await,
            AssignmentAction::Deliver => self.deliver(actor, assignment_id, expected_version).await,
            AssignmentAction::Cancel => {
                self.cancel_assignment(actor, assignment_id, expected_version)
                    .await
            }
        };
        self.finish(action.as_str(), started, result)
    }

    async fn accept(
        &self,
        actor: &Actor,
        assignment_id: Uuid,
        expected_version: Option<u64>,
    ) -> Result<Assignment, AppError> {
        let courier_id = actor.require(Role::Courier)?;
        let order_id = self.own_assignment(courier_id, assignment_id)?.order_id;

        let _courier_guard = self.courier_locks.lock(courier_id).await;
        let _order_guard = self.order_locks.lock(order_id).await;

        let assignment = self.assignments.get(assignment_id)?;
        let now = self.now();
        if self.expire_if_due(&assignment, now, "accept")? {
            return Err(AppError::InvalidTransition(format!(
                "offer {assignment_id} expired at {}",
                assignment.expires_at
            )));
        }
        AssignmentStore::check_status(&assignment, expected_version, AssignmentStatus::Accepted)?;

        if self.assignments.count_active_for_courier(courier_id) >= self.courier_capacity {
            return Err(AppError::CapacityExceeded {
                courier_id,
                limit: self.courier_capacity,
            });
        }

        let accepted = self.assignments.set_status(
            assignment_id,
            expected_version,
            AssignmentStatus::Accepted,
            now,
        )?;
        self.orders.set_courier(order_id, Some(courier_id), now)?;

        info!(assignment_id = %assignment_id, order_id = %order_id, courier_id = %courier_id, "offer accepted");
        self.publish_assignment(&accepted);
        self.refresh_utilization(courier_id);

        Ok(accepted)
    }

    async fn reject(
        &self,
        actor: &Actor,
        assignment_id: Uuid,
        expected_version: Option<u64>,
    ) -> Result<Assignment, AppError> {
        let courier_id = actor.require(Role::Courier)?;
        let order_id = self.own_assignment(courier_id, assignment_id)?.order_id;
        let _order_guard = self.order_locks.lock(order_id).await;

        let assignment = self.assignments.get(assignment_id)?;
        let now = self.now();
        if self.expire_if_due(&assignment, now, "reject")? {
            return Err(AppError::InvalidTransition(format!(
                "offer {assignment_id} expired at {}",
                assignment.expires_at
            )));
        }

        let rejected = self.assignments.set_status(
            assignment_id,
            expected_version,
            AssignmentStatus::Rejected,
            now,
        )?;

        info!(assignment_id = %assignment_id, order_id = %order_id, courier_id = %courier_id, "offer rejected; order needs a new courier");
        self.publish_assignment(&rejected);

        Ok(rejected)
    }

    async fn pickup(
        &self,
        actor: &Actor,
        assignment_id: Uuid,
        expected_version: Option<u64>,
    ) -> Result<Assignment, AppError> {
        let courier_id = actor.require(Role::Courier)?;
        let order_id = self.own_assignment(courier_id, assignment_id)?.order_id;
        let _order_guard = self.order_locks.lock(order_id).await;

        let assignment = self.assignments.get(assignment_id)?;
        let order = self.orders.get(order_id)?;
        AssignmentStore::check_status(&assignment, expected_version, AssignmentStatus::PickedUp)?;

        // a replacement courier picks up an order that is already on its way
        let moves_order = match order.status {
            OrderStatus::Processing => {
                OrderStore::check_status(&order, None, OrderStatus::OutForDelivery)?;
                true
            }
            OrderStatus::OutForDelivery => false,
            other => {
                return Err(AppError::InvalidTransition(format!(
                    "order {order_id} is {other} and cannot be picked up"
                )));
            }
        };

        let now = self.now();
        let picked_up = self.assignments.set_status(
            assignment_id,
            expected_version,
            AssignmentStatus::PickedUp,
            now,
        )?;
        let order = if moves_order {
            Some(
                self.orders
                    .set_status(order_id, None, OrderStatus::OutForDelivery, now)?,
            )
        } else {
            None
        };

        info!(assignment_id = %assignment_id, order_id = %order_id, courier_id = %courier_id, "order picked up");
        self.publish_assignment(&picked_up);
        if let Some(order) = &order {
            self.publish_order(order);
        }

        Ok(picked_up)
    }

    async fn deliver(
        &self,
        actor: &Actor,
        assignment_id: Uuid,
        expected_version: Option<u64>,
    ) -> Result<Assignment, AppError> {
        let courier_id = actor.require(Role::Courier)?;
        let order_id = self.own_assignment(courier_id, assignment_id)?.order_id;
        let _order_guard = self.order_locks.lock(order_id).await;

        let assignment = self.assignments.get(assignment_id)?;
        let order = self.orders.get(order_id)?;
        AssignmentStore::check_status(&assignment, expected_version, AssignmentStatus::Delivered)?;
        OrderStore::check_status(&order, None, OrderStatus::Delivered)?;

        let now = self.now();
        let delivered = self.assignments.set_status(
            assignment_id,
            expected_version,
            AssignmentStatus::Delivered,
            now,
        )?;
        let order = self
            .orders
            .set_status(order_id, None, OrderStatus::Delivered, now)?;

        info!(assignment_id = %assignment_id, order_id = %order_id, courier_id = %courier_id, "order delivered");
        self.publish_assignment(&delivered);
        self.publish_order(&order);
        self.refresh_utilization(courier_id);

        Ok(delivered)
    }

    /// Courier drops an accepted or picked-up delivery, or the restaurant
    /// withdraws it. The order becomes eligible for a new courier.
    async fn cancel_assignment(
        &self,
        actor: &Actor,
        assignment_id: Uuid,
        expected_version: Option<u64>,
    ) -> Result<Assignment, AppError> {
        let current = self.assignments.get(assignment_id)?;
        let allowed = match actor.role {
            Role::Courier => current.courier_id == actor.id,
            Role::Restaurant => current.restaurant_id == actor.id,
            Role::Customer => false,
        };
        if !allowed {
            return Err(AppError::Forbidden(format!(
                "courier assignment {assignment_id} cannot be cancelled by this account"
            )));
        }

        let order_id = current.order_id;
        let _order_guard = self.order_locks.lock(order_id).await;

        let assignment = self.assignments.get(assignment_id)?;
        if assignment.status == AssignmentStatus::Requested {
            return Err(AppError::InvalidTransition(format!(
                "offer {assignment_id} has not been accepted; it can only be rejected or expire"
            )));
        }

        let now = self.now();
        let cancelled = self.assignments.set_status(
            assignment_id,
            expected_version,
            AssignmentStatus::Cancelled,
            now,
        )?;
        self.orders.set_courier(order_id, None, now)?;

        info!(
            assignment_id = %assignment_id,
            order_id = %order_id,
            by = ?actor.role,
            "delivery cancelled; order needs a new courier"
        );
        self.publish_assignment(&cancelled);
        self.refresh_utilization(cancelled.courier_id);

        Ok(cancelled)
    }

    /// Orders of this restaurant whose last courier assignment ended without
    /// delivery and that have no live offer. Stale offers are expired first.
    pub async fn orders_needing_couriers(
        &self,
        actor: &Actor,
        restaurant_id: Uuid,
    ) -> Result<Vec<Order>, AppError> {
        actor.require_self(Role::Restaurant, restaurant_id)?;

        let candidates: Vec<Order> = self
            .orders
            .list_by_restaurant(restaurant_id)
            .into_iter()
            .filter(|order| order.status.accepts_courier())
            .collect();

        let now = self.now();
        for order in &candidates {
            let stale = self
                .assignments
                .active_for_order(order.id)
                .is_some_and(|live| self.policy.is_due(&live, now));
            if stale {
                self.check_expired_for_order(order.id).await?;
            }
        }

        Ok(candidates
            .into_iter()
            .filter(|order| self.needs_courier(order.id))
            .collect())
    }

    fn needs_courier(&self, order_id: Uuid) -> bool {
        self.assignments.active_for_order(order_id).is_none()
            && self
                .assignments
                .latest_for_order(order_id)
                .is_some_and(|last| last.status.ended_without_delivery())
    }

    /// Offers waiting for this courier's answer. Offers past their deadline
    /// are expired rather than returned.
    pub async fn pending_offers_for_courier(
        &self,
        actor: &Actor,
        courier_id: Uuid,
    ) -> Result<Vec<Assignment>, AppError> {
        actor.require_self(Role::Courier, courier_id)?;

        let now = self.now();
        for offer in self.assignments.list_pending_for_courier(courier_id) {
            if self.policy.is_due(&offer, now) {
                self.check_expired(offer.id).await?;
            }
        }

        Ok(self.assignments.list_pending_for_courier(courier_id))
    }

    pub fn active_deliveries_for_courier(
        &self,
        actor: &Actor,
        courier_id: Uuid,
    ) -> Result<Vec<Assignment>, AppError> {
        actor.require_self(Role::Courier, courier_id)?;
        Ok(self.assignments.list_active_for_courier(courier_id))
    }

    /// Closes an account that has nothing left in flight. A courier's check
    /// and removal run under the courier lock so no offer lands in between.
    pub async fn close_account(&self, actor: &Actor) -> Result<(), AppError> {
        let _courier_guard = match actor.role {
            Role::Courier => Some(self.courier_locks.lock(actor.id).await),
            Role::Customer | Role::Restaurant => None,
        };

        let busy = match actor.role {
            Role::Customer => self
                .orders
                .list_by_customer(actor.id)
                .iter()
                .any(|order| !order.status.is_terminal()),
            Role::Restaurant => self
                .orders
                .list_by_restaurant(actor.id)
                .iter()
                .any(|order| !order.status.is_terminal()),
            Role::Courier => {
                !self.assignments.list_pending_for_courier(actor.id).is_empty()
                    || self.assignments.count_active_for_courier(actor.id) > 0
            }
        };
        if busy {
            return Err(AppError::Conflict(
                "account still has orders or deliveries in progress".to_string(),
            ));
        }

        self.directory.remove_account(actor)?;
        info!(account_id = %actor.id, role = ?actor.role, "account closed");
        Ok(())
    }

    fn own_assignment(&self, courier_id: Uuid, assignment_id: Uuid) -> Result<Assignment, AppError> {
        let assignment = self.assignments.get(assignment_id)?;
        if assignment.courier_id != courier_id {
            return Err(AppError::Forbidden(format!(
                "courier assignment {assignment_id} belongs to another courier"
            )));
        }
        Ok(assignment)
    }
}

fn ensure_restaurant(order: &Order, restaurant_id: Uuid) -> Result<(), AppError> {
    if order.restaurant_id == restaurant_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "order {} belongs to another restaurant",
            order.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{OrderLine, PlaceOrder};
    use crate::engine::test_support::Fixture;
    use crate::models::account::Actor;
    use crate::models::assignment::{Assignment, AssignmentAction, AssignmentStatus};
    use crate::models::courier::{CourierStatus, GeoPoint};
    use crate::models::event::LifecycleEvent;
    use crate::models::order::{Order, OrderStatus};
    use crate::models::restaurant::{MenuItem, Restaurant};
    use crate::store::idempotency::IdempotencyKey;

    fn burger_order(fixture: &Fixture, burgers: u32) -> PlaceOrder {
        PlaceOrder {
            restaurant_id: fixture.restaurant.id,
            address_id: fixture.address_id,
            items: vec![OrderLine {
                menu_item_id: fixture.burger_id,
                quantity: burgers,
            }],
        }
    }

    async fn processing_order(fixture: &Fixture) -> Order {
        let order = fixture
            .engine
            .place_order(&fixture.customer, burger_order(fixture, 1), None)
            .unwrap();
        fixture
            .engine
            .change_order_status(&fixture.restaurant, order.id, OrderStatus::Processing, 1)
            .await
            .unwrap()
    }

    async fn offer(fixture: &Fixture, order_id: Uuid, courier: &Actor) -> Assignment {
        fixture
            .engine
            .request_courier(&fixture.restaurant, fixture.restaurant.id, order_id, courier.id)
            .await
            .unwrap()
    }

    async fn act(
        fixture: &Fixture,
        actor: &Actor,
        assignment_id: Uuid,
        action: AssignmentAction,
    ) -> Result<Assignment, crate::error::AppError> {
        fixture
            .engine
            .apply_assignment_action(actor, assignment_id, action, None)
            .await
    }

    #[tokio::test]
    async fn order_travels_from_placement_to_delivery() {
        let fixture = Fixture::new();
        let engine = &fixture.engine;
        let courier = fixture.add_courier("Cleo", 52.51, 13.40);

        let placed = engine
            .place_order(
                &fixture.customer,
                PlaceOrder {
                    restaurant_id: fixture.restaurant.id,
                    address_id: fixture.address_id,
                    items: vec![
                        OrderLine {
                            menu_item_id: fixture.burger_id,
                            quantity: 2,
                        },
                        OrderLine {
                            menu_item_id: fixture.fries_id,
                            quantity: 1,
                        },
                    ],
                },
                None,
            )
            .unwrap();
        assert_eq!(placed.status, OrderStatus::Pending);
        assert_eq!(placed.total_price.to_string(), "25.00");
        assert_eq!(placed.version, 1);

        let approved = engine
            .change_order_status(&fixture.restaurant, placed.id, OrderStatus::Processing, 1)
            .await
            .unwrap();
        assert_eq!(approved.status, OrderStatus::Processing);
        assert_eq!(approved.version, 2);

        let requested = offer(&fixture, placed.id, &courier).await;
        assert_eq!(requested.status, AssignmentStatus::Requested);

        let accepted = act(&fixture, &courier, requested.id, AssignmentAction::Accept)
            .await
            .unwrap();
        assert_eq!(accepted.status, AssignmentStatus::Accepted);
        assert_eq!(
            engine
                .active_deliveries_for_courier(&courier, courier.id)
                .unwrap()
                .len(),
            1
        );
        let order = engine.get_order(&courier, placed.id).unwrap();
        assert_eq!(order.courier_id, Some(courier.id));

        act(&fixture, &courier, requested.id, AssignmentAction::Pickup)
            .await
            .unwrap();
        let order = engine.get_order(&fixture.customer, placed.id).unwrap();
        assert_eq!(order.status, OrderStatus::OutForDelivery);
        assert!(order.delivered_at.is_none());

        let delivered = act(&fixture, &courier, requested.id, AssignmentAction::Deliver)
            .await
            .unwrap();
        assert_eq!(delivered.status, AssignmentStatus::Delivered);
        assert!(delivered.delivered_at.is_some());

        let order = engine.get_order(&fixture.customer, placed.id).unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        assert!(order.delivered_at.is_some());
        assert!(
            engine
                .active_deliveries_for_courier(&courier, courier.id)
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn courier_at_capacity_cannot_accept_a_fourth_offer() {
        let fixture = Fixture::new();
        let courier = fixture.add_courier("Cleo", 52.51, 13.40);

        for _ in 0..3 {
            let order = processing_order(&fixture).await;
            let assignment = offer(&fixture, order.id, &courier).await;
            act(&fixture, &courier, assignment.id, AssignmentAction::Accept)
                .await
                .unwrap();
        }

        let fourth = processing_order(&fixture).await;
        let assignment = offer(&fixture, fourth.id, &courier).await;
        let err = act(&fixture, &courier, assignment.id, AssignmentAction::Accept)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "capacity_exceeded");
        let after = fixture.engine.get_assignment(&courier, assignment.id).unwrap();
        assert_eq!(after.status, AssignmentStatus::Requested);
        assert_eq!(after.version, 1);
    }

    #[tokio::test]
    async fn concurrent_accepts_respect_the_cap() {
        let fixture = Fixture::new();
        let courier = fixture.add_courier("Cleo", 52.51, 13.40);

        let mut offers = Vec::new();
        for _ in 0..5 {
            let order = processing_order(&fixture).await;
            offers.push(offer(&fixture, order.id, &courier).await.id);
        }

        let handles: Vec<_> = offers
            .into_iter()
            .map(|id| {
                let engine = fixture.engine.clone();
                tokio::spawn(async move {
                    engine
                        .apply_assignment_action(&courier, id, AssignmentAction::Accept, None)
                        .await
                })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 3);
        assert_eq!(
            fixture
                .engine
                .active_deliveries_for_courier(&courier, courier.id)
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn racing_approve_and_cancel_admit_one_winner() {
        let fixture = Fixture::new();
        let order = fixture
            .engine
            .place_order(&fixture.customer, burger_order(&fixture, 1), None)
            .unwrap();

        let (approve, cancel) = tokio::join!(
            fixture.engine.change_order_status(
                &fixture.restaurant,
                order.id,
                OrderStatus::Processing,
                1
            ),
            fixture.engine.change_order_status(
                &fixture.restaurant,
                order.id,
                OrderStatus::Cancelled,
                1
            ),
        );

        assert!(approve.is_ok() != cancel.is_ok());
        let loser = approve.err().or(cancel.err()).unwrap();
        assert!(matches!(loser.kind(), "conflict" | "invalid_transition"));

        let order = fixture.engine.get_order(&fixture.customer, order.id).unwrap();
        assert_eq!(order.version, 2);
    }

    #[tokio::test]
    async fn sequential_approve_and_cancel_from_one_read_admit_one_winner() {
        let fixture = Fixture::new();
        let order = fixture
            .engine
            .place_order(&fixture.customer, burger_order(&fixture, 1), None)
            .unwrap();

        let approved = fixture
            .engine
            .change_order_status(&fixture.restaurant, order.id, OrderStatus::Processing, order.version)
            .await;
        let cancelled = fixture
            .engine
            .change_order_status(&fixture.restaurant, order.id, OrderStatus::Cancelled, order.version)
            .await;

        assert!(approved.is_ok());
        assert_eq!(cancelled.unwrap_err().kind(), "conflict");
        let order = fixture.engine.get_order(&fixture.customer, order.id).unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let fixture = Fixture::new();
        let order = fixture
            .engine
            .place_order(&fixture.customer, burger_order(&fixture, 1), None)
            .unwrap();
        fixture
            .engine
            .change_order_status(&fixture.restaurant, order.id, OrderStatus::Processing, 1)
            .await
            .unwrap();

        let err = fixture
            .engine
            .change_order_status(&fixture.restaurant, order.id, OrderStatus::Cancelled, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn delivery_states_cannot_be_requested_directly() {
        let fixture = Fixture::new();
        let order = processing_order(&fixture).await;

        for target in [OrderStatus::OutForDelivery, OrderStatus::Delivered, OrderStatus::Pending] {
            let err = fixture
                .engine
                .change_order_status(&fixture.restaurant, order.id, target, order.version)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_transition");
        }
    }

    #[tokio::test]
    async fn pickup_before_accept_is_rejected() {
        let fixture = Fixture::new();
        let courier = fixture.add_courier("Cleo", 52.51, 13.40);
        let order = processing_order(&fixture).await;
        let assignment = offer(&fixture, order.id, &courier).await;

        let err = act(&fixture, &courier, assignment.id, AssignmentAction::Pickup)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");

        let err = act(&fixture, &fixture.restaurant, assignment.id, AssignmentAction::Cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn couriers_are_only_requested_for_processing_orders() {
        let fixture = Fixture::new();
        let courier = fixture.add_courier("Cleo", 52.51, 13.40);
        let order = fixture
            .engine
            .place_order(&fixture.customer, burger_order(&fixture, 1), None)
            .unwrap();

        let err = fixture
            .engine
            .request_courier(&fixture.restaurant, fixture.restaurant.id, order.id, courier.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn one_live_offer_per_order() {
        let fixture = Fixture::new();
        let first = fixture.add_courier("Cleo", 52.51, 13.40);
        let second = fixture.add_courier("Dana", 52.53, 13.41);
        let order = processing_order(&fixture).await;

        let offered = offer(&fixture, order.id, &first).await;
        let err = fixture
            .engine
            .request_courier(&fixture.restaurant, fixture.restaurant.id, order.id, second.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");

        act(&fixture, &first, offered.id, AssignmentAction::Reject)
            .await
            .unwrap();
        let needing = fixture
            .engine
            .orders_needing_couriers(&fixture.restaurant, fixture.restaurant.id)
            .await
            .unwrap();
        assert_eq!(needing.len(), 1);

        let reoffered = offer(&fixture, order.id, &second).await;
        assert_eq!(reoffered.status, AssignmentStatus::Requested);
        assert_eq!(
            fixture
                .engine
                .assignments_for_order(&fixture.restaurant, order.id)
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn offline_couriers_cannot_be_requested() {
        let fixture = Fixture::new();
        let courier = fixture.add_courier("Cleo", 52.51, 13.40);
        fixture
            .engine
            .directory
            .set_courier_status(courier.id, CourierStatus::Offline, fixture.engine.now())
            .unwrap();
        let order = processing_order(&fixture).await;

        let err = fixture
            .engine
            .request_courier(&fixture.restaurant, fixture.restaurant.id, order.id, courier.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn cancelling_an_order_on_the_road_voids_its_delivery() {
        let fixture = Fixture::new();
        let courier = fixture.add_courier("Cleo", 52.51, 13.40);
        let order = processing_order(&fixture).await;
        let assignment = offer(&fixture, order.id, &courier).await;
        act(&fixture, &courier, assignment.id, AssignmentAction::Accept)
            .await
            .unwrap();
        act(&fixture, &courier, assignment.id, AssignmentAction::Pickup)
            .await
            .unwrap();
        let on_the_road = fixture.engine.get_order(&fixture.restaurant, order.id).unwrap();

        let cancelled = fixture
            .engine
            .change_order_status(
                &fixture.restaurant,
                order.id,
                OrderStatus::Cancelled,
                on_the_road.version,
            )
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let voided = fixture.engine.get_assignment(&courier, assignment.id).unwrap();
        assert_eq!(voided.status, AssignmentStatus::Cancelled);
        assert!(voided.ended_at.is_some());
        assert!(
            fixture
                .engine
                .active_deliveries_for_courier(&courier, courier.id)
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn customers_only_cancel_pending_orders() {
        let fixture = Fixture::new();
        let pending = fixture
            .engine
            .place_order(&fixture.customer, burger_order(&fixture, 1), None)
            .unwrap();
        let cancelled = fixture
            .engine
            .change_order_status(&fixture.customer, pending.id, OrderStatus::Cancelled, pending.version)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let processing = processing_order(&fixture).await;
        let err = fixture
            .engine
            .change_order_status(
                &fixture.customer,
                processing.id,
                OrderStatus::Cancelled,
                processing.version,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn dropped_delivery_can_be_reoffered_after_pickup() {
        let fixture = Fixture::new();
        let first = fixture.add_courier("Cleo", 52.51, 13.40);
        let second = fixture.add_courier("Dana", 52.53, 13.41);
        let order = processing_order(&fixture).await;
        let assignment = offer(&fixture, order.id, &first).await;
        act(&fixture, &first, assignment.id, AssignmentAction::Accept)
            .await
            .unwrap();
        act(&fixture, &first, assignment.id, AssignmentAction::Pickup)
            .await
            .unwrap();
        act(&fixture, &first, assignment.id, AssignmentAction::Cancel)
            .await
            .unwrap();

        let order = fixture.engine.get_order(&fixture.restaurant, order.id).unwrap();
        assert_eq!(order.status, OrderStatus::OutForDelivery);
        assert_eq!(order.courier_id, None);

        let replacement = offer(&fixture, order.id, &second).await;
        act(&fixture, &second, replacement.id, AssignmentAction::Accept)
            .await
            .unwrap();
        act(&fixture, &second, replacement.id, AssignmentAction::Pickup)
            .await
            .unwrap();
        act(&fixture, &second, replacement.id, AssignmentAction::Deliver)
            .await
            .unwrap();

        let order = fixture.engine.get_order(&fixture.customer, order.id).unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.courier_id, Some(second.id));
    }

    #[tokio::test]
    async fn other_couriers_cannot_act_on_an_offer() {
        let fixture = Fixture::new();
        let courier = fixture.add_courier("Cleo", 52.51, 13.40);
        let intruder = fixture.add_courier("Eve", 52.51, 13.40);
        let order = processing_order(&fixture).await;
        let assignment = offer(&fixture, order.id, &courier).await;

        let err = act(&fixture, &intruder, assignment.id, AssignmentAction::Accept)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        assert_eq!(
            fixture.engine.get_order(&intruder, order.id).unwrap_err().kind(),
            "forbidden"
        );
    }

    #[test]
    fn retried_placement_with_the_same_key_returns_the_first_order() {
        let fixture = Fixture::new();
        let key = IdempotencyKey::from_uuid(Uuid::new_v4());

        let first = fixture
            .engine
            .place_order(&fixture.customer, burger_order(&fixture, 2), Some(key))
            .unwrap();
        let retry = fixture
            .engine
            .place_order(&fixture.customer, burger_order(&fixture, 2), Some(key))
            .unwrap();
        assert_eq!(first.id, retry.id);
        assert_eq!(fixture.engine.order_count(), 1);

        let err = fixture
            .engine
            .place_order(&fixture.customer, burger_order(&fixture, 3), Some(key))
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn placement_rejects_foreign_menu_items_and_addresses() {
        let fixture = Fixture::new();

        let mut unknown_item = burger_order(&fixture, 1);
        unknown_item.items[0].menu_item_id = Uuid::new_v4();
        let err = fixture
            .engine
            .place_order(&fixture.customer, unknown_item, None)
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let mut unknown_address = burger_order(&fixture, 1);
        unknown_address.address_id = Uuid::new_v4();
        let err = fixture
            .engine
            .place_order(&fixture.customer, unknown_address, None)
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = fixture
            .engine
            .place_order(&fixture.restaurant, burger_order(&fixture, 1), None)
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        assert_eq!(fixture.engine.order_count(), 0);
    }

    #[test]
    fn order_amounts_that_overflow_are_rejected() {
        let fixture = Fixture::new();
        let caviar_id = Uuid::new_v4();
        let restaurant = fixture.engine.directory.add_restaurant(Restaurant {
            id: Uuid::new_v4(),
            name: "Caviar Bar".to_string(),
            location: GeoPoint {
                lat: 52.50,
                lng: 13.40,
            },
            menu: vec![MenuItem {
                id: caviar_id,
                name: "Caviar".to_string(),
                price: Decimal::MAX,
                available: true,
            }],
        });
        let order = |quantity| PlaceOrder {
            restaurant_id: restaurant.id,
            address_id: fixture.address_id,
            items: vec![OrderLine {
                menu_item_id: caviar_id,
                quantity,
            }],
        };

        let err = fixture
            .engine
            .place_order(&fixture.customer, order(2), None)
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let mut twice = order(1);
        twice.items.push(twice.items[0].clone());
        let err = fixture
            .engine
            .place_order(&fixture.customer, twice, None)
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(fixture.engine.order_count(), 0);
    }

    #[test]
    fn available_couriers_are_sorted_by_distance() {
        let fixture = Fixture::new();
        let far = fixture.add_courier("Far", 52.40, 13.30);
        let near = fixture.add_courier("Near", 52.521, 13.406);
        let offline = fixture.add_courier("Off", 52.52, 13.405);
        fixture
            .engine
            .directory
            .set_courier_status(offline.id, CourierStatus::Offline, fixture.engine.now())
            .unwrap();

        let available = fixture
            .engine
            .available_couriers(&fixture.restaurant, fixture.restaurant.id)
            .unwrap();
        let ids: Vec<Uuid> = available.iter().map(|c| c.courier.id).collect();
        assert_eq!(ids, vec![near.id, far.id]);
        assert!(available[0].distance_km < available[1].distance_km);
    }

    #[tokio::test]
    async fn accounts_with_open_orders_cannot_close() {
        let fixture = Fixture::new();
        let order = fixture
            .engine
            .place_order(&fixture.customer, burger_order(&fixture, 1), None)
            .unwrap();

        let err = fixture
            .engine
            .close_account(&fixture.customer)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");

        fixture
            .engine
            .change_order_status(&fixture.customer, order.id, OrderStatus::Cancelled, order.version)
            .await
            .unwrap();
        fixture.engine.close_account(&fixture.customer).await.unwrap();
        assert!(fixture.engine.directory.customer(fixture.customer.id).is_err());
    }

    #[tokio::test]
    async fn closed_couriers_cannot_be_requested() {
        let fixture = Fixture::new();
        let courier = fixture.add_courier("Cleo", 52.51, 13.40);
        let order = processing_order(&fixture).await;

        fixture.engine.close_account(&courier).await.unwrap();

        let err = fixture
            .engine
            .request_courier(&fixture.restaurant, fixture.restaurant.id, order.id, courier.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(
            fixture
                .engine
                .assignments_for_order(&fixture.restaurant, order.id)
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn closing_a_courier_races_cleanly_with_an_offer() {
        for _ in 0..20 {
            let fixture = Fixture::new();
            let courier = fixture.add_courier("Cleo", 52.51, 13.40);
            let order = processing_order(&fixture).await;

            let engine = fixture.engine.clone();
            let restaurant = fixture.restaurant;
            let offer = tokio::spawn(async move {
                engine
                    .request_courier(&restaurant, restaurant.id, order.id, courier.id)
                    .await
            });
            let closed = fixture.engine.close_account(&courier).await;
            let offered = offer.await.unwrap();

            // either the offer landed first and blocks the closure, or the
            // courier was gone before the offer
            assert!(closed.is_ok() != offered.is_ok());
            let courier_exists = fixture.engine.directory.courier(courier.id).is_ok();
            assert_eq!(courier_exists, offered.is_ok());
        }
    }

    #[tokio::test]
    async fn transitions_are_broadcast() {
        let mut fixture = Fixture::new();
        let order = processing_order(&fixture).await;

        let statuses: Vec<OrderStatus> = std::iter::from_fn(|| fixture.events.try_recv().ok())
            .filter_map(|event| match event {
                LifecycleEvent::OrderStatusChanged { order_id, status, .. } if order_id == order.id => {
                    Some(status)
                }
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![OrderStatus::Pending, OrderStatus::Processing]);
    }
}
