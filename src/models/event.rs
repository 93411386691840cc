use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::order::{Order, OrderStatus};

/// Pushed to websocket subscribers whenever the engine commits a transition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    OrderStatusChanged {
        order_id: Uuid,
        restaurant_id: Uuid,
        customer_id: Uuid,
        status: OrderStatus,
        version: u64,
        at: DateTime<Utc>,
    },
    AssignmentStatusChanged {
        assignment_id: Uuid,
        order_id: Uuid,
        courier_id: Uuid,
        restaurant_id: Uuid,
        status: AssignmentStatus,
        version: u64,
        at: DateTime<Utc>,
    },
}

impl From<&Order> for LifecycleEvent {
    fn from(order: &Order) -> Self {
        LifecycleEvent::OrderStatusChanged {
            order_id: order.id,
            restaurant_id: order.restaurant_id,
            customer_id: order.customer_id,
            status: order.status,
            version: order.version,
            at: order.updated_at,
        }
    }
}

impl From<&Assignment> for LifecycleEvent {
    fn from(assignment: &Assignment) -> Self {
        let at = assignment
            .ended_at
            .or(assignment.delivered_at)
            .or(assignment.picked_up_at)
            .or(assignment.responded_at)
            .unwrap_or(assignment.assigned_at);

        LifecycleEvent::AssignmentStatusChanged {
            assignment_id: assignment.id,
            order_id: assignment.order_id,
            courier_id: assignment.courier_id,
            restaurant_id: assignment.restaurant_id,
            status: assignment.status,
            version: assignment.version,
            at,
        }
    }
}
