use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::customer::Address;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Order sub-machine. Pickup and delivery edges are only taken by the
    /// lifecycle engine in response to assignment events.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
                | (Processing, OutForDelivery)
                | (OutForDelivery, Delivered)
                | (OutForDelivery, Cancelled)
        )
    }

    /// Orders in these states can still be handed to a courier.
    pub fn accepts_courier(self) -> bool {
        matches!(self, OrderStatus::Processing | OrderStatus::OutForDelivery)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub menu_item_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub address: Address,
    pub items: Vec<LineItem>,
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub courier_id: Option<Uuid>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl LineItem {
    /// `None` when the subtotal does not fit in a `Decimal`.
    pub fn subtotal_of(unit_price: Decimal, quantity: u32) -> Option<Decimal> {
        unit_price.checked_mul(Decimal::from(quantity))
    }
}

impl Order {
    /// `None` when the sum overflows.
    pub fn items_total(items: &[LineItem]) -> Option<Decimal> {
        items
            .iter()
            .try_fold(Decimal::ZERO, |total, item| total.checked_add(item.subtotal))
    }
}
