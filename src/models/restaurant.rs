use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub menu: Vec<MenuItem>,
}

impl Restaurant {
    pub fn menu_item(&self, id: Uuid) -> Option<&MenuItem> {
        self.menu.iter().find(|item| item.id == id)
    }
}
