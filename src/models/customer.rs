use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub id: Uuid,
    pub street: String,
    pub city: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub addresses: Vec<Address>,
}

impl Customer {
    pub fn address(&self, id: Uuid) -> Option<&Address> {
        self.addresses.iter().find(|address| address.id == id)
    }
}
