//! Accounts the lifecycle engine refers to: customers with their saved
//! addresses, restaurants with their menus, couriers, and the bearer tokens
//! issued to each of them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::account::{Actor, Role};
use crate::models::courier::{Courier, CourierStatus, GeoPoint};
use crate::models::customer::Customer;
use crate::models::restaurant::Restaurant;

#[derive(Default)]
pub struct Directory {
    customers: DashMap<Uuid, Customer>,
    restaurants: DashMap<Uuid, Restaurant>,
    couriers: DashMap<Uuid, Courier>,
    tokens: DashMap<String, Actor>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue_token(&self, actor: Actor) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens.insert(token.clone(), actor);
        token
    }

    pub fn authenticate(&self, token: &str) -> Option<Actor> {
        let actor = *self.tokens.get(token)?;
        // tokens of removed accounts stop resolving
        self.account_exists(&actor).then_some(actor)
    }

    fn account_exists(&self, actor: &Actor) -> bool {
        match actor.role {
            Role::Customer => self.customers.contains_key(&actor.id),
            Role::Restaurant => self.restaurants.contains_key(&actor.id),
            Role::Courier => self.couriers.contains_key(&actor.id),
        }
    }

    /// Removes the account and every token issued for it.
    pub fn remove_account(&self, actor: &Actor) -> Result<(), AppError> {
        let removed = match actor.role {
            Role::Customer => self.customers.remove(&actor.id).is_some(),
            Role::Restaurant => self.restaurants.remove(&actor.id).is_some(),
            Role::Courier => self.couriers.remove(&actor.id).is_some(),
        };
        if !removed {
            return Err(AppError::NotFound(format!("account {} not found", actor.id)));
        }

        self.tokens.retain(|_, holder| holder != actor);
        Ok(())
    }

    pub fn add_customer(&self, customer: Customer) -> Customer {
        self.customers.insert(customer.id, customer.clone());
        customer
    }

    pub fn customer(&self, id: Uuid) -> Result<Customer, AppError> {
        self.customers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("customer {id} not found")))
    }

    pub fn add_restaurant(&self, restaurant: Restaurant) -> Restaurant {
        self.restaurants.insert(restaurant.id, restaurant.clone());
        restaurant
    }

    pub fn restaurant(&self, id: Uuid) -> Result<Restaurant, AppError> {
        self.restaurants
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("restaurant {id} not found")))
    }

    pub fn add_courier(&self, courier: Courier) -> Courier {
        self.couriers.insert(courier.id, courier.clone());
        courier
    }

    pub fn courier(&self, id: Uuid) -> Result<Courier, AppError> {
        self.couriers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))
    }

    pub fn couriers(&self) -> Vec<Courier> {
        self.couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn courier_count(&self) -> usize {
        self.couriers.len()
    }

    pub fn set_courier_status(
        &self,
        id: Uuid,
        status: CourierStatus,
        now: DateTime<Utc>,
    ) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

        courier.status = status;
        courier.updated_at = now;
        Ok(courier.clone())
    }

    pub fn set_courier_location(
        &self,
        id: Uuid,
        location: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

        courier.location = location;
        courier.updated_at = now;
        Ok(courier.clone())
    }
}
