use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Restaurant,
    Courier,
}

/// The authenticated caller behind a bearer token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub role: Role,
    pub id: Uuid,
}

impl Actor {
    pub fn customer(id: Uuid) -> Self {
        Self {
            role: Role::Customer,
            id,
        }
    }

    pub fn restaurant(id: Uuid) -> Self {
        Self {
            role: Role::Restaurant,
            id,
        }
    }

    pub fn courier(id: Uuid) -> Self {
        Self {
            role: Role::Courier,
            id,
        }
    }

    pub fn require(&self, role: Role) -> Result<Uuid, AppError> {
        if self.role == role {
            Ok(self.id)
        } else {
            Err(AppError::Forbidden(format!(
                "{:?} accounts cannot perform this action",
                self.role
            )))
        }
    }

    /// Same role and same account as the path parameter.
    pub fn require_self(&self, role: Role, id: Uuid) -> Result<(), AppError> {
        let own_id = self.require(role)?;
        if own_id == id {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("not allowed to act for {id}")))
        }
    }
}
