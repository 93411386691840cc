//! Idempotency records for order placement.
//!
//! Clients send an `Idempotency-Key` header (a UUID) with `POST /orders`. The
//! first request under a key stores a SHA-256 hash of the request payload and
//! the id of the created order; a retry with the same payload replays that
//! order, while a retry with a different payload is a conflict.

use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if raw.is_empty() {
            return Err(AppError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }
        if raw.trim() != raw {
            return Err(AppError::Validation(
                "idempotency key must be a valid UUID".to_string(),
            ));
        }

        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| AppError::Validation("idempotency key must be a valid UUID".to_string()))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// SHA-256 over the compact JSON form of a typed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHash([u8; 32]);

impl PayloadHash {
    pub fn of<T: Serialize>(payload: &T) -> Result<Self, AppError> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|err| AppError::Internal(format!("failed to hash payload: {err}")))?;
        Ok(Self(Sha256::digest(&bytes).into()))
    }
}

#[derive(Debug, Clone, Copy)]
struct IdempotencyRecord {
    payload_hash: PayloadHash,
    order_id: Uuid,
}

/// What a caller should do with a keyed request.
pub enum IdempotentOutcome {
    Replay(Uuid),
    Created(Uuid),
}

#[derive(Default)]
pub struct IdempotencyStore {
    records: DashMap<(Uuid, IdempotencyKey), IdempotencyRecord>,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `create` at most once per (owner, key). The entry stays locked
    /// while `create` runs, so concurrent retries wait and then replay.
    pub fn run_once<F>(
        &self,
        owner: Uuid,
        key: IdempotencyKey,
        payload_hash: PayloadHash,
        create: F,
    ) -> Result<IdempotentOutcome, AppError>
    where
        F: FnOnce() -> Result<Uuid, AppError>,
    {
        match self.records.entry((owner, key)) {
            Entry::Occupied(existing) => {
                let record = existing.get();
                if record.payload_hash == payload_hash {
                    Ok(IdempotentOutcome::Replay(record.order_id))
                } else {
                    Err(AppError::Conflict(format!(
                        "idempotency key {key} was already used with a different payload"
                    )))
                }
            }
            Entry::Vacant(slot) => {
                let order_id = create()?;
                slot.insert(IdempotencyRecord {
                    payload_hash,
                    order_id,
                });
                Ok(IdempotentOutcome::Created(order_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::{IdempotencyKey, IdempotencyStore, IdempotentOutcome, PayloadHash};
    use crate::error::AppError;

    #[test]
    fn key_must_be_a_bare_uuid() {
        assert!(IdempotencyKey::parse("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(IdempotencyKey::parse("").is_err());
        assert!(IdempotencyKey::parse(" 550e8400-e29b-41d4-a716-446655440000").is_err());
        assert!(IdempotencyKey::parse("retry-1").is_err());
    }

    #[test]
    fn same_payload_replays_and_different_payload_conflicts() {
        let store = IdempotencyStore::new();
        let owner = Uuid::new_v4();
        let key = IdempotencyKey::from_uuid(Uuid::new_v4());
        let hash = PayloadHash::of(&json!({"items": [1, 2]})).unwrap();
        let other = PayloadHash::of(&json!({"items": [3]})).unwrap();
        let order_id = Uuid::new_v4();

        let first = store.run_once(owner, key, hash, || Ok(order_id)).unwrap();
        assert!(matches!(first, IdempotentOutcome::Created(id) if id == order_id));

        let replay = store
            .run_once(owner, key, hash, || panic!("must not create twice"))
            .unwrap();
        assert!(matches!(replay, IdempotentOutcome::Replay(id) if id == order_id));

        let err = store
            .run_once(owner, key, other, || Ok(Uuid::new_v4()))
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn failed_creation_does_not_burn_the_key() {
        let store = IdempotencyStore::new();
        let owner = Uuid::new_v4();
        let key = IdempotencyKey::from_uuid(Uuid::new_v4());
        let hash = PayloadHash::of(&json!({})).unwrap();

        let failed = store.run_once(owner, key, hash, || {
            Err(AppError::Validation("no items".to_string()))
        });
        assert!(failed.is_err());

        let retried = store.run_once(owner, key, hash, || Ok(Uuid::new_v4())).unwrap();
        assert!(matches!(retried, IdempotentOutcome::Created(_)));
    }
}
