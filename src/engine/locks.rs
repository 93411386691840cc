use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per entity id, created on first use.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        // clone the Arc out so the shard guard is released before awaiting
        let lock = self.locks.entry(id).or_default().value().clone();
        lock.lock_owned().await
    }
}
