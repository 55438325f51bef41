//! Single-writer-per-identity discipline.
//!
//! Saves, deletes and undo hold the shared gate plus a lock on every
//! identity they touch. Rollback and activation hold the gate exclusively.
//! All guards release on drop, including on error paths.

use crate::models::EntityRef;
use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;
use tokio::sync::{Notify, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Default)]
pub struct IdentityLocks {
    gate: RwLock<()>,
    held: Mutex<HashSet<EntityRef>>,
    released: Notify,
}

pub struct IdentityGuard<'a> {
    locks: &'a IdentityLocks,
    entities: Vec<EntityRef>,
    _gate: RwLockReadGuard<'a, ()>,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        {
            let mut held = self.locks.held_set();
            for entity in &self.entities {
                held.remove(entity);
            }
        }
        self.locks.released.notify_waiters();
    }
}

pub struct ExclusiveGuard<'a> {
    _gate: RwLockWriteGuard<'a, ()>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn held_set(&self) -> std::sync::MutexGuard<'_, HashSet<EntityRef>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits until none of `entities` is held by another operation, then
    /// takes all of them at once.
    pub async fn acquire<I>(&self, entities: I) -> IdentityGuard<'_>
    where
        I: IntoIterator<Item = EntityRef>,
    {
        let entities: Vec<EntityRef> = entities
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let gate = self.gate.read().await;

        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut held = self.held_set();
                if entities.iter().all(|e| !held.contains(e)) {
                    held.extend(entities.iter().cloned());
                    break;
                }
            }

            debug!("Waiting for {} locked identities", entities.len());
            released.await;
        }

        IdentityGuard {
            locks: self,
            entities,
            _gate: gate,
        }
    }

    /// Excludes every other operation.
    pub async fn exclusive(&self) -> ExclusiveGuard<'_> {
        ExclusiveGuard {
            _gate: self.gate.write().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, VersionId};
    use std::sync::Arc;
    use std::time::Duration;

    fn entity(name: &str) -> EntityRef {
        EntityRef::new(EntityKind::Post, VersionId::parse(name).unwrap())
    }

    #[tokio::test]
    async fn test_disjoint_sets_do_not_block() {
        let locks = IdentityLocks::new();
        let _a = locks.acquire([entity("a")]).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire([entity("b")]));
        let b = b.await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_overlapping_set_waits_for_release() {
        let locks = Arc::new(IdentityLocks::new());
        let guard = locks.acquire([entity("a"), entity("b")]).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.acquire([entity("b")]).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_exclusive_waits_for_identity_holders() {
        let locks = IdentityLocks::new();
        let guard = locks.acquire([entity("a")]).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.exclusive()).await;
        assert!(blocked.is_err());

        drop(guard);
        let exclusive = tokio::time::timeout(Duration::from_millis(100), locks.exclusive()).await;
        assert!(exclusive.is_ok());
    }
}
