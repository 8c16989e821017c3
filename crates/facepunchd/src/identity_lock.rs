use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-identity punch locks.
///
/// Serialises the read-decide-append sequence of punches for one identity
/// while punches of different identities proceed in parallel. Entries
/// nobody holds or waits on are pruned whenever a lock is requested.
#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `identity_id`.
    pub async fn lock(&self, identity_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            let before = locks.len();
            // The map holds one reference; more means a guard or a waiter.
            locks.retain(|id, l| id == identity_id || Arc::strong_count(l) > 1);
            if locks.len() < before {
                tracing::debug!(pruned = before - locks.len(), "pruned idle punch locks");
            }
            locks
                .entry(identity_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of tracked identities.
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_identity_is_exclusive() {
        let locks = Arc::new(IdentityLocks::new());
        let guard = locks.lock("E1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("E1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_independent_per_identity() {
        let locks = IdentityLocks::new();
        let _a = locks.lock("E1").await;
        tokio::time::timeout(Duration::from_millis(100), locks.lock("E2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_entries_pruned() {
        let locks = IdentityLocks::new();
        drop(locks.lock("E1").await);
        drop(locks.lock("E2").await);
        let _held = locks.lock("E3").await;
        assert_eq!(locks.tracked().await, 1);

        // A held lock survives pruning.
        let _other = locks.lock("E4").await;
        assert_eq!(locks.tracked().await, 2);
    }
}
