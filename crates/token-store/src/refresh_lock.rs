//! Per-user refresh serialization.
//!
//! Section 5 of the contract requires that at most one refresh operation
//! for a given user is ever in flight. The lock is held by the caller
//! (Hub or Bot) across both the upstream HTTP call and the subsequent
//! `store_tokens` write, so a concurrent caller observes the refreshed
//! token rather than racing the HTTP request itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A registry of per-user refresh locks, cheap to clone (shares the
/// underlying map).
#[derive(Clone, Default)]
pub struct RefreshLocks {
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RefreshLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the refresh lock for `user_id`, waiting if another refresh
    /// for the same user is already in flight. Creates the lock entry on
    /// first use; entries are never removed (one per user for the life of
    /// the process, which is bounded by the fleet's user count).
    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().expect("refresh lock map poisoned");
            locks.entry(user_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn different_users_do_not_contend() {
        let locks = RefreshLocks::new();
        let _a = locks.acquire("1").await;
        let result = tokio::time::timeout(Duration::from_millis(50), locks.acquire("2")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn same_user_waits_for_prior_guard_to_drop() {
        let locks = RefreshLocks::new();
        let guard = locks.acquire("1").await;

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire("1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
