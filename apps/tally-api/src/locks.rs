//! # Keyed Lock Registry
//!
//! Serializes mutations of one business day, terminal slot, session or the
//! settings row.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  run_locked([Day(loc), Terminal(t)], fut)                               │
//! │                                                                         │
//! │   1. sort + dedup keys  (Day < Terminal < Session < Settings)           │
//! │   2. lock each key in that order, one shared deadline                   │
//! │        deadline passed ⇒ BUSY, nothing held                             │
//! │   3. tokio::spawn(fut) holding the guards                               │
//! │        caller may go away; the transaction still commits or rolls back  │
//! │   4. guards dropped ⇒ keys nobody holds or awaits are evicted           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{ApiError, ApiResult};

/// A lockable entity. The derived order is the acquisition order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    /// The business day of a location.
    Day(String),
    Terminal(String),
    Session(String),
    Settings,
}

type LockMap = DashMap<LockKey, Arc<Mutex<()>>>;

/// Removes `key` unless someone still holds or awaits its mutex.
///
/// The map owns one reference; every guard and every pending `lock_owned`
/// owns another.
fn evict_idle(locks: &LockMap, key: &LockKey) {
    locks.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Guards held for the duration of one transition.
#[derive(Debug)]
pub struct LockSet {
    locks: Arc<LockMap>,
    held: Vec<(LockKey, OwnedMutexGuard<()>)>,
}

impl Drop for LockSet {
    fn drop(&mut self) {
        let keys: Vec<LockKey> = self.held.drain(..).map(|(key, _guard)| key).collect();
        for key in &keys {
            evict_idle(&self.locks, key);
        }
    }
}

#[derive(Debug)]
pub struct LockRegistry {
    locks: Arc<LockMap>,
    timeout: Duration,
}

impl LockRegistry {
    pub fn new(timeout: Duration) -> Self {
        LockRegistry {
            locks: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn mutex_for(&self, key: &LockKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires every key in canonical order before the deadline.
    pub async fn acquire(&self, mut keys: Vec<LockKey>) -> ApiResult<LockSet> {
        keys.sort();
        keys.dedup();

        let deadline = Instant::now() + self.timeout;
        // dropping a partial set on timeout releases and evicts what it holds
        let mut set = LockSet {
            locks: self.locks.clone(),
            held: Vec::with_capacity(keys.len()),
        };

        for key in keys {
            let mutex = self.mutex_for(&key);
            match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
                Ok(guard) => set.held.push((key, guard)),
                Err(_) => {
                    evict_idle(&self.locks, &key);
                    warn!(?key, timeout_ms = self.timeout.as_millis() as u64, "Lock wait timed out");
                    return Err(ApiError::busy(format!(
                        "timed out waiting for {:?}; retry",
                        key
                    )));
                }
            }
        }

        debug!(keys = ?set.held.iter().map(|(k, _)| k).collect::<Vec<_>>(), "Locks acquired");
        Ok(set)
    }

    /// Runs `fut` while holding `keys`.
    ///
    /// Once the locks are held the future runs on its own task, so cancelling
    /// the caller cannot leave a transition half done.
    pub async fn run_locked<Fut, T>(&self, keys: Vec<LockKey>, fut: Fut) -> ApiResult<T>
    where
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let guards = self.acquire(keys).await?;

        let handle = tokio::spawn(async move {
            let _guards = guards;
            fut.await
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Locked task failed");
                Err(ApiError::internal("locked operation aborted"))
            }
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
