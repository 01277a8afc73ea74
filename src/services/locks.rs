//! Per-key mutual exclusion with bounded waiting

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{AppError, AppResult};

/// Held lock on one key. Released on drop.
pub type KeyGuard = OwnedMutexGuard<()>;

/// A table of async mutexes, one per key.
///
/// Operations on different keys never contend. Slots are created on demand
/// and dropped once nobody holds or waits on them.
pub struct KeyedLocks<K> {
    name: &'static str,
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Copy + Display,
{
    pub fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            slots: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Wait up to the configured timeout for `key`, then fail with `Busy`
    pub async fn acquire(&self, key: K) -> AppResult<KeyGuard> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(key).or_default().clone()
        };

        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(lock = self.name, %key, "Lock acquisition timed out");
                Err(AppError::Busy(format!(
                    "{} {} is busy, retry later",
                    self.name, key
                )))
            }
        }
    }
}
