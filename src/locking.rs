//! Per-file async locks serializing overlapping chunk requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

/// Manages asynchronous mutexes keyed by file id.
///
/// The upload protocol expects clients to send chunks for one file
/// strictly in sequence; the lock turns that precondition into an
/// enforced property instead of an assumption.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `file_id`, waiting at most `timeout`.
    pub async fn lock_file_with_timeout(
        &self,
        file_id: &str,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, ()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(file_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overlapping_requests_wait_then_time_out() {
        let manager = LockManager::new();
        let guard = manager
            .lock_file_with_timeout("f1", Duration::from_millis(50))
            .await
            .expect("first lock");

        let blocked = manager
            .lock_file_with_timeout("f1", Duration::from_millis(20))
            .await;
        assert!(blocked.is_err());

        // A different file id is unaffected.
        let other = manager
            .lock_file_with_timeout("f2", Duration::from_millis(20))
            .await;
        assert!(other.is_ok());

        drop(guard);
        let reacquired = manager
            .lock_file_with_timeout("f1", Duration::from_millis(20))
            .await;
        assert!(reacquired.is_ok());
    }
}
