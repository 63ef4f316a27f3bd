//! Delivery deduplication for at-least-once webhook pushes.
//!
//! WeChat retries a push up to three times when no reply arrives within five
//! seconds. Each delivery identity is remembered for a fixed window so the
//! retries are acknowledged without re-running business logic.

use std::time::Duration;

use moka::future::Cache;

/// Default number of identities held before eviction.
pub const DEFAULT_CAPACITY: u64 = 100_000;

/// Process-local, time-windowed set of seen delivery identities.
#[derive(Clone)]
pub struct DeliveryDeduplicator {
    seen: Cache<String, ()>,
}

impl DeliveryDeduplicator {
    /// Remember each identity for `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self::with_capacity(window, DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(window: Duration, capacity: u64) -> Self {
        let seen = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(window)
            .build();
        Self { seen }
    }

    /// Check-and-mark in one step.
    ///
    /// Returns `true` exactly once per identity within the window; concurrent
    /// callers with the same key see a single `true`.
    pub async fn first_delivery(&self, key: &str) -> bool {
        self.seen
            .entry_by_ref(key)
            .or_insert(())
            .await
            .is_fresh()
    }
}

impl std::fmt::Debug for DeliveryDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryDeduplicator")
            .field("entries", &self.seen.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_second_delivery_is_duplicate() {
        let dedup = DeliveryDeduplicator::new(Duration::from_secs(300));
        assert!(dedup.first_delivery("msg:1001").await);
        assert!(!dedup.first_delivery("msg:1001").await);
        assert!(!dedup.first_delivery("msg:1001").await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let dedup = DeliveryDeduplicator::new(Duration::from_secs(300));
        assert!(dedup.first_delivery("msg:1001").await);
        assert!(dedup.first_delivery("msg:1002").await);
        assert!(dedup.first_delivery("evt:openid-1:1700000000").await);
    }

    #[tokio::test]
    async fn test_key_is_new_again_after_window() {
        let dedup = DeliveryDeduplicator::new(Duration::from_millis(50));
        assert!(dedup.first_delivery("msg:1001").await);
        assert!(!dedup.first_delivery("msg:1001").await);

        // moka tracks expiry with its own clock, not tokio's
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(dedup.first_delivery("msg:1001").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_admit_one() {
        let dedup = Arc::new(DeliveryDeduplicator::new(Duration::from_secs(300)));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                tokio::spawn(async move { dedup.first_delivery("msg:race").await })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap_or(false) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
