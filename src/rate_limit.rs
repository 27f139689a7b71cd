//! Per-user hourly game budget
//!
//! The bucket is a counter initialised to the limit with a window TTL on
//! first use and decremented per game. Init and decrement are separate store
//! calls, so concurrent requests may overshoot by a token.

use crate::errors::TrustResult;
use crate::games::types::UserId;
use crate::storage::SharedStore;
use std::time::Duration;

pub fn bucket_key(user: UserId) -> String {
    format!("trust:user{}:hour:limit", user)
}

#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
}

impl RateLimiter {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Whether the bucket is empty, creating it full if absent
    pub async fn is_limited(&self, key: &str, limit: i64, window: Duration) -> TrustResult<bool> {
        self.store.set_nx(key, &limit.to_string(), Some(window)).await?;
        let remaining = match self.store.get(key).await? {
            Some(v) => v.parse::<i64>().unwrap_or(0),
            // expired between the two calls
            None => limit,
        };
        Ok(remaining <= 0)
    }

    /// Spend one token; failures are logged only
    pub async fn burn_token(&self, key: &str) {
        match self.store.decr(key).await {
            Ok(remaining) => tracing::debug!(bucket = key, remaining, "Token burned"),
            Err(e) => tracing::warn!(bucket = key, error = %e, "Failed to burn rate limit token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_bucket_drains() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let key = bucket_key(9);
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            assert!(!limiter.is_limited(&key, 3, window).await.unwrap());
            limiter.burn_token(&key).await;
        }
        assert!(limiter.is_limited(&key, 3, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_bucket_refills_after_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let key = bucket_key(9);
        let window = Duration::from_millis(30);

        assert!(!limiter.is_limited(&key, 1, window).await.unwrap());
        limiter.burn_token(&key).await;
        assert!(limiter.is_limited(&key, 1, window).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!limiter.is_limited(&key, 1, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_limit_is_always_limited() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        assert!(limiter
            .is_limited(&bucket_key(1), 0, Duration::from_secs(60))
            .await
            .unwrap());
    }
}
