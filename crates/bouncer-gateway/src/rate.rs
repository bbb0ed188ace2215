//! Fixed-window rate limiting, fail-closed.
//!
//! One counter per `(source, window_start)`. A store failure reports as
//! rate-exceeded: an outage must never become a bypass.

use std::sync::Arc;

use bouncer_approval::Store;
use bouncer_core::{GatewayError, GatewayResult, Timestamp};

/// Fixed-window counter plus the pending-per-source cap.
pub struct RateLimiter<S> {
    store: Arc<S>,
    window_seconds: u64,
    max_in_window: u32,
    max_pending_per_source: u32,
}

impl<S: Store> RateLimiter<S> {
    /// Build a limiter.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        window_seconds: u64,
        max_in_window: u32,
        max_pending_per_source: u32,
    ) -> Self {
        Self {
            store,
            window_seconds,
            max_in_window,
            max_pending_per_source,
        }
    }

    /// Charge one submission against `source` and verify both caps.
    ///
    /// # Errors
    ///
    /// [`GatewayError::RateLimited`] when either cap is exceeded, and —
    /// fail-closed — when the store is unavailable.
    pub async fn check(&self, source: &str, now: Timestamp) -> GatewayResult<()> {
        let source = if source.is_empty() { "__anonymous__" } else { source };
        let window = i64::try_from(self.window_seconds).unwrap_or(60).max(1);
        let window_start = now.unix_seconds() / window * window;

        let count = match self.store.increment_rate(source, window_start).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "rate counter unavailable, failing closed");
                return Err(GatewayError::RateLimited(
                    "rate limiter unavailable".to_owned(),
                ));
            },
        };
        if count > self.max_in_window {
            return Err(GatewayError::RateLimited(format!(
                "{count}/{} requests in the last {}s",
                self.max_in_window, self.window_seconds
            )));
        }

        let pending = match self.store.count_pending(source).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "pending count unavailable, failing closed");
                return Err(GatewayError::RateLimited(
                    "rate limiter unavailable".to_owned(),
                ));
            },
        };
        if pending >= self.max_pending_per_source {
            return Err(GatewayError::RateLimited(format!(
                "{pending}/{} pending requests",
                self.max_pending_per_source
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bouncer_approval::MemoryStore;

    fn limiter(store: Arc<MemoryStore>) -> RateLimiter<MemoryStore> {
        RateLimiter::new(store, 60, 3, 10)
    }

    #[tokio::test]
    async fn test_allows_up_to_cap() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(Arc::clone(&store));
        let now = Timestamp::now();
        for _ in 0..3 {
            limiter.check("bot", now).await.unwrap();
        }
        assert!(matches!(
            limiter.check("bot", now).await,
            Err(GatewayError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(Arc::clone(&store));
        let now = Timestamp::now();
        for _ in 0..3 {
            limiter.check("bot-a", now).await.unwrap();
        }
        limiter.check("bot-b", now).await.unwrap();
    }

    #[tokio::test]
    async fn test_new_window_resets() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(Arc::clone(&store));
        let now = Timestamp::now();
        for _ in 0..3 {
            limiter.check("bot", now).await.unwrap();
        }
        let next_window = now.plus_seconds(61);
        limiter.check("bot", next_window).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(Arc::clone(&store));
        store.set_fail_mode(true).await;
        assert!(matches!(
            limiter.check("bot", Timestamp::now()).await,
            Err(GatewayError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_source_is_anonymous_bucket() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(Arc::clone(&store));
        let now = Timestamp::now();
        for _ in 0..3 {
            limiter.check("", now).await.unwrap();
        }
        assert!(limiter.check("", now).await.is_err());
    }
}
