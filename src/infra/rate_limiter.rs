use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::app::ports::RateLimiterPort;

/// Hands out at most one permit per `min_interval`.
///
/// Clones share the same gate, so every batch that geocodes through a clone
/// is held to the same interval. Waiters are served in arrival order.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    min_interval: Duration,
    // time the previous permit was granted
    last_permit: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                min_interval,
                last_permit: Mutex::new(None),
            }),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.inner.min_interval
    }

    pub async fn acquire(&self) {
        // The lock is held while sleeping so the next waiter measures from this permit.
        let mut last = self.inner.last_permit.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.inner.min_interval).await;
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl RateLimiterPort for RateLimiter {
    async fn acquire(&self) {
        RateLimiter::acquire(self).await;
    }
}
