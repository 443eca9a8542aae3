//! Retention bounds: entry count and entry age.

use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{Cache, CacheEntry, CacheHandle, RequestKey};
use crate::CacheError;

/// Maximum entry count and maximum age for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_entries: usize,
    pub max_age: Duration,
}

impl RetentionPolicy {
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            max_entries,
            max_age,
        }
    }

    /// Whether `entry` is older than the maximum age at `now_ms`.
    ///
    /// A stale entry is not deleted; it may still be served as a fallback.
    pub fn is_stale(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        u128::from(entry.age_ms(now_ms)) > self.max_age.as_millis()
    }

    /// Keys to evict from `keys` (insertion order): the oldest overflow.
    pub fn overflow<'a>(&self, keys: &'a [RequestKey]) -> &'a [RequestKey] {
        let excess = keys.len().saturating_sub(self.max_entries);
        &keys[..excess]
    }

    /// Delete the oldest entries until at most `max_entries` remain.
    ///
    /// Returns how many entries were deleted.
    pub async fn trim(&self, cache: &dyn Cache) -> Result<usize, CacheError> {
        let keys = cache.keys().await?;
        let victims = self.overflow(&keys);
        if victims.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for key in victims {
            if cache.delete(key).await? {
                removed += 1;
            }
        }

        debug!(
            cache = cache.name(),
            removed,
            max_entries = self.max_entries,
            "Cache trimmed"
        );
        Ok(removed)
    }

    /// Trim on a detached task. The caller never observes the outcome.
    pub fn spawn_trim(&self, cache: CacheHandle) {
        let policy = *self;
        tokio::spawn(async move {
            if let Err(error) = policy.trim(cache.as_ref()).await {
                warn!(cache = cache.name(), %error, "Cache trim failed");
            }
        });
    }
}
