use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Cached identity token and the moment it was obtained.
/// The value is an opaque JWT; it is never parsed or validated here.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: String,
    pub obtained_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn new(value: String) -> Self {
        Self {
            value,
            obtained_at: Utc::now(),
        }
    }

    /// Staleness is binary: fresh iff `now - obtained_at < ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.obtained_at);
        // A negative age means the clock moved backwards; count it as fresh.
        age.to_std().map(|age| age < ttl).unwrap_or(true)
    }
}

/// Single-slot token cache shared between the endpoint handlers and the
/// refresher. Readers clone the token out under the read lock; the write
/// lock is held only for the final assignment, never across a refresh.
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    inner: Arc<RwLock<Option<CachedToken>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// Get the cached token if it exists and is still fresh.
    pub async fn get_fresh(&self, ttl: Duration) -> Option<CachedToken> {
        let slot = self.inner.read().await;
        slot.as_ref().filter(|token| token.is_fresh(ttl)).cloned()
    }

    /// Atomically replace the cached token. The previous value is
    /// superseded, never merged.
    pub async fn replace(&self, token: CachedToken) {
        let mut slot = self.inner.write().await;
        *slot = Some(token);
    }
}
