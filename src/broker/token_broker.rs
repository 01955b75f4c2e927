/// Single-flight cached token broker
///
/// Owns the token cache and the two exclusion gates: the one-permit refresh
/// slot (non-blocking try-acquire, so concurrent callers get an immediate
/// `RefreshInProgress` instead of queuing behind a login flow that can take
/// tens of seconds) and the one-time environment-preparation gate.
use anyhow::anyhow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::broker::extract::extract_id_token;
use crate::cache::token_cache::{CachedToken, TokenCache};
use crate::error::BrokerError;
use crate::flow::{BrowserSession, LoginDriver};
use crate::observability::metrics::get_metrics;

/// Read-only settings the broker is constructed with.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub target_url: String,
    pub username: String,
    pub password: String,
    pub ttl: Duration,
}

/// Constructed once at startup and shared behind `Arc`; all mutable state
/// is private to the instance.
pub struct TokenBroker {
    driver: Arc<dyn LoginDriver>,
    config: BrokerConfig,
    cache: TokenCache,
    refresh_slot: Arc<Semaphore>,
    prepared: AtomicBool,
    prepare_gate: Mutex<()>,
}

impl TokenBroker {
    pub fn new(driver: Arc<dyn LoginDriver>, config: BrokerConfig) -> Self {
        Self {
            driver,
            config,
            cache: TokenCache::new(),
            refresh_slot: Arc::new(Semaphore::new(1)),
            prepared: AtomicBool::new(false),
            prepare_gate: Mutex::new(()),
        }
    }

    /// Serve the cached token when fresh; otherwise run (or reject in favor
    /// of) the single in-flight refresh.
    pub async fn get_token(&self) -> Result<String, BrokerError> {
        let metrics = get_metrics().await;
        self.ensure_prepared().await;

        // Fast path: no exclusion, reads interleave freely with a refresh
        // in progress.
        if let Some(token) = self.cache.get_fresh(self.config.ttl).await {
            metrics.cache_hits.inc();
            return Ok(token.value);
        }

        let permit = self
            .refresh_slot
            .clone()
            .try_acquire_owned()
            .map_err(|_| BrokerError::RefreshInProgress)?;

        // The attempt runs on its own task: a caller disconnecting
        // mid-refresh must not leak the permit or the browser session, and
        // a completed refresh still lands in the cache.
        let driver = Arc::clone(&self.driver);
        let config = self.config.clone();
        let cache = self.cache.clone();
        let attempt = tokio::spawn(async move {
            let _permit = permit;
            let result = run_refresh(driver.as_ref(), &config).await;
            if let Ok(token) = &result {
                cache.replace(CachedToken::new(token.clone())).await;
            }
            result
        });

        match attempt.await {
            Ok(result) => result,
            Err(join_error) => Err(BrokerError::Unexpected(anyhow!(
                "refresh attempt task failed: {join_error}"
            ))),
        }
    }

    /// One-time environment preparation behind its own gate. Failures are
    /// swallowed and retried on the next call: the preparation may already
    /// have been done by another process or be unnecessary.
    async fn ensure_prepared(&self) {
        if self.prepared.load(Ordering::Acquire) {
            return;
        }
        let _gate = self.prepare_gate.lock().await;
        if self.prepared.load(Ordering::Acquire) {
            return;
        }
        match self.driver.prepare().await {
            Ok(()) => self.prepared.store(true, Ordering::Release),
            Err(error) => {
                warn!("login driver preparation failed, will retry on next call: {error:#}");
            }
        }
    }
}

/// One refresh attempt: isolated session, login, extraction. The session is
/// released on every path before the outcome is returned; the permit is
/// dropped by the caller's task.
async fn run_refresh(driver: &dyn LoginDriver, config: &BrokerConfig) -> Result<String, BrokerError> {
    let metrics = get_metrics().await;
    metrics.refresh_attempts.inc();
    let started = Instant::now();

    info!("starting token refresh through the microsoft login flow");
    let session = driver.new_session().await.map_err(BrokerError::Unexpected)?;
    let outcome = drive_login(session.as_ref(), config).await;
    if let Err(error) = session.close().await {
        // The attempt's outcome must not be masked by a failing teardown.
        warn!("browser session teardown failed: {error:#}");
    }

    metrics
        .refresh_duration
        .observe(started.elapsed().as_secs_f64());
    match &outcome {
        Ok(_) => info!("token refresh succeeded"),
        Err(error) => {
            metrics
                .refresh_failures
                .with_label_values(&[error.kind()])
                .inc();
            warn!("token refresh failed ({}): {error:#}", error.kind());
        }
    }
    outcome
}

async fn drive_login(
    session: &dyn BrowserSession,
    config: &BrokerConfig,
) -> Result<String, BrokerError> {
    session
        .login(&config.target_url, &config.username, &config.password)
        .await
        .map_err(BrokerError::LoginFailed)?;
    let snapshot = session
        .session_storage()
        .await
        .map_err(BrokerError::Unexpected)?;
    extract_id_token(&snapshot).ok_or(BrokerError::TokenExtractionFailed)
}
