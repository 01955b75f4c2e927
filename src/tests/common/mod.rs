// tests/common/mod.rs
pub use axum::Router;
pub use tokio::task::JoinHandle;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::broker::token_broker::{BrokerConfig, TokenBroker};
use crate::flow::{BrowserSession, LoginDriver, SessionStorageSnapshot};
use crate::observability::metrics::get_metrics;
use crate::observability::routes::MetricsState;
use crate::server::server::AppState;

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

pub fn build_reqwest_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("reqwest client")
}

/// Canned storage snapshot holding a valid OIDC user record.
pub fn oidc_snapshot(token: &str) -> SessionStorageSnapshot {
    let mut snapshot = HashMap::new();
    snapshot.insert(
        "oidc.user:https://idp.example/:client".to_string(),
        format!(r#"{{"id_token":"{token}","token_type":"Bearer"}}"#),
    );
    snapshot
}

pub fn broker_with(driver: FakeDriver, ttl: Duration) -> Arc<TokenBroker> {
    Arc::new(TokenBroker::new(
        Arc::new(driver),
        BrokerConfig {
            target_url: "https://modeus.example/schedule".to_string(),
            username: "user@example.com".to_string(),
            password: "hunter2".to_string(),
            ttl,
        },
    ))
}

pub async fn app_state(broker: Arc<TokenBroker>, api_key: Option<&str>) -> AppState {
    let metrics = get_metrics().await;
    AppState {
        broker,
        metrics_state: MetricsState::new(metrics.registry.clone()),
        api_key: api_key.map(str::to_string),
    }
}

struct FakeDriverInner {
    snapshot: SessionStorageSnapshot,
    fail_login: bool,
    fail_prepare: bool,
    login_delay: Duration,
    login_calls: AtomicUsize,
    prepare_calls: AtomicUsize,
    sessions_open: AtomicIsize,
}

/// Login driver double: no browser, canned snapshot, instrumented counters.
#[derive(Clone)]
pub struct FakeDriver {
    inner: Arc<FakeDriverInner>,
}

impl FakeDriver {
    pub fn with_token(token: &str) -> Self {
        Self::build(oidc_snapshot(token), false, false, Duration::ZERO)
    }

    pub fn with_snapshot(snapshot: SessionStorageSnapshot) -> Self {
        Self::build(snapshot, false, false, Duration::ZERO)
    }

    pub fn failing_login() -> Self {
        Self::build(HashMap::new(), true, false, Duration::ZERO)
    }

    /// Successful login that takes `delay`, to hold the refresh slot open.
    pub fn slow(token: &str, delay: Duration) -> Self {
        Self::build(oidc_snapshot(token), false, false, delay)
    }

    pub fn failing_prepare(token: &str) -> Self {
        Self::build(oidc_snapshot(token), false, true, Duration::ZERO)
    }

    fn build(
        snapshot: SessionStorageSnapshot,
        fail_login: bool,
        fail_prepare: bool,
        login_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(FakeDriverInner {
                snapshot,
                fail_login,
                fail_prepare,
                login_delay,
                login_calls: AtomicUsize::new(0),
                prepare_calls: AtomicUsize::new(0),
                sessions_open: AtomicIsize::new(0),
            }),
        }
    }

    pub fn login_calls(&self) -> usize {
        self.inner.login_calls.load(Ordering::SeqCst)
    }

    pub fn prepare_calls(&self) -> usize {
        self.inner.prepare_calls.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet closed; 0 means no leak.
    pub fn sessions_open(&self) -> isize {
        self.inner.sessions_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoginDriver for FakeDriver {
    async fn prepare(&self) -> Result<()> {
        self.inner.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_prepare {
            bail!("environment preparation failed");
        }
        Ok(())
    }

    async fn new_session(&self) -> Result<Box<dyn BrowserSession>> {
        self.inner.sessions_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct FakeSession {
    inner: Arc<FakeDriverInner>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn login(&self, _target_url: &str, _username: &str, _password: &str) -> Result<()> {
        self.inner.login_calls.fetch_add(1, Ordering::SeqCst);
        if !self.inner.login_delay.is_zero() {
            tokio::time::sleep(self.inner.login_delay).await;
        }
        if self.inner.fail_login {
            bail!("login did not complete: still on the microsoft login page");
        }
        Ok(())
    }

    async fn session_storage(&self) -> Result<SessionStorageSnapshot> {
        Ok(self.inner.snapshot.clone())
    }

    async fn close(&self) -> Result<()> {
        self.inner.sessions_open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
