/// Login flow seam
///
/// The interactive login is an opaque, UI-coupled procedure driven by an
/// external browser. The broker depends only on the narrow traits below, so
/// its caching and concurrency logic is testable against canned doubles.
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

pub mod microsoft;

/// Point-in-time copy of the page's client-side storage: string keys to raw
/// string values (the values are often themselves JSON-encoded).
pub type SessionStorageSnapshot = HashMap<String, String>;

/// One isolated browser session. Created per refresh attempt, never reused
/// across attempts; `close` must be safe to call whatever state `login`
/// left the session in.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Drive the interactive login. On success the session is positioned on
    /// an authenticated page whose storage holds the identity token.
    async fn login(&self, target_url: &str, username: &str, password: &str) -> Result<()>;

    /// Read the session storage of the current page.
    async fn session_storage(&self) -> Result<SessionStorageSnapshot>;

    /// Tear the session down, releasing its browser resources.
    async fn close(&self) -> Result<()>;
}

/// Factory for isolated browser sessions plus the one-time environment
/// preparation the sessions depend on.
#[async_trait]
pub trait LoginDriver: Send + Sync {
    /// One-time environment preparation (e.g. starting a local driver
    /// process). Idempotent; gated and retried by the broker.
    async fn prepare(&self) -> Result<()>;

    /// Open a fresh, isolated browser session.
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>>;
}
