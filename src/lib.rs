//! # msauth-agent
//!
//! HTTP service serving a cached Microsoft identity token for one fixed
//! credential pair. The token is obtained by driving the interactive
//! Microsoft web login through a headless browser; a single-flight broker
//! makes sure at most one login flow runs at a time and serves the cached
//! token to everyone else.
//!
//! Modules:
//! - `config` — environment-sourced service settings
//! - `cache` — single-slot token cache with TTL freshness
//! - `broker` — the single-flight token broker and token extraction
//! - `flow` — login driver seam and the Microsoft login implementation
//! - `webdriver` — minimal W3C WebDriver wire client
//! - `server` — Axum HTTP surface

pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod flow;
pub mod observability;
pub mod server;
pub mod tests;
pub mod utils;
pub mod webdriver;

pub use crate::broker::token_broker::{BrokerConfig, TokenBroker};
pub use crate::error::BrokerError;
