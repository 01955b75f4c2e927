use anyhow::{bail, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use msauth_agent::broker::token_broker::{BrokerConfig, TokenBroker};
use msauth_agent::config::settings::Args;
use msauth_agent::flow::microsoft::MicrosoftLoginDriver;
use msauth_agent::observability::metrics::get_metrics;
use msauth_agent::observability::routes::MetricsState;
use msauth_agent::server::server::{self, AppState};
use msauth_agent::utils::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // -------------------------------
    // 1. Read env / args, init logging
    // -------------------------------

    let args = Args::parse();
    logging::init_logging(args.log_level, args.log_format);

    // -------------------------------
    // 2. Validate fatal settings
    // -------------------------------

    if args.modeus_url.trim().is_empty() {
        bail!("MODEUS_URL is not set; provide it via configuration or environment");
    }
    if args.username.trim().is_empty() || args.password.trim().is_empty() {
        bail!("MS_USERNAME / MS_PASSWORD are not set; provide them via configuration or environment");
    }
    info!("using Modeus URL: {}", args.modeus_url);

    // -------------------------------
    // 3. Build the login driver and the broker
    // -------------------------------

    let driver = Arc::new(MicrosoftLoginDriver::new(&args.webdriver_url)?);
    let broker = Arc::new(TokenBroker::new(
        driver,
        BrokerConfig {
            target_url: args.modeus_url.clone(),
            username: args.username.clone(),
            password: args.password.clone(),
            ttl: Duration::from_secs(args.token_ttl_seconds),
        },
    ));

    // -------------------------------
    // 4. Start the HTTP server
    // -------------------------------

    let metrics = get_metrics().await;
    let state = AppState {
        broker,
        metrics_state: MetricsState::new(metrics.registry.clone()),
        api_key: args.api_key.filter(|key| !key.trim().is_empty()),
    };

    info!("Service starting...");
    server::start(&format!("{}:{}", args.host, args.port), state).await
}
