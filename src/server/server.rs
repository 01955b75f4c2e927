use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use http::StatusCode;
use serde_json::json;
use tracing::{error, info};

use crate::broker::token_broker::TokenBroker;
use crate::error::BrokerError;
use crate::observability::metrics::get_metrics;
use crate::observability::routes::MetricsState;

static API_KEY_HEADER: &str = "X-API-Key";

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<TokenBroker>,
    pub metrics_state: MetricsState,
    /// Shared secret gating all requests; `None` disables the check.
    pub api_key: Option<String>,
}

/// Build the service router: the token endpoint, the metrics endpoint, and
/// the optional shared-secret gate in front of both.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/auth/ms", get(get_ms_jwt))
        .merge(state.metrics_state.router());

    if state.api_key.is_some() {
        router = router.layer(middleware::from_fn_with_state(state.clone(), check_api_key));
    }
    router.with_state(state)
}

/// Start the Axum server on the configured address.
pub async fn start(bind_addr: &str, state: AppState) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!("listening on {}", listener.local_addr()?);
    get_metrics().await.up.set(1);
    axum::serve(listener, app).await.context("http server")?;
    Ok(())
}

async fn check_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if provided != Some(expected) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(request).await
}

/// `GET /auth/ms` — serve the cached identity token, refreshing through the
/// login flow when stale. 429 with an empty body signals a refresh already
/// in flight; everything else fails with a problem payload.
async fn get_ms_jwt(State(state): State<AppState>) -> Response {
    match state.broker.get_token().await {
        Ok(jwt) => Json(json!({ "jwt": jwt })).into_response(),
        Err(BrokerError::RefreshInProgress) => StatusCode::TOO_MANY_REQUESTS.into_response(),
        Err(broker_error) => {
            error!(
                "token request failed ({}): {broker_error:#}",
                broker_error.kind()
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": broker_error.to_string() })),
            )
                .into_response()
        }
    }
}
