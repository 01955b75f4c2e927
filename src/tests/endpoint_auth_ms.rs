#[cfg(test)]
mod test {
    use http::StatusCode;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::time::sleep;

    use crate::server::server::router;
    use crate::tests::common::{app_state, broker_with, build_reqwest_client, spawn_axum, FakeDriver};

    #[tokio::test]
    async fn end_to_end_token_scenario() {
        let driver = FakeDriver::with_token("abc123");
        let broker = broker_with(driver.clone(), Duration::from_secs(60));
        let state = app_state(broker, None).await;
        let (handle, addr) = spawn_axum(router(state)).await;
        let client = build_reqwest_client();

        // First call: no cache, triggers the refresh.
        let response = client
            .get(format!("http://{addr}/auth/ms"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["jwt"], "abc123");

        // Second call a moment later: cache hit, same token, no new login.
        sleep(Duration::from_millis(100)).await;
        let response = client
            .get(format!("http://{addr}/auth/ms"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["jwt"], "abc123");
        assert_eq!(driver.login_calls(), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn refresh_in_progress_maps_to_429_with_an_empty_body() {
        let driver = FakeDriver::slow("tok", Duration::from_millis(400));
        let broker = broker_with(driver, Duration::from_secs(60));
        let state = app_state(broker, None).await;
        let (handle, addr) = spawn_axum(router(state)).await;
        let client = build_reqwest_client();

        let refresher = {
            let client = client.clone();
            let url = format!("http://{addr}/auth/ms");
            tokio::spawn(async move { client.get(url).send().await.unwrap().status() })
        };
        sleep(Duration::from_millis(100)).await;

        let response = client
            .get(format!("http://{addr}/auth/ms"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.bytes().await.unwrap().is_empty());

        assert_eq!(refresher.await.unwrap(), StatusCode::OK);
        handle.abort();
    }

    #[tokio::test]
    async fn api_key_gate_rejects_missing_or_wrong_keys() {
        let driver = FakeDriver::with_token("abc123");
        let broker = broker_with(driver, Duration::from_secs(60));
        let state = app_state(broker, Some("sekret")).await;
        let (handle, addr) = spawn_axum(router(state)).await;
        let client = build_reqwest_client();
        let url = format!("http://{addr}/auth/ms");

        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = client
            .get(&url)
            .header("X-API-Key", "wrong")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // The gate covers every route, /metrics included.
        let response = client
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = client
            .get(&url)
            .header("X-API-Key", "sekret")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        handle.abort();
    }

    #[tokio::test]
    async fn login_failure_maps_to_500_with_a_problem_payload() {
        let driver = FakeDriver::failing_login();
        let broker = broker_with(driver, Duration::from_secs(60));
        let state = app_state(broker, None).await;
        let (handle, addr) = spawn_axum(router(state)).await;
        let client = build_reqwest_client();

        let response = client
            .get(format!("http://{addr}/auth/ms"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json().await.unwrap();
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .contains("login flow failed"));

        handle.abort();
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_the_registry() {
        let driver = FakeDriver::with_token("abc123");
        let broker = broker_with(driver, Duration::from_secs(60));
        let state = app_state(broker, None).await;
        let (handle, addr) = spawn_axum(router(state)).await;
        let client = build_reqwest_client();

        let response = client
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.text().await.unwrap();
        assert!(body.contains("msauth_refresh_attempts_total"));

        handle.abort();
    }
}
