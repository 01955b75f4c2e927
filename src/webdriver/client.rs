/// Minimal W3C WebDriver client
///
/// Speaks the WebDriver JSON wire protocol against a chromedriver endpoint.
/// Only the handful of commands the login flow needs are implemented:
/// session create/delete, navigate, current URL, find element by CSS
/// selector, element send-keys/click, and synchronous script execution.
use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// W3C element identifier key in find-element responses.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Outlives any single login step; the flow owns its own per-step deadlines.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: Client,
    base_url: String,
}

impl WebDriverClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building webdriver http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Readiness probe against `GET /status`.
    pub async fn status(&self) -> Result<bool> {
        let (_, value) = self.send(Method::GET, "/status", None).await?;
        Ok(value["value"]["ready"].as_bool().unwrap_or(false))
    }

    /// Start a fresh headless Chrome session.
    pub async fn new_session(&self) -> Result<WebDriverSession> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--no-sandbox",
                            "--disable-gpu",
                            "--window-size=1280,800",
                        ]
                    }
                }
            }
        });
        let value = self.post("/session", &capabilities).await?;
        let session_id = value["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| anyhow!("webdriver session response missing sessionId: {value}"))?
            .to_string();
        Ok(WebDriverSession {
            client: self.clone(),
            session_id,
        })
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let (status, value) = self.send(Method::GET, path, None).await?;
        Self::check(status, path, value)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let (status, value) = self.send(Method::POST, path, Some(body)).await?;
        Self::check(status, path, value)
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        let (status, value) = self.send(Method::DELETE, path, None).await?;
        Self::check(status, path, value)
    }

    /// Raw round-trip returning status and decoded body; protocol-level
    /// errors (like "no such element") arrive as non-2xx with a JSON body.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Value)> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {url}"))?;
        let status = response.status();
        let value: Value = response
            .json()
            .await
            .with_context(|| format!("{method} {url}: decoding response body"))?;
        Ok((status, value))
    }

    fn check(status: StatusCode, path: &str, value: Value) -> Result<Value> {
        if !status.is_success() {
            let error = value["value"]["error"].as_str().unwrap_or("unknown");
            let message = value["value"]["message"].as_str().unwrap_or("");
            return Err(anyhow!(
                "webdriver command {path} failed: {status} {error}: {message}"
            ));
        }
        Ok(value)
    }
}

/// Handle to one live browser session.
#[derive(Debug, Clone)]
pub struct WebDriverSession {
    client: WebDriverClient,
    session_id: String,
}

impl WebDriverSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn path(&self, tail: &str) -> String {
        format!("/session/{}{}", self.session_id, tail)
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.client
            .post(&self.path("/url"), &json!({ "url": url }))
            .await
            .map(drop)
    }

    pub async fn current_url(&self) -> Result<String> {
        let value = self.client.get(&self.path("/url")).await?;
        value["value"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("webdriver returned a non-string current URL: {value}"))
    }

    /// Single find attempt. `Ok(None)` when the selector matches nothing;
    /// any other protocol error is reported as-is.
    pub async fn find_element(&self, css: &str) -> Result<Option<Element>> {
        let body = json!({ "using": "css selector", "value": css });
        let (status, value) = self
            .client
            .send(Method::POST, &self.path("/element"), Some(&body))
            .await?;
        if status == StatusCode::NOT_FOUND
            && value["value"]["error"].as_str() == Some("no such element")
        {
            return Ok(None);
        }
        let value = WebDriverClient::check(status, "/element", value)?;
        let element_id = value["value"][ELEMENT_KEY]
            .as_str()
            .ok_or_else(|| anyhow!("webdriver element response missing element id: {value}"))?
            .to_string();
        Ok(Some(Element {
            client: self.client.clone(),
            session_id: self.session_id.clone(),
            element_id,
        }))
    }

    /// Execute a synchronous script in the page and return its value.
    pub async fn execute(&self, script: &str) -> Result<Value> {
        let body = json!({ "script": script, "args": [] });
        let value = self.client.post(&self.path("/execute/sync"), &body).await?;
        Ok(value["value"].clone())
    }

    /// Delete the session, tearing down the browser it drives.
    pub async fn close(&self) -> Result<()> {
        self.client
            .delete(&format!("/session/{}", self.session_id))
            .await
            .map(drop)
    }
}

/// Reference to a located DOM element within a session.
#[derive(Debug, Clone)]
pub struct Element {
    client: WebDriverClient,
    session_id: String,
    element_id: String,
}

impl Element {
    fn path(&self, tail: &str) -> String {
        format!(
            "/session/{}/element/{}{}",
            self.session_id, self.element_id, tail
        )
    }

    pub async fn send_keys(&self, text: &str) -> Result<()> {
        self.client
            .post(&self.path("/value"), &json!({ "text": text }))
            .await
            .map(drop)
    }

    pub async fn click(&self) -> Result<()> {
        self.client
            .post(&self.path("/click"), &json!({}))
            .await
            .map(drop)
    }
}
