//! HTTP probe implementation.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;

use super::{
    conclude, run_attempts, Checker, ProbeBase, ProbeError, Severity, DEFAULT_TIMEOUT,
};
use crate::types::CheckResult;

pub const HTTP_TYPE: &str = "http";

/// Checks an HTTP endpoint with a GET request per attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpChecker {
    #[serde(flatten)]
    pub base: ProbeBase,

    /// Status code a healthy endpoint answers with (default 200).
    #[serde(default, skip_serializing_if = "is_zero_u16")]
    pub up_status: u16,

    /// The body must contain this to be considered up.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub must_contain: String,

    /// The body must not contain this to be considered up.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub must_not_contain: String,

    /// Extra request headers. A `Host` entry overrides the request host.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

impl HttpChecker {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            base: ProbeBase::new(name, url),
            ..Default::default()
        }
    }

    fn up_status(&self) -> Result<StatusCode, ProbeError> {
        if self.up_status == 0 {
            return Ok(StatusCode::OK);
        }
        StatusCode::from_u16(self.up_status)
            .map_err(|e| ProbeError::config(&self.base.name, format!("up_status: {}", e)))
    }

    fn header_map(&self) -> Result<HeaderMap, ProbeError> {
        let mut map = HeaderMap::new();
        for (key, values) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                ProbeError::config(&self.base.name, format!("header {:?}: {}", key, e))
            })?;
            let value = HeaderValue::from_str(&values.join(", ")).map_err(|e| {
                ProbeError::config(&self.base.name, format!("header {:?}: {}", key, e))
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }

    async fn attempt(
        &self,
        client: &Client,
        url: &Url,
        headers: &HeaderMap,
        up_status: StatusCode,
    ) -> Result<(), String> {
        let response = client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| describe(&e))?;

        self.check_down(response, up_status).await
    }

    /// Checks whether the response means the endpoint is down.
    /// Does not look at latency.
    async fn check_down(&self, response: Response, up_status: StatusCode) -> Result<(), String> {
        if response.status() != up_status {
            return Err(format!("response status {}", response.status()));
        }

        if self.must_contain.is_empty() && self.must_not_contain.is_empty() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .map_err(|e| format!("reading response body: {}", describe(&e)))?;

        if !self.must_contain.is_empty() && !body.contains(&self.must_contain) {
            return Err(format!("response does not contain '{}'", self.must_contain));
        }
        if !self.must_not_contain.is_empty() && body.contains(&self.must_not_contain) {
            return Err(format!("response contains '{}'", self.must_not_contain));
        }

        Ok(())
    }
}

/// Render an error together with its causes.
fn describe(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[async_trait]
impl Checker for HttpChecker {
    fn kind(&self) -> &'static str {
        HTTP_TYPE
    }

    async fn check(&self) -> Result<CheckResult, ProbeError> {
        let name = &self.base.name;
        let url = Url::parse(&self.base.url)
            .map_err(|e| ProbeError::config(name, format!("endpoint_url: {}", e)))?;
        let headers = self.header_map()?;
        let up_status = self.up_status()?;

        let client = Client::builder()
            .timeout(self.base.timeout_or(DEFAULT_TIMEOUT))
            .redirect(redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ProbeError::config(name, describe(&e)))?;

        let mut result = self.base.new_result();
        let (client, url, headers) = (&client, &url, &headers);
        let (times, _) = run_attempts(&self.base, move || {
            self.attempt(client, url, headers, up_status)
        })
        .await;
        result.times = times;

        Ok(conclude(result, self.base.threshold_rtt, Severity::Down))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap as AxumHeaders;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::time::Duration;

    async fn hello(headers: AxumHeaders) -> impl IntoResponse {
        let host = headers
            .get("host")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let echo = headers
            .get("x-checkup")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();
        ([("x-checkup", echo)], format!("I'm up @{}\n", host))
    }

    async fn spawn_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", get(hello));
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_http_checker_up() {
        let (endpoint, server) = spawn_server().await;
        let mut hc = HttpChecker::new("Test", endpoint.clone());
        hc.base.attempts = 2;

        let result = hc.check().await.unwrap();
        assert_eq!(result.title, "Test");
        assert_eq!(result.endpoint, endpoint);
        assert!(result.healthy, "{}", result);
        assert!(!result.down);
        assert!(!result.degraded);
        assert_eq!(result.times.len(), 2);
        let age = crate::types::timestamp() - result.timestamp;
        assert!(age < Duration::from_secs(5).as_nanos() as i64);

        server.abort();
    }

    #[tokio::test]
    async fn test_http_checker_down_criteria() {
        let (endpoint, server) = spawn_server().await;
        let mut hc = HttpChecker::new("Test", endpoint);

        hc.up_status = 201;
        assert!(hc.check().await.unwrap().down);

        hc.up_status = 200;
        hc.base.threshold_rtt = Duration::from_nanos(1);
        let result = hc.check().await.unwrap();
        assert!(result.degraded);
        assert!(!result.notice.is_empty());

        hc.base.threshold_rtt = Duration::ZERO;
        hc.must_contain = "up".into();
        assert!(!hc.check().await.unwrap().down);

        hc.must_contain = "online".into();
        let result = hc.check().await.unwrap();
        assert!(result.down);
        assert_eq!(
            result.times[0].error.as_deref(),
            Some("response does not contain 'online'")
        );

        hc.must_contain.clear();
        hc.must_not_contain = "down".into();
        assert!(!hc.check().await.unwrap().down);

        hc.must_not_contain = "I".into();
        assert!(hc.check().await.unwrap().down);

        server.abort();
    }

    #[tokio::test]
    async fn test_http_checker_headers() {
        let (endpoint, server) = spawn_server().await;
        let mut hc = HttpChecker::new("Test", endpoint);

        // Headers go on the request, not into the body.
        hc.headers
            .insert("X-Checkup".into(), vec!["Echo".into()]);
        hc.must_contain = "Echo".into();
        assert!(hc.check().await.unwrap().down);

        hc.headers.clear();
        hc.headers
            .insert("Host".into(), vec!["http.check.local".into()]);
        hc.must_contain = "@http.check.local".into();
        let result = hc.check().await.unwrap();
        assert!(result.healthy, "{}", result);

        server.abort();
    }

    #[tokio::test]
    async fn test_http_checker_server_offline() {
        let (endpoint, server) = spawn_server().await;
        server.abort();
        let _ = server.await;

        let mut hc = HttpChecker::new("Test", endpoint);
        hc.base.attempts = 3;
        let result = hc.check().await.unwrap();
        assert!(result.down);
        assert_eq!(result.times.len(), 3);
        assert!(result.times.iter().all(|a| a.failed()));
    }

    #[tokio::test]
    async fn test_http_checker_config_error() {
        let hc = HttpChecker::new("Broken", "not a url");
        assert!(matches!(hc.check().await, Err(ProbeError::Config { .. })));

        let mut hc = HttpChecker::new("Broken", "http://localhost");
        hc.headers.insert("bad header".into(), vec!["x".into()]);
        assert!(matches!(hc.check().await, Err(ProbeError::Config { .. })));
    }
}
