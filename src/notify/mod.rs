//! Notifiers (chat alerts for unhealthy results) and exporters (telemetry
//! for every result).

mod appinsights;
mod discord;
mod slack;

pub use appinsights::*;
pub use discord::*;
pub use slack::*;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::types::{CheckResult, Errors};

/// Timeout for a single webhook or telemetry request.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("{service}: request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service}: unexpected status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("{0}")]
    Multiple(Errors),
}

/// Alerts about a run's results.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn notify(&self, results: &[CheckResult]) -> Result<(), NotifyError>;
}

/// Ships every result of a run to an external system.
#[async_trait]
pub trait Exporter: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn export(&self, results: &[CheckResult]) -> Result<(), NotifyError>;
}

/// Call `send` once per unhealthy result, collecting every failure.
pub(crate) async fn send_unhealthy<'a, F, Fut>(
    results: &'a [CheckResult],
    mut send: F,
) -> Result<(), NotifyError>
where
    F: FnMut(&'a CheckResult) -> Fut,
    Fut: Future<Output = Result<(), NotifyError>>,
{
    let mut errs = Errors::new();
    for result in results.iter().filter(|r| !r.healthy) {
        if let Err(err) = send(result).await {
            errs.push(err);
        }
    }
    errs.into_result().map_err(NotifyError::Multiple)
}

/// POST `body` as JSON and require a 2xx answer.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    service: &'static str,
    client: &reqwest::Client,
    url: &str,
    body: &T,
) -> Result<(), NotifyError> {
    let resp = client
        .post(url)
        .timeout(SEND_TIMEOUT)
        .json(body)
        .send()
        .await
        .map_err(|source| NotifyError::Http { service, source })?;

    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    tracing::debug!(service, %status, body = %body, "notification rejected");
    Err(NotifyError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}

/// A configured notifier of any supported type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotifierConfig {
    Slack(SlackNotifier),
    Discord(DiscordNotifier),
}

impl NotifierConfig {
    /// Decode a notifier, dispatching on `type` (or the older `name`).
    pub fn from_value(raw: serde_json::Value) -> Result<Self, serde_json::Error> {
        use serde::de::Error;

        let kind = raw
            .get("type")
            .or_else(|| raw.get("name"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            SLACK_TYPE => serde_json::from_value(raw).map(NotifierConfig::Slack),
            DISCORD_TYPE => serde_json::from_value(raw).map(NotifierConfig::Discord),
            "" => Err(serde_json::Error::custom("notifier is missing a type")),
            other => Err(serde_json::Error::custom(format!(
                "{}: unknown notifier type",
                other
            ))),
        }
    }

    pub fn build(&self) -> Arc<dyn Notifier> {
        match self {
            NotifierConfig::Slack(n) => Arc::new(n.clone()),
            NotifierConfig::Discord(n) => Arc::new(n.clone()),
        }
    }
}

impl<'de> Deserialize<'de> for NotifierConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        NotifierConfig::from_value(raw).map_err(serde::de::Error::custom)
    }
}

/// A configured exporter of any supported type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExporterConfig {
    Appinsights(AppInsightsExporter),
}

impl ExporterConfig {
    pub fn from_value(raw: serde_json::Value) -> Result<Self, serde_json::Error> {
        use serde::de::Error;

        let kind = raw
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            APPINSIGHTS_TYPE => serde_json::from_value(raw).map(ExporterConfig::Appinsights),
            "" => Err(serde_json::Error::custom("exporter is missing a type")),
            other => Err(serde_json::Error::custom(format!(
                "{}: unknown exporter type",
                other
            ))),
        }
    }

    pub fn build(&self) -> Arc<dyn Exporter> {
        match self {
            ExporterConfig::Appinsights(e) => Arc::new(e.clone()),
        }
    }
}

impl<'de> Deserialize<'de> for ExporterConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        ExporterConfig::from_value(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_registry() {
        let cfg = NotifierConfig::from_value(serde_json::json!({
            "type": "slack",
            "webhook": "https://hooks.slack.com/services/x",
            "channel": "#ops",
        }))
        .unwrap();
        assert_eq!(cfg.build().kind(), "slack");
        assert_eq!(serde_json::to_value(&cfg).unwrap()["type"], "slack");

        // Older configs name the notifier instead of typing it.
        let cfg = NotifierConfig::from_value(serde_json::json!({
            "name": "discord",
            "webhook": "https://discord.com/api/webhooks/x",
        }))
        .unwrap();
        assert!(matches!(cfg, NotifierConfig::Discord(_)));

        let err = NotifierConfig::from_value(serde_json::json!({"type": "pager"})).unwrap_err();
        assert!(err.to_string().contains("unknown notifier type"));
    }

    #[test]
    fn test_exporter_registry() {
        let cfg = ExporterConfig::from_value(serde_json::json!({
            "type": "appinsights",
            "instrumentation_key": "00000000-0000-0000-0000-000000000000",
        }))
        .unwrap();
        assert_eq!(cfg.build().kind(), "appinsights");
        assert!(ExporterConfig::from_value(serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_send_unhealthy_collects_errors() {
        let results = vec![
            CheckResult {
                healthy: true,
                ..CheckResult::new("a", "a")
            },
            CheckResult {
                down: true,
                ..CheckResult::new("b", "b")
            },
            CheckResult {
                degraded: true,
                ..CheckResult::new("c", "c")
            },
        ];

        let mut sent = Vec::new();
        let err = send_unhealthy(&results, |r| {
            sent.push(r.title.clone());
            async move {
                Err(NotifyError::Status {
                    service: "test",
                    status: 500,
                    body: r.title.clone(),
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(sent, vec!["b".to_string(), "c".to_string()]);
        match err {
            NotifyError::Multiple(errs) => assert_eq!(errs.len(), 2),
            other => panic!("expected aggregated error, got {}", other),
        }
    }
}
