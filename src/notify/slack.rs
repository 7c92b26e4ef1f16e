//! Slack incoming-webhook notifier.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{post_json, send_unhealthy, Notifier, NotifyError};
use crate::types::CheckResult;

pub const SLACK_TYPE: &str = "slack";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackNotifier {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    pub webhook: String,

    #[serde(skip)]
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook: impl Into<String>) -> Self {
        Self {
            webhook: webhook.into(),
            ..Default::default()
        }
    }

    fn payload(&self, result: &CheckResult) -> serde_json::Value {
        json!({
            "text": result.title,
            "username": self.username,
            "channel": self.channel,
            "attachments": [{
                "color": "danger",
                "fields": [
                    {"title": result.title, "value": result.endpoint},
                    {"title": "Status", "value": result.status().as_str().to_uppercase()},
                ],
            }],
        })
    }

    /// Post one result to the webhook.
    pub async fn send(&self, result: &CheckResult) -> Result<(), NotifyError> {
        post_json(SLACK_TYPE, &self.client, &self.webhook, &self.payload(result)).await
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn kind(&self) -> &'static str {
        SLACK_TYPE
    }

    async fn notify(&self, results: &[CheckResult]) -> Result<(), NotifyError> {
        send_unhealthy(results, |r| self.send(r)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_slack_sends_only_unhealthy() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .match_body(Matcher::PartialJson(json!({
                "text": "API",
                "channel": "#ops",
            })))
            .with_status(200)
            .with_body("ok")
            .expect(1)
            .create_async()
            .await;

        let mut notifier = SlackNotifier::new(format!("{}/hook", server.url()));
        notifier.channel = "#ops".into();

        let results = vec![
            CheckResult {
                healthy: true,
                ..CheckResult::new("Site", "https://example.com")
            },
            CheckResult {
                down: true,
                ..CheckResult::new("API", "https://api.example.com")
            },
        ];
        notifier.notify(&results).await.unwrap();
        hook.assert_async().await;
    }

    #[test]
    fn test_slack_payload_status() {
        let notifier = SlackNotifier::new("http://unused");
        let payload = notifier.payload(&CheckResult {
            degraded: true,
            ..CheckResult::new("API", "https://api.example.com")
        });
        assert_eq!(payload["attachments"][0]["fields"][1]["value"], "DEGRADED");
        assert_eq!(payload["attachments"][0]["fields"][0]["value"], "https://api.example.com");
    }

    #[tokio::test]
    async fn test_slack_rejected_webhook() {
        let mut server = mockito::Server::new_async().await;
        let _hook = server
            .mock("POST", "/hook")
            .with_status(404)
            .with_body("no_service")
            .create_async()
            .await;

        let notifier = SlackNotifier::new(format!("{}/hook", server.url()));
        let results = vec![CheckResult {
            down: true,
            ..CheckResult::new("API", "https://api.example.com")
        }];
        let err = notifier.notify(&results).await.unwrap_err();
        assert!(err.to_string().contains("404"), "{}", err);
    }
}
