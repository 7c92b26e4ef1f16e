//! Discord webhook notifier.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{post_json, send_unhealthy, Notifier, NotifyError};
use crate::types::CheckResult;

pub const DISCORD_TYPE: &str = "discord";

const EMBED_COLOR: u32 = 0xc21408;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordNotifier {
    pub webhook: String,

    #[serde(skip)]
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    username: &'a str,
    embeds: Vec<Embed<'a>>,
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    color: u32,
    fields: Vec<Field<'a>>,
}

#[derive(Debug, Serialize)]
struct Field<'a> {
    name: &'a str,
    value: String,
    inline: bool,
}

impl<'a> Field<'a> {
    fn inline(name: &'a str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            inline: true,
        }
    }
}

impl DiscordNotifier {
    pub fn new(webhook: impl Into<String>) -> Self {
        Self {
            webhook: webhook.into(),
            ..Default::default()
        }
    }

    fn payload(result: &CheckResult) -> Payload<'_> {
        let status = result.status().as_str().to_uppercase();
        Payload {
            username: "Checkup",
            embeds: vec![Embed {
                color: EMBED_COLOR,
                fields: vec![
                    Field::inline("Name", result.title.as_str()),
                    Field::inline("Status", format!("**{}**", status)),
                    Field::inline("Endpoint", result.endpoint.as_str()),
                ],
            }],
        }
    }

    /// Post one result to the webhook.
    pub async fn send(&self, result: &CheckResult) -> Result<(), NotifyError> {
        post_json(DISCORD_TYPE, &self.client, &self.webhook, &Self::payload(result)).await
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn kind(&self) -> &'static str {
        DISCORD_TYPE
    }

    async fn notify(&self, results: &[CheckResult]) -> Result<(), NotifyError> {
        send_unhealthy(results, |r| self.send(r)).await
    }
}
