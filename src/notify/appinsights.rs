//! Azure Application Insights exporter: one availability event per result.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{post_json, Exporter, NotifyError};
use crate::types::{format_duration, CheckResult};

pub const APPINSIGHTS_TYPE: &str = "appinsights";

const DEFAULT_ENDPOINT: &str = "https://dc.services.visualstudio.com/v2/track";
const DEFAULT_TEST_LOCATION: &str = "Checkup Exporter";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppInsightsExporter {
    pub instrumentation_key: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub test_name: String,

    /// Run location reported with each event.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub test_location: String,

    /// Added as custom properties to every event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Ingestion endpoint override.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,

    #[serde(skip)]
    client: reqwest::Client,
}

/// `d.hh:mm:ss.fffffff`, the duration format of the ingestion API.
fn timespan(d: Duration) -> String {
    let secs = d.as_secs();
    format!(
        "{}.{:02}:{:02}:{:02}.{:07}",
        secs / 86_400,
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60,
        d.subsec_nanos() / 100
    )
}

/// "Passed", or the attempts and notice for an unhealthy result.
fn message(result: &CheckResult) -> String {
    if !result.degraded && !result.down {
        return "Passed".to_string();
    }
    let rtts: Vec<String> = result.times.iter().map(|a| format_duration(a.rtt)).collect();
    let mut message = format!(
        "Number of attempts = {} ({})",
        result.times.len(),
        rtts.join(" ")
    );
    if !result.notice.is_empty() {
        message.push_str(" - ");
        message.push_str(&result.notice);
    }
    message
}

impl AppInsightsExporter {
    pub fn new(instrumentation_key: impl Into<String>) -> Self {
        Self {
            instrumentation_key: instrumentation_key.into(),
            ..Default::default()
        }
    }

    fn location(&self) -> &str {
        if self.test_location.is_empty() {
            DEFAULT_TEST_LOCATION
        } else {
            &self.test_location
        }
    }

    fn envelope(&self, result: &CheckResult) -> serde_json::Value {
        let key = self.instrumentation_key.replace('-', "");
        json!({
            "name": format!("Microsoft.ApplicationInsights.{}.Availability", key),
            "time": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            "iKey": self.instrumentation_key,
            "data": {
                "baseType": "AvailabilityData",
                "baseData": {
                    "ver": 2,
                    "id": uuid::Uuid::new_v4().to_string(),
                    "name": result.title,
                    "duration": timespan(result.compute_stats().mean),
                    "success": result.healthy,
                    "runLocation": self.location(),
                    "message": message(result),
                    "properties": self.tags,
                },
            },
        })
    }
}

#[async_trait]
impl Exporter for AppInsightsExporter {
    fn kind(&self) -> &'static str {
        APPINSIGHTS_TYPE
    }

    async fn export(&self, results: &[CheckResult]) -> Result<(), NotifyError> {
        if results.is_empty() {
            return Ok(());
        }
        let envelopes: Vec<_> = results.iter().map(|r| self.envelope(r)).collect();
        let endpoint = if self.endpoint.is_empty() {
            DEFAULT_ENDPOINT
        } else {
            &self.endpoint
        };
        post_json(APPINSIGHTS_TYPE, &self.client, endpoint, &envelopes).await
    }
}
