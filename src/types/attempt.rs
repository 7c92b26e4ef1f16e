//! A single timed attempt against an endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::duration::{self, format_duration};

/// One attempt to communicate with the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    #[serde(with = "duration::nanos")]
    pub rtt: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Attempt {
    pub fn new(rtt: Duration) -> Self {
        Self { rtt, error: None }
    }

    pub fn failed_with(rtt: Duration, error: impl Into<String>) -> Self {
        Self {
            rtt,
            error: Some(error.into()),
        }
    }

    /// Whether this attempt recorded a (non-empty) error.
    pub fn failed(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error.as_deref() {
            Some(err) if !err.is_empty() => write!(f, "{} ({})", format_duration(self.rtt), err),
            _ => write!(f, "{}", format_duration(self.rtt)),
        }
    }
}
