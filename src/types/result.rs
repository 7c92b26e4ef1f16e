//! The verdict of one probe for one run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::duration::{self, format_duration};
use super::{timestamp, Attempt, Stats, StatusText};

/// Result of a health check against one endpoint.
///
/// Under correct operation at most one of `healthy`, `degraded` and `down`
/// is set; none set means the result was never concluded. [`status`]
/// reduces any combination to a single [`StatusText`].
///
/// [`status`]: CheckResult::status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Display name of the checked endpoint, unique within a run.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    /// The address, URL or command that was actually probed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,

    /// When the check occurred, UTC nanoseconds since the epoch.
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub timestamp: i64,

    /// Every attempt, in the order they were made.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub times: Vec<Attempt>,

    /// Median RTT above this is degraded; zero disables the check.
    #[serde(
        rename = "threshold",
        default,
        with = "duration::nanos",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub threshold_rtt: Duration,

    #[serde(default, skip_serializing_if = "is_false")]
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub down: bool,

    /// Why the result is not healthy, e.g. a slow median.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notice: String,

    /// Operator annotation shown on the status page.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

impl CheckResult {
    /// A fresh, unconcluded result stamped with the current time.
    pub fn new(title: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            endpoint: endpoint.into(),
            timestamp: timestamp(),
            ..Default::default()
        }
    }

    pub fn compute_stats(&self) -> Stats {
        Stats::compute(&self.times)
    }

    /// The single status this result reduces to, resolving multiple set
    /// flags by precedence.
    pub fn status(&self) -> StatusText {
        let mut status = StatusText::Unknown;
        for (flag, candidate) in [
            (self.healthy, StatusText::Healthy),
            (self.degraded, StatusText::Degraded),
            (self.down, StatusText::Down),
        ] {
            if flag && candidate.priority_over(status) {
                status = candidate;
            }
        }
        status
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.compute_stats();
        let all: Vec<String> = self.times.iter().map(|a| a.to_string()).collect();

        writeln!(f, "== {} - {}", self.title, self.endpoint)?;
        writeln!(f, "  Threshold: {}", format_duration(self.threshold_rtt))?;
        writeln!(f, "        Max: {}", format_duration(stats.max))?;
        writeln!(f, "        Min: {}", format_duration(stats.min))?;
        writeln!(f, "     Median: {}", format_duration(stats.median))?;
        writeln!(f, "       Mean: {}", format_duration(stats.mean))?;
        writeln!(f, "        All: [{}]", all.join(" "))?;
        if !self.notice.is_empty() {
            writeln!(f, "     Notice: {}", self.notice)?;
        }
        if !self.message.is_empty() {
            writeln!(f, "    Message: {}", self.message)?;
        }
        writeln!(f, " Assessment: {}", self.status())
    }
}
