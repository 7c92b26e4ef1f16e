//! Summary statistics over a list of attempts.

use serde::Serialize;
use std::time::Duration;

use super::Attempt;

/// Basic statistics about the round trip times of a result's attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: Duration,
    pub mean: Duration,
    pub median: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl Stats {
    /// Compute statistics over `times`. Failed attempts still count with
    /// their elapsed time. The input is not reordered.
    pub fn compute(times: &[Attempt]) -> Self {
        if times.is_empty() {
            return Self::default();
        }

        let mut total: u128 = 0;
        let mut min = times[0].rtt;
        let mut max = times[0].rtt;
        for a in times {
            total += a.rtt.as_nanos();
            min = min.min(a.rtt);
            max = max.max(a.rtt);
        }

        let mut sorted: Vec<Duration> = times.iter().map(|a| a.rtt).collect();
        sorted.sort();
        let half = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            nanos((sorted[half - 1].as_nanos() + sorted[half].as_nanos()) / 2)
        } else {
            sorted[half]
        };

        Self {
            total: nanos(total),
            mean: nanos(total / times.len() as u128),
            median,
            min,
            max,
        }
    }
}

fn nanos(n: u128) -> Duration {
    Duration::from_nanos(u64::try_from(n).unwrap_or(u64::MAX))
}
