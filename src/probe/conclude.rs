//! Turning raw attempts into a verdict.

use std::time::Duration;

use crate::types::{format_duration, CheckResult};

/// How a failed attempt is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    /// Any failed attempt marks the endpoint down.
    #[default]
    Down,
    /// Failed attempts only mark the endpoint degraded.
    Degraded,
}

/// Conclude a result from its attempts.
///
/// Any failed attempt short-circuits to down (or degraded, per `severity`).
/// Otherwise a median RTT above `threshold_rtt` is degraded, and anything
/// else is healthy.
pub fn conclude(mut result: CheckResult, threshold_rtt: Duration, severity: Severity) -> CheckResult {
    result.threshold_rtt = threshold_rtt;

    if let Some(failed) = result.times.iter().find(|a| a.failed()) {
        match severity {
            Severity::Down => result.down = true,
            Severity::Degraded => {
                result.notice = failed.error.clone().unwrap_or_default();
                result.degraded = true;
            }
        }
        return result;
    }

    conclude_latency(result)
}

/// The degraded/healthy half of [`conclude`], for probes that run their own
/// down checks first. Uses the threshold already set on `result`.
pub fn conclude_latency(mut result: CheckResult) -> CheckResult {
    if !result.threshold_rtt.is_zero() {
        let stats = result.compute_stats();
        if stats.median > result.threshold_rtt {
            result.notice = format!(
                "median round trip time exceeded threshold ({})",
                format_duration(result.threshold_rtt)
            );
            result.degraded = true;
            return result;
        }
    }

    result.healthy = true;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attempt, StatusText};

    fn result_with(times: Vec<Attempt>) -> CheckResult {
        CheckResult {
            times,
            ..CheckResult::new("test", "localhost")
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_any_failure_is_down() {
        let r = conclude(
            result_with(vec![
                Attempt::new(ms(1)),
                Attempt::failed_with(ms(1), "connection refused"),
                Attempt::new(ms(1)),
            ]),
            ms(500),
            Severity::Down,
        );
        assert!(r.down);
        assert!(!r.degraded);
        assert!(!r.healthy);
        assert!(r.notice.is_empty());
        assert_eq!(r.status(), StatusText::Down);
    }

    #[test]
    fn test_failure_beats_slow_median() {
        let r = conclude(
            result_with(vec![
                Attempt::new(ms(900)),
                Attempt::failed_with(ms(900), "reset"),
            ]),
            ms(1),
            Severity::Down,
        );
        assert!(r.down);
        assert!(!r.degraded);
    }

    #[test]
    fn test_no_threshold_is_healthy() {
        let r = conclude(
            result_with(vec![Attempt::new(ms(5000))]),
            Duration::ZERO,
            Severity::Down,
        );
        assert!(r.healthy);
        assert!(!r.down && !r.degraded);
    }

    #[test]
    fn test_slow_median_is_degraded() {
        let r = conclude(
            result_with(vec![
                Attempt::new(ms(10)),
                Attempt::new(ms(300)),
                Attempt::new(ms(400)),
            ]),
            ms(200),
            Severity::Down,
        );
        assert!(r.degraded);
        assert!(!r.healthy && !r.down);
        assert_eq!(r.notice, "median round trip time exceeded threshold (200ms)");
        assert_eq!(r.threshold_rtt, ms(200));
    }

    #[test]
    fn test_median_under_threshold_is_healthy() {
        let r = conclude(
            result_with(vec![
                Attempt::new(ms(10)),
                Attempt::new(ms(20)),
                Attempt::new(ms(900)),
            ]),
            ms(100),
            Severity::Down,
        );
        assert!(r.healthy);
    }

    #[test]
    fn test_degraded_severity() {
        let r = conclude(
            result_with(vec![Attempt::failed_with(ms(1), "exit status 1")]),
            Duration::ZERO,
            Severity::Degraded,
        );
        assert!(r.degraded);
        assert!(!r.down);
        assert_eq!(r.notice, "exit status 1");
    }
}
