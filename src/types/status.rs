//! Textual status of a check.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The overall status a result reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusText {
    Healthy,
    Degraded,
    Down,
    Unknown,
}

impl StatusText {
    fn rank(self) -> u8 {
        match self {
            StatusText::Unknown => 0,
            StatusText::Healthy => 1,
            StatusText::Degraded => 2,
            StatusText::Down => 3,
        }
    }

    /// Whether `self` takes precedence over `other`:
    /// down > degraded > healthy > unknown. Never true for equal statuses.
    pub fn priority_over(self, other: StatusText) -> bool {
        self.rank() > other.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusText::Healthy => "healthy",
            StatusText::Degraded => "degraded",
            StatusText::Down => "down",
            StatusText::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StatusText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
