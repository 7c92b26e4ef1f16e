//! Core data types shared by probes, the orchestrator and storage.

mod attempt;
pub mod duration;
mod errors;
mod result;
mod stats;
mod status;

pub use attempt::*;
pub use duration::{format_duration, parse_duration, DurationError};
pub use errors::*;
pub use result::*;
pub use stats::*;
pub use status::*;

use chrono::Utc;

/// The current UTC time in nanoseconds since the Unix epoch.
pub fn timestamp() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
