//! Checkup - distributed, lock-free, self-hosted health checks.
//!
//! Probes endpoints over several protocols, concludes each endpoint as
//! healthy, degraded or down, and stores, notifies and exports the results.

pub mod config;
pub mod notify;
pub mod probe;
pub mod scheduler;
pub mod storage;
pub mod types;
pub mod web;
