//! Exec probe: runs a local program and inspects its output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{conclude, run_attempts, with_timeout, Checker, ProbeBase, ProbeError, Severity};
use crate::types::CheckResult;

pub const EXEC_TYPE: &str = "exec";

/// Per-attempt timeout when none is configured.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `command` with `arguments` once per attempt. A non-zero exit or a
/// failed content check fails the attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecChecker {
    #[serde(flatten)]
    pub base: ProbeBase,

    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub must_contain: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub must_not_contain: String,

    /// `error` (default) marks failures down; `warn` or `warning` only
    /// degrades.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raise: String,
}

impl ExecChecker {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            base: ProbeBase::new(name, ""),
            command: command.into(),
            ..Default::default()
        }
    }

    fn severity(&self) -> Severity {
        match self.raise.as_str() {
            "warn" | "warning" => Severity::Degraded,
            _ => Severity::Down,
        }
    }

    async fn run(&self) -> Result<(), String> {
        let output = Command::new(&self.command)
            .args(&self.arguments)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failure(&e.to_string(), ""))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(failure(&output.status.to_string(), &combined));
        }

        self.check_down(&combined)
    }

    /// Checks whether the output means the endpoint is down.
    fn check_down(&self, body: &str) -> Result<(), String> {
        if !self.must_contain.is_empty() && !body.contains(&self.must_contain) {
            return Err(format!("response does not contain '{}'", self.must_contain));
        }
        if !self.must_not_contain.is_empty() && body.contains(&self.must_not_contain) {
            return Err(format!("response contains '{}'", self.must_not_contain));
        }
        Ok(())
    }
}

fn failure(err: &str, output: &str) -> String {
    let output = if output.trim().is_empty() { "empty" } else { output };
    format!("Error: {}\nOutput: {}\n", err, output)
}

#[async_trait]
impl Checker for ExecChecker {
    fn kind(&self) -> &'static str {
        EXEC_TYPE
    }

    async fn check(&self) -> Result<CheckResult, ProbeError> {
        if self.command.is_empty() {
            return Err(ProbeError::config(&self.base.name, "command is required"));
        }

        let timeout = self.base.timeout_or(EXEC_TIMEOUT);
        let mut result = CheckResult::new(&self.base.name, &self.command);
        let (times, _) = run_attempts(&self.base, move || with_timeout(timeout, self.run())).await;
        result.times = times;

        Ok(conclude(result, self.base.threshold_rtt, self.severity()))
    }
}
