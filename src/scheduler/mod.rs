//! Scheduler module: runs every checker with bounded concurrency, then
//! hands the results to notifiers, exporters and storage.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;

use crate::notify::{Exporter, Notifier};
use crate::probe::{Checker, ProbeError};
use crate::storage::{Storage, StorageError};
use crate::types::{CheckResult, Errors};

/// Concurrency limit used when none is configured.
pub const DEFAULT_CONCURRENT_CHECKS: usize = 5;

#[derive(Error, Debug)]
pub enum CheckupError {
    #[error("invalid concurrent_checks {0}: must be 0 (default) or greater")]
    Concurrency(i64),
    /// One or more checkers could not run. `results` holds every slot, with
    /// empty results where a checker failed.
    #[error("{errors}")]
    Checks {
        results: Vec<CheckResult>,
        errors: Errors,
    },
    #[error("no storage mechanism defined")]
    NoStorage,
    #[error("invalid check interval {0:?}")]
    Interval(Duration),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The orchestrator: a set of checkers and where their results go.
#[derive(Clone, Default)]
pub struct Checkup {
    pub checkers: Vec<Arc<dyn Checker>>,

    /// Checks allowed in flight at once. Zero means
    /// [`DEFAULT_CONCURRENT_CHECKS`]; negative is invalid.
    pub concurrent_checks: i64,

    /// When set, every result of a run carries this timestamp.
    pub timestamp: Option<DateTime<Utc>>,

    pub storage: Option<Arc<dyn Storage>>,
    pub notifiers: Vec<Arc<dyn Notifier>>,
    pub exporters: Vec<Arc<dyn Exporter>>,
}

impl Checkup {
    fn concurrency(&self) -> Result<usize, CheckupError> {
        match self.concurrent_checks {
            0 => Ok(DEFAULT_CONCURRENT_CHECKS),
            n if n < 0 => Err(CheckupError::Concurrency(n)),
            n => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
        }
    }

    /// Run every checker and return their results in checker order.
    ///
    /// If any checker returns a configuration error the partial results come
    /// back inside [`CheckupError::Checks`] and nothing is notified or
    /// exported. Notifier and exporter failures are logged only.
    pub async fn check(&self) -> Result<Vec<CheckResult>, CheckupError> {
        let limit = self.concurrency()?;
        let semaphore = Arc::new(Semaphore::new(limit.min(Semaphore::MAX_PERMITS)));

        let tasks: Vec<JoinHandle<Result<CheckResult, ProbeError>>> = self
            .checkers
            .iter()
            .map(|checker| {
                let checker = checker.clone();
                let semaphore = semaphore.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    checker.check().await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        let mut errors = Errors::new();
        for (i, task) in tasks.into_iter().enumerate() {
            match task.await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(err)) => {
                    errors.push(err);
                    results.push(CheckResult::default());
                }
                Err(join) => {
                    errors.push(ProbeError::Task {
                        name: format!("checker {}", i),
                        reason: join.to_string(),
                    });
                    results.push(CheckResult::default());
                }
            }
        }

        if let Some(forced) = self.timestamp {
            let nanos = forced.timestamp_nanos_opt().unwrap_or_default();
            for result in &mut results {
                result.timestamp = nanos;
            }
        }

        if !errors.is_empty() {
            return Err(CheckupError::Checks { results, errors });
        }

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&results).await {
                tracing::error!("Notifier {}: {}", notifier.kind(), e);
            }
        }
        for exporter in &self.exporters {
            if let Err(e) = exporter.export(&results).await {
                tracing::error!("Exporter {}: {}", exporter.kind(), e);
            }
        }

        Ok(results)
    }

    /// Store `results`, then run the storage's expiry sweep if it has one.
    pub async fn store(&self, results: &[CheckResult]) -> Result<(), CheckupError> {
        let storage = self.storage.as_ref().ok_or(CheckupError::NoStorage)?;
        storage.store(results).await?;
        if let Some(maintainer) = storage.maintainer() {
            maintainer.maintain().await?;
        }
        Ok(())
    }

    /// Run the checks and store the results.
    pub async fn check_and_store(&self) -> Result<Vec<CheckResult>, CheckupError> {
        if self.storage.is_none() {
            return Err(CheckupError::NoStorage);
        }
        let results = self.check().await?;
        self.store(&results).await?;
        Ok(results)
    }

    /// Call [`check_and_store`](Self::check_and_store) every `interval` in
    /// the background until the returned handle is stopped.
    ///
    /// Each run is its own task, so a run slower than `interval` overlaps
    /// the next one. Errors are logged.
    pub fn check_and_store_every(
        self: Arc<Self>,
        interval: Duration,
    ) -> Result<PeriodicRun, CheckupError> {
        if interval.is_zero() {
            return Err(CheckupError::Interval(interval));
        }

        let (stop, mut stop_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {
                        let checkup = self.clone();
                        tokio::spawn(async move {
                            match checkup.check_and_store().await {
                                Ok(results) => tracing::debug!("Stored {} results", results.len()),
                                Err(e) => tracing::error!("Error performing checks: {}", e),
                            }
                        });
                    }
                }
            }
        });

        Ok(PeriodicRun { stop, handle })
    }
}

/// Handle to a periodic run started by [`Checkup::check_and_store_every`].
pub struct PeriodicRun {
    stop: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicRun {
    /// Stop scheduling new runs. Runs already started finish on their own.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}
