//! Bookkeeping for the per-spaxel batches: failure counts and cooperative cancellation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::error::{PipelineError, Result};

/// Why a single spaxel produced no value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpaxelFailure {
    /// No local maximum survived the threshold.
    AmbiguousPeak,
    /// A profile fit or resampling did not produce a finite result.
    FitFailure,
}

impl fmt::Display for SpaxelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaxelFailure::AmbiguousPeak => write!(f, "ambiguous peak"),
            SpaxelFailure::FitFailure => write!(f, "fit failure"),
        }
    }
}

/// Counts of failed spaxels in one batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchReport {
    total: usize,
    failures: BTreeMap<SpaxelFailure, usize>,
}

impl BatchReport {
    /// Empty report for a batch of `total` spaxels.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            failures: BTreeMap::new(),
        }
    }

    /// Count one failed spaxel.
    pub fn record(&mut self, failure: SpaxelFailure) {
        *self.failures.entry(failure).or_default() += 1;
    }

    /// Number of spaxels in the batch.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of failed spaxels.
    pub fn failed(&self) -> usize {
        self.failures.values().sum()
    }

    /// Number of spaxels that failed for the given reason.
    pub fn count(&self, failure: SpaxelFailure) -> usize {
        self.failures.get(&failure).copied().unwrap_or(0)
    }

    /// Failed spaxels in percent of the batch.
    pub fn failed_percent(&self) -> f64 {
        if self.total == 0 {
            0.
        } else {
            100. * self.failed() as f64 / self.total as f64
        }
    }

    /// Log the summary once at the end of a run.
    pub fn log_summary(&self, stage: &str) {
        if self.failed() == 0 {
            info!("{stage}: all {} spaxels processed.", self.total);
            return;
        }
        warn!("{stage}: {self}");
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} spaxels failed ({:.2}%)",
            self.failed(),
            self.total,
            self.failed_percent()
        )?;
        for (failure, count) in &self.failures {
            write!(f, ", {failure}: {count}")?;
        }
        Ok(())
    }
}

/// Shared flag to stop a running batch between two spaxels.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh token, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone of the token observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
