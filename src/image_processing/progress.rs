//! Unit-based progress accounting for the super-resolution batch.
//!
//! One unit is one inference call. A file normally costs one unit; a file with
//! an alpha channel costs two, which is only known once it has been decoded, so
//! the total can grow while the batch runs.
//!
//! `ProgressCounter` is plain mutable state owned by the batch loop. It is not
//! synchronized: callers that process files in parallel must wrap it in their
//! own lock.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressCounter {
    total_units: u64,
    completed_units: u64,
    units_per_file: u64,
    last_reported: f64,
}

impl ProgressCounter {
    pub fn new(total_files: u64, units_per_file: u64) -> Self {
        Self {
            total_units: total_files * units_per_file,
            completed_units: 0,
            units_per_file,
            last_reported: 0.0,
        }
    }

    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    pub fn completed_units(&self) -> u64 {
        self.completed_units
    }

    /// Units a file costs before its channel layout is known
    pub fn units_per_file(&self) -> u64 {
        self.units_per_file
    }

    /// Raise the total when a file turns out to need extra passes
    pub fn grow(&mut self, units: u64) {
        self.total_units += units;
    }

    /// Complete one unit and return the percentage to report
    pub fn advance(&mut self) -> f64 {
        self.completed_units += 1;
        self.report()
    }

    /// Rounded to one decimal place, never below what was already reported
    pub fn report(&mut self) -> f64 {
        let raw = if self.total_units == 0 {
            100.0
        } else {
            let pct = self.completed_units as f64 / self.total_units as f64 * 100.0;
            (pct * 10.0).round() / 10.0
        };

        let pct = raw.max(self.last_reported).min(100.0);
        self.last_reported = pct;
        pct
    }

    pub fn last_reported(&self) -> f64 {
        self.last_reported
    }

    pub fn is_complete(&self) -> bool {
        self.completed_units >= self.total_units
    }
}

/// Events emitted by the batch loop, in order
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started {
        total_files: usize,
        total_units: u64,
    },
    Progress {
        percentage: f64,
        completed: u64,
        total: u64,
    },
    /// Non-fatal notice about a file (name collision, channel conversion)
    Notice {
        path: PathBuf,
        message: String,
    },
    FileProcessed {
        input_path: PathBuf,
        output_path: PathBuf,
        elapsed_ms: u128,
    },
    FileSkipped {
        input_path: PathBuf,
        reason: String,
    },
    FileFailed {
        input_path: PathBuf,
        error: String,
    },
    Finished {
        processed: usize,
        skipped: usize,
        failed: usize,
        percentage: f64,
    },
}

impl BatchEvent {
    pub(crate) fn progress(counter: &ProgressCounter, percentage: f64) -> Self {
        Self::Progress {
            percentage,
            completed: counter.completed_units(),
            total: counter.total_units(),
        }
    }
}

/// Receives batch events; closures taking `&BatchEvent` work directly.
pub trait ProgressObserver {
    fn on_event(&mut self, event: &BatchEvent);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&BatchEvent),
{
    fn on_event(&mut self, event: &BatchEvent) {
        self(event)
    }
}
