//! Progress reporting for calibration runs.
//!
//! The driver emits a [`ProgressRecord`] every time the all-time best improves.
//! Records are diagnostics only; observers cannot influence the search.

use log::info;
use serde::{Deserialize, Serialize};

/// Snapshot taken when a new all-time best candidate is found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Generation in which the candidate was evaluated
    pub generation: usize,
    /// Mean error of the candidate
    pub best_error: f64,
    /// Candidate parameter vector
    pub params: Vec<f64>,
}

/// Receives improvement notifications from a [`super::CalibrationDriver`].
pub trait ProgressObserver {
    fn on_improvement(&mut self, record: &ProgressRecord);
}

/// Logs every improvement at `info` level, one line per record.
#[derive(Debug, Clone, Default)]
pub struct LogProgress {
    /// Unit appended to the error ("m" or "px")
    pub unit: &'static str,
}

impl LogProgress {
    pub fn new(unit: &'static str) -> Self {
        Self { unit }
    }
}

impl ProgressObserver for LogProgress {
    fn on_improvement(&mut self, record: &ProgressRecord) {
        let params: Vec<String> = record.params.iter().map(|p| format!("{p:.6}")).collect();
        info!(
            "{} {:.6}{} [{}]",
            record.generation,
            record.best_error,
            self.unit,
            params.join(", ")
        );
    }
}

impl<F> ProgressObserver for F
where
    F: FnMut(&ProgressRecord),
{
    fn on_improvement(&mut self, record: &ProgressRecord) {
        self(record)
    }
}
