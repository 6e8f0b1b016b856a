use crate::chunk::Split;
use crate::error::Error;
use crate::remote::Receipt;
use crate::retention::SweepReport;
use std::path::Path;

/// Trait for reporting watcher activity.
///
/// The CLI prints these to the console; tests record them. All methods have
/// default no-op implementations.
pub trait WatchReporter: Send + Sync {
    /// Called once each time the watcher goes idle.
    fn on_waiting(&self, _dir: &Path) {}
    fn on_split(&self, _source: &str, _split: &Split) {}
    fn on_upload(&self, _receipt: &Receipt) {}
    fn on_sweep(&self, _report: &SweepReport) {}
    fn on_failure(&self, _file: &str, _operation: &str, _error: &Error) {}
}

/// No-op reporter for silent operation.
pub struct SilentReporter;

impl WatchReporter for SilentReporter {}
