use chunk_courier::chunk::Split;
use chunk_courier::remote::Receipt;
use chunk_courier::retention::SweepReport;
use chunk_courier::utils::format_mb;
use chunk_courier::{Error, WatchReporter};
use colored::*;
use std::path::Path;

/// Console reporter for the watch command.
pub struct ConsoleReporter;

impl WatchReporter for ConsoleReporter {
    fn on_waiting(&self, dir: &Path) {
        eprintln!("  {} Waiting for files in {}", "…".cyan(), dir.display());
    }

    fn on_split(&self, source: &str, split: &Split) {
        let verb = if split.renamed_in_place { "Renamed" } else { "Split" };
        eprintln!(
            "  {} {} {} into {} chunk(s)",
            "✓".green(),
            verb,
            source,
            format!("{}", split.chunks.len()).green()
        );
    }

    fn on_upload(&self, receipt: &Receipt) {
        eprintln!(
            "  {} Uploaded {} ({} MB)",
            "✓".green(),
            receipt.name,
            format_mb(receipt.size_bytes).green()
        );
    }

    fn on_sweep(&self, report: &SweepReport) {
        eprintln!(
            "  {} Sweep: {} examined, {} deleted, {} failed",
            "✓".green(),
            report.examined,
            format!("{}", report.deleted).red(),
            report.failed
        );
    }

    fn on_failure(&self, file: &str, operation: &str, error: &Error) {
        eprintln!("  {} {} {}: {}", "✗".red(), operation, file, error);
    }
}
