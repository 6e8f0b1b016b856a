use crate::error::Error;
use crate::remote::{folder_files, RemoteStore, Session};
use crate::utils::{format_elapsed, format_unix, Clock, SystemClock};
use std::time::Instant;
use tracing::{error, info, warn};

const SECONDS_PER_DAY: i64 = 86_400;

/// Outcome of one sweep. `deleted` is the number of entries removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub deleted: usize,
    /// Expired entries that disappeared before we got to them.
    pub already_gone: usize,
    pub failed: usize,
    /// Entries skipped because their name could not be read.
    pub malformed: usize,
}

/// Strictly older than the window counts as expired.
pub fn is_expired(created: i64, now: i64, retention_days: u32) -> bool {
    now - created > i64::from(retention_days) * SECONDS_PER_DAY
}

pub struct RetentionSweeper<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
    session: &'a Session,
    retention_days: u32,
    dry_run: bool,
    clock: &'a dyn Clock,
}

impl<'a, S: RemoteStore + ?Sized> RetentionSweeper<'a, S> {
    pub fn new(store: &'a S, session: &'a Session, retention_days: u32, dry_run: bool) -> Self {
        Self {
            store,
            session,
            retention_days,
            dry_run,
            clock: &SystemClock,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Delete every entry directly under `folder_id` older than the window.
    ///
    /// Only listing failures abort the sweep. Individual delete failures are
    /// logged and counted, and the sweep moves on.
    pub fn sweep(&self, folder_id: &str) -> Result<SweepReport, Error> {
        let now = self.clock.unix_now();
        let start = Instant::now();
        info!(
            "Checking {} for files older than {} days",
            folder_id, self.retention_days
        );

        let mut entries = folder_files(self.store, self.session, folder_id)?;
        entries.sort_by_key(|e| e.created);

        let mut report = SweepReport::default();
        for entry in &entries {
            report.examined += 1;

            let Some(name) = entry.name.display_name() else {
                warn!(
                    "Skipping remote entry {} with unreadable name {:?}",
                    entry.id, entry.name
                );
                report.malformed += 1;
                continue;
            };

            if !is_expired(entry.created, now, self.retention_days) {
                continue;
            }
            report.expired += 1;
            info!(
                "{} created {} is older than {} days",
                name,
                format_unix(entry.created),
                self.retention_days
            );

            if self.dry_run {
                info!("Dry run, not deleting {} ({})", name, entry.id);
                continue;
            }

            match self.store.delete(self.session, &entry.id) {
                Ok(()) => {
                    report.deleted += 1;
                    info!("Deleted {} ({}) from remote", name, entry.id);
                }
                Err(Error::NotFound(_)) => {
                    report.already_gone += 1;
                    warn!("{} ({}) was already gone from remote", name, entry.id);
                }
                Err(err) => {
                    report.failed += 1;
                    error!("Failed to delete {} ({}) from remote: {}", name, entry.id, err);
                }
            }
        }

        info!(
            "Sweep of {} done in {}: {} examined, {} expired, {} deleted, {} failed",
            folder_id,
            format_elapsed(start.elapsed()),
            report.examined,
            report.expired,
            report.deleted,
            report.failed
        );
        Ok(report)
    }
}
