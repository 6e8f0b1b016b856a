//! The polling loop.
//!
//! Each cycle lists the watched directory once, handles every eligible file
//! to completion in listing order, then sleeps for the poll interval. What
//! "handle" means depends on the configured [`Mode`]. Failures are logged per
//! file and the file stays in place, so the next cycle retries it.

use crate::chunk::{self, is_temp};
use crate::config::{AppConfig, Mode};
use crate::error::Error;
use crate::registry::{SubfolderRecord, SubfolderRegistry};
use crate::remote::{self, RemoteStore, Session};
use crate::report::{SilentReporter, WatchReporter};
use crate::retention::RetentionSweeper;
use crate::shard::{Ownership, ShardRouter};
use crate::transfer::{Destination, TransferWorker};
use crate::utils::{Clock, SystemClock};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Active,
}

/// Cooperative stop signal shared with whoever owns the watcher.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Files that passed the filters this cycle.
    pub eligible: usize,
    pub handled: usize,
    /// Upload mode only: not a chunk, or owned by another shard.
    pub skipped: usize,
    pub failed: usize,
}

/// Size and mtime, used to notice a handled file being replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

struct Candidate {
    name: String,
    path: PathBuf,
    fingerprint: Fingerprint,
}

enum Outcome {
    /// Done. `retained` means the file is still in the directory.
    Handled { retained: bool },
    Skipped,
}

pub struct DirectoryWatcher<S: RemoteStore> {
    config: AppConfig,
    store: S,
    session: Session,
    registry: SubfolderRegistry,
    router: ShardRouter,
    name_regex: Option<Regex>,
    reporter: Box<dyn WatchReporter>,
    clock: Box<dyn Clock>,
    stop: StopHandle,
    state: WatchState,
    idle_announced: bool,
    processed: HashMap<String, Fingerprint>,
}

impl<S: RemoteStore> DirectoryWatcher<S> {
    /// Creates the watched directory if needed and logs in.
    ///
    /// An [`Error::Auth`] here means the instance cannot do anything useful.
    pub fn new(config: AppConfig, store: S) -> Result<Self, Error> {
        fs::create_dir_all(&config.watch_dir)
            .map_err(|e| Error::io_context("creating", &config.watch_dir, e))?;

        let router = ShardRouter::new(config.shard_id, config.shard_count)?;
        let name_regex = config.name_regex()?;
        let session = store.authenticate(&config.account, &config.secret)?;
        info!("Logged in as {}", session.account);

        Ok(Self {
            registry: SubfolderRegistry::new(config.subfolder_record.clone()),
            config,
            store,
            session,
            router,
            name_regex,
            reporter: Box::new(SilentReporter),
            clock: Box::new(SystemClock),
            stop: StopHandle::new(),
            state: WatchState::Idle,
            idle_announced: false,
            processed: HashMap::new(),
        })
    }

    pub fn with_reporter(mut self, reporter: Box<dyn WatchReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Polls until stopped.
    pub fn run(&mut self) -> Result<(), Error> {
        info!(
            "Watching {} in {} mode{}",
            self.config.watch_dir.display(),
            self.config.mode,
            if self.config.dry_run { " (dry run)" } else { "" }
        );
        if self.router.is_partitioned() {
            info!(
                "Uploading shard {} of {}",
                self.config.shard_id, self.config.shard_count
            );
        }

        if self.config.mode == Mode::Split {
            if let Err(err) = self.ensure_subfolder() {
                error!("Could not prepare today's remote subfolder: {}", err);
            }
        }

        while !self.should_stop() {
            if let Err(err) = self.cycle() {
                error!(
                    "Could not list {}: {}",
                    self.config.watch_dir.display(),
                    err
                );
            }
            self.pause();
        }

        info!("Stopped watching {}", self.config.watch_dir.display());
        Ok(())
    }

    /// One listing pass. Only a failure to list the directory is an error.
    pub fn cycle(&mut self) -> Result<CycleReport, Error> {
        let candidates = self.list_candidates()?;

        let present: HashSet<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        self.processed.retain(|name, _| present.contains(name.as_str()));

        let mut report = CycleReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        for candidate in candidates {
            if !self.is_eligible(&candidate.name) {
                continue;
            }
            if self.processed.get(&candidate.name) == Some(&candidate.fingerprint) {
                continue;
            }
            if !seen.insert(candidate.name.clone()) {
                continue;
            }

            report.eligible += 1;
            match self.dispatch(&candidate.name, &candidate.path) {
                Ok(Outcome::Handled { retained }) => {
                    report.handled += 1;
                    if retained {
                        self.processed
                            .insert(candidate.name, candidate.fingerprint);
                    }
                }
                Ok(Outcome::Skipped) => {
                    report.skipped += 1;
                    self.processed
                        .insert(candidate.name, candidate.fingerprint);
                }
                Err(err) => {
                    report.failed += 1;
                    error!(
                        "{} of {} failed: {}",
                        self.config.mode, candidate.name, err
                    );
                    self.reporter
                        .on_failure(&candidate.name, self.config.mode.as_str(), &err);
                }
            }
        }

        self.transition(report.eligible > 0);
        Ok(report)
    }

    /// Returns today's subfolder record, creating the remote folder and
    /// storing a new record when the stored one is absent, stale or unreadable.
    pub fn ensure_subfolder(&self) -> Result<SubfolderRecord, Error> {
        let today = self.clock.today();
        match self.registry.load() {
            Ok(Some(record)) if record.is_current(&today) => return Ok(record),
            Ok(Some(record)) => {
                info!("Subfolder record {} is stale, creating {}", record.name, today)
            }
            Ok(None) => info!("No subfolder record yet, creating {}", today),
            Err(err) => warn!("Subfolder record unreadable ({}), recreating {}", err, today),
        }

        let record = remote::create_folder(
            &self.store,
            &self.session,
            &today,
            &self.config.remote_folder_id,
        )?;
        self.registry.store(&record)?;
        info!(
            "Using remote subfolder {}/{} ({})",
            self.config.remote_folder_label(),
            record.name,
            record.folder_id
        );
        Ok(record)
    }

    fn dispatch(&self, name: &str, path: &Path) -> Result<Outcome, Error> {
        match self.config.mode {
            Mode::Split => self.handle_split(name, path),
            Mode::Upload => self.handle_upload(name, path),
            Mode::Sweep => self.handle_sweep(name),
        }
    }

    fn handle_split(&self, name: &str, path: &Path) -> Result<Outcome, Error> {
        self.ensure_subfolder()?;

        let split = chunk::split(path, self.config.chunk_size)?;
        self.reporter.on_split(name, &split);

        if split.renamed_in_place {
            return Ok(Outcome::Handled { retained: false });
        }
        if self.config.dry_run {
            info!("Dry run, keeping {}", path.display());
            return Ok(Outcome::Handled { retained: true });
        }
        if let Err(err) = fs::remove_file(path) {
            error!("Split {} but could not delete it: {}", path.display(), err);
        }
        Ok(Outcome::Handled { retained: false })
    }

    fn handle_upload(&self, name: &str, path: &Path) -> Result<Outcome, Error> {
        match self.router.owns(name) {
            Ownership::NotAChunk => {
                debug!("{} is not a chunk file, skipping", name);
                return Ok(Outcome::Skipped);
            }
            Ownership::NotOwned => {
                trace!("{} belongs to another shard", name);
                return Ok(Outcome::Skipped);
            }
            Ownership::Owned => {}
        }

        let dest = self.upload_destination();
        let receipt = TransferWorker::new(&self.store, &self.session, self.config.dry_run)
            .upload(path, &dest)?;
        self.reporter.on_upload(&receipt);
        Ok(Outcome::Handled {
            retained: self.config.dry_run,
        })
    }

    fn handle_sweep(&self, trigger: &str) -> Result<Outcome, Error> {
        debug!("Sweep triggered by {}", trigger);
        let report = RetentionSweeper::new(
            &self.store,
            &self.session,
            self.config.retention_days,
            self.config.dry_run,
        )
        .with_clock(self.clock.as_ref())
        .sweep(&self.config.remote_folder_id)?;
        self.reporter.on_sweep(&report);
        Ok(Outcome::Handled { retained: true })
    }

    /// Today's subfolder from the record, or the root folder when the
    /// record cannot be used.
    fn upload_destination(&self) -> Destination {
        let root = Destination {
            folder_id: self.config.remote_folder_id.clone(),
            folder_name: self.config.remote_folder_label().to_string(),
        };
        match self.registry.load() {
            Ok(Some(record)) if !record.folder_id.is_empty() => Destination {
                folder_name: format!("{}/{}", self.config.remote_folder_label(), record.name),
                folder_id: record.folder_id,
            },
            Ok(_) => {
                error!(
                    "No subfolder record at {}, uploading to {} instead",
                    self.registry.path().display(),
                    root.folder_name
                );
                root
            }
            Err(err) => {
                error!(
                    "Subfolder record unusable ({}), uploading to {} instead",
                    err, root.folder_name
                );
                root
            }
        }
    }

    fn is_eligible(&self, name: &str) -> bool {
        if is_temp(name) {
            return false;
        }
        if !self.config.extensions.is_empty() {
            let ext = Path::new(name).extension().and_then(|e| e.to_str());
            let allowed = ext.is_some_and(|ext| {
                self.config
                    .extensions
                    .iter()
                    .any(|want| want.trim_start_matches('.') == ext)
            });
            if !allowed {
                return false;
            }
        }
        match &self.name_regex {
            Some(re) => re.is_match(name),
            None => true,
        }
    }

    fn list_candidates(&self) -> Result<Vec<Candidate>, Error> {
        let dir = &self.config.watch_dir;
        if !dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", dir.display()),
            )));
        }

        let mut candidates = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error reading entry in {}: {}", dir.display(), err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                warn!("Skipping non UTF-8 file name {:?}", entry.file_name());
                continue;
            };
            // The file may vanish between listing and stat when another
            // instance handles it first.
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    trace!("{} disappeared: {}", name, err);
                    continue;
                }
            };
            candidates.push(Candidate {
                name: name.to_string(),
                path: entry.path().to_path_buf(),
                fingerprint: Fingerprint {
                    len: metadata.len(),
                    modified: metadata.modified().ok(),
                },
            });
        }
        Ok(candidates)
    }

    fn transition(&mut self, active: bool) {
        if active {
            self.state = WatchState::Active;
            return;
        }
        if self.state == WatchState::Active || !self.idle_announced {
            debug!("Waiting for files in {}", self.config.watch_dir.display());
            if self.config.notify_idle {
                self.reporter.on_waiting(&self.config.watch_dir);
            }
            self.idle_announced = true;
        }
        self.state = WatchState::Idle;
    }

    fn should_stop(&self) -> bool {
        if self.stop.is_stopped() {
            return true;
        }
        match &self.config.stop_file {
            Some(stop_file) if stop_file.exists() => {
                info!("Found stop file {}", stop_file.display());
                self.stop.stop();
                true
            }
            _ => false,
        }
    }

    fn pause(&self) {
        let deadline = Instant::now() + self.config.poll_interval();
        loop {
            if self.stop.is_stopped() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
