use crate::error::Error;
use crate::remote::{Receipt, RemoteStore, Session};
use crate::utils::{format_elapsed, format_mb};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info};

/// Where an upload lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub folder_id: String,
    /// Human readable path used in log lines, e.g. `backups/20261016`.
    pub folder_name: String,
}

pub struct TransferWorker<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
    session: &'a Session,
    dry_run: bool,
}

impl<'a, S: RemoteStore + ?Sized> TransferWorker<'a, S> {
    pub fn new(store: &'a S, session: &'a Session, dry_run: bool) -> Self {
        Self {
            store,
            session,
            dry_run,
        }
    }

    /// Upload `local_path` and, unless dry-run, delete it afterwards.
    ///
    /// Remote failures are returned as-is and the local file stays put so a
    /// later cycle can retry. A failed local delete is only logged.
    pub fn upload(&self, local_path: &Path, dest: &Destination) -> Result<Receipt, Error> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Parse(format!("unusable file name: {}", local_path.display())))?;
        let size = fs::metadata(local_path)
            .map_err(|e| Error::io_context("reading metadata of", local_path, e))?
            .len();

        info!(
            "Uploading {} to {}, size {} MB",
            file_name,
            dest.folder_name,
            format_mb(size)
        );
        let start = Instant::now();

        let receipt = self
            .store
            .upload(self.session, local_path, &dest.folder_id, file_name)?;

        info!(
            "Uploaded {} to {} in {}",
            file_name,
            dest.folder_name,
            format_elapsed(start.elapsed())
        );
        debug!("Receipt: {:?}", receipt);

        if self.dry_run {
            info!("Dry run, keeping {}", local_path.display());
        } else if let Err(err) = fs::remove_file(local_path) {
            error!(
                "Uploaded {} but could not delete it locally: {}",
                local_path.display(),
                err
            );
        }

        Ok(receipt)
    }
}
