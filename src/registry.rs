use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The dated remote subfolder chunks of one day are uploaded into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubfolderRecord {
    pub name: String,
    pub folder_id: String,
}

impl SubfolderRecord {
    /// Valid for `today` (`YYYYMMDD`) and pointing at an actual folder.
    pub fn is_current(&self, today: &str) -> bool {
        self.name == today && !self.folder_id.is_empty()
    }
}

/// Single-record file store for the active [`SubfolderRecord`].
/// Each store replaces the whole file.
#[derive(Debug, Clone)]
pub struct SubfolderRegistry {
    path: PathBuf,
}

impl SubfolderRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been stored yet.
    pub fn load(&self) -> Result<Option<SubfolderRecord>, Error> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::io_context("reading", &self.path, err)),
        };
        let record: SubfolderRecord = toml::from_str(&raw)
            .map_err(|e| Error::Parse(format!("{}: {}", self.path.display(), e)))?;
        debug!("Loaded subfolder record {:?}", record);
        Ok(Some(record))
    }

    pub fn store(&self, record: &SubfolderRecord) -> Result<(), Error> {
        let raw = toml::to_string(record)
            .map_err(|e| Error::Parse(format!("serializing subfolder record: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io_context("creating", parent, e))?;
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".temp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, raw).map_err(|e| Error::io_context("writing", &temp, e))?;
        fs::rename(&temp, &self.path).map_err(|e| Error::io_context("replacing", &self.path, e))?;
        debug!("Stored subfolder record {:?}", record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str, id: &str) -> SubfolderRecord {
        SubfolderRecord {
            name: name.to_string(),
            folder_id: id.to_string(),
        }
    }

    #[test]
    fn test_load_absent() {
        let dir = TempDir::new().unwrap();
        let registry = SubfolderRegistry::new(dir.path().join("sub.toml"));
        assert_eq!(registry.load().unwrap(), None);
    }

    #[test]
    fn test_store_overwrites() {
        let dir = TempDir::new().unwrap();
        let registry = SubfolderRegistry::new(dir.path().join("state/sub.toml"));
        registry.store(&record("20261015", "aaa")).unwrap();
        registry.store(&record("20261016", "bbb")).unwrap();
        assert_eq!(registry.load().unwrap(), Some(record("20261016", "bbb")));
    }

    #[test]
    fn test_malformed_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub.toml");
        fs::write(&path, "name = ").unwrap();
        let registry = SubfolderRegistry::new(path);
        assert!(matches!(registry.load(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_is_current() {
        assert!(record("20261016", "x").is_current("20261016"));
        assert!(!record("20261015", "x").is_current("20261016"));
        assert!(!record("20261016", "").is_current("20261016"));
    }
}
