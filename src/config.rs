use crate::error::Error;
use config::{Config, Environment, File as ConfigFile};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_NAME: &str = "Courier";
pub const ENV_PREFIX: &str = "COURIER";

/// Name pattern applied in upload mode when none is configured.
pub const DEFAULT_UPLOAD_PATTERN: &str = r"\.tar\._\d{1,10}";
/// Extension filter applied in split mode when none is configured.
pub const DEFAULT_SPLIT_EXTENSION: &str = "tar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Split large files into numbered chunks
    Split,
    /// Upload chunk files owned by this shard
    Upload,
    /// Delete remote files past the retention window
    Sweep,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Split => "split",
            Mode::Upload => "upload",
            Mode::Sweep => "sweep",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub remote_folder_id: String,
    #[serde(default)]
    pub remote_folder_name: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default)]
    pub shard_id: u32,
    #[serde(default)]
    pub shard_count: u32,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub name_pattern: Option<String>,
    #[serde(default, deserialize_with = "comma_list")]
    pub extensions: Vec<String>,
    #[serde(default = "default_subfolder_record")]
    pub subfolder_record: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_true")]
    pub notify_idle: bool,
    #[serde(default)]
    pub stop_file: Option<PathBuf>,
    #[serde(default = "default_mirror_root")]
    pub mirror_root: PathBuf,
}

/// Accepts `["tar", "gz"]` from a file or `tar,gz` from the environment.
fn comma_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<String>),
        Joined(String),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::Joined(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect(),
    })
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("target_dir")
}

fn default_mode() -> Mode {
    Mode::Upload
}

fn default_retention_days() -> u32 {
    7
}

fn default_chunk_size() -> u64 {
    500_000_000
}

fn default_subfolder_record() -> PathBuf {
    PathBuf::from("sub_folder_info.toml")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_mirror_root() -> PathBuf {
    PathBuf::from("remote_mirror")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            secret: String::new(),
            watch_dir: default_watch_dir(),
            mode: default_mode(),
            remote_folder_id: String::new(),
            remote_folder_name: String::new(),
            retention_days: default_retention_days(),
            chunk_size: default_chunk_size(),
            shard_id: 0,
            shard_count: 0,
            dry_run: false,
            name_pattern: None,
            extensions: Vec::new(),
            subfolder_record: default_subfolder_record(),
            poll_interval_ms: default_poll_interval_ms(),
            notify_idle: true,
            stop_file: None,
            mirror_root: default_mirror_root(),
        }
    }
}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub mode: Option<Mode>,
    pub shard_id: Option<u32>,
    pub shard_count: Option<u32>,
    pub dry_run: bool,
    pub watch_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Display name of the root remote folder, falling back to its id.
    pub fn remote_folder_label(&self) -> &str {
        if self.remote_folder_name.is_empty() {
            &self.remote_folder_id
        } else {
            &self.remote_folder_name
        }
    }

    /// Fills in the filters each mode uses when none were configured.
    pub fn with_mode_defaults(mut self) -> Self {
        if self.extensions.is_empty() && self.name_pattern.is_none() {
            match self.mode {
                Mode::Split => self.extensions = vec![DEFAULT_SPLIT_EXTENSION.to_string()],
                Mode::Upload => self.name_pattern = Some(DEFAULT_UPLOAD_PATTERN.to_string()),
                Mode::Sweep => {}
            }
        }
        self
    }

    /// Checks everything the local-only commands (split, join) rely on.
    pub fn validate_local(self) -> Result<Self, Error> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be greater than 0".into()));
        }
        self.name_regex()?;
        Ok(self)
    }

    /// Full check for commands that talk to the remote store.
    pub fn validate(self) -> Result<Self, Error> {
        let config = self.validate_local()?;
        if config.remote_folder_id.trim().is_empty() {
            return Err(Error::InvalidConfig("remote_folder_id must be set".into()));
        }
        if config.shard_count > 0 && config.shard_id >= config.shard_count {
            return Err(Error::InvalidConfig(format!(
                "shard_id {} is out of range for shard_count {}",
                config.shard_id, config.shard_count
            )));
        }
        Ok(config)
    }

    pub fn name_regex(&self) -> Result<Option<Regex>, Error> {
        match self.name_pattern.as_deref() {
            None | Some("") => Ok(None),
            Some(pattern) => Regex::new(pattern).map(Some).map_err(|e| {
                Error::InvalidConfig(format!("invalid name_pattern '{}': {}", pattern, e))
            }),
        }
    }

    /// Copy safe to print or log.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.secret.is_empty() {
            copy.secret = "********".to_string();
        }
        copy
    }
}

/// Layers `Courier.toml` (or `config_file`), `COURIER_*` environment
/// variables and command line overrides, then validates the result.
pub fn load_configuration(
    config_file: Option<&str>,
    overrides: &Overrides,
) -> Result<AppConfig, Error> {
    layered(config_file, overrides)?.validate()
}

/// Like [`load_configuration`] but without the remote settings check.
pub fn load_local_configuration(
    config_file: Option<&str>,
    overrides: &Overrides,
) -> Result<AppConfig, Error> {
    layered(config_file, overrides)?.validate_local()
}

fn layered(config_file: Option<&str>, overrides: &Overrides) -> Result<AppConfig, Error> {
    let mut builder = Config::builder()
        .add_source(
            ConfigFile::with_name(config_file.unwrap_or(DEFAULT_CONFIG_NAME))
                .required(config_file.is_some()),
        )
        // Values stay strings until deserialized, so `COURIER_SECRET=007`
        // keeps its leading zeros.
        .add_source(Environment::with_prefix(ENV_PREFIX));

    if let Some(mode) = overrides.mode {
        builder = builder.set_override("mode", mode.as_str())?;
    }
    if let Some(shard_id) = overrides.shard_id {
        builder = builder.set_override("shard_id", i64::from(shard_id))?;
    }
    if let Some(shard_count) = overrides.shard_count {
        builder = builder.set_override("shard_count", i64::from(shard_count))?;
    }
    if overrides.dry_run {
        builder = builder.set_override("dry_run", true)?;
    }
    if let Some(dir) = &overrides.watch_dir {
        builder = builder.set_override("watch_dir", dir.to_string_lossy().into_owned())?;
    }

    let config = builder.build()?.try_deserialize::<AppConfig>()?;
    Ok(config.with_mode_defaults())
}
