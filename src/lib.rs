pub mod chunk;
pub mod config;
pub mod error;
pub mod registry;
pub mod remote;
pub mod report;
pub mod retention;
pub mod shard;
pub mod transfer;
pub mod utils;
pub mod watcher;

pub use config::{AppConfig, Mode};
pub use error::Error;
pub use report::{SilentReporter, WatchReporter};
pub use watcher::{DirectoryWatcher, StopHandle, WatchState};
