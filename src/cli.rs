use chunk_courier::Mode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)] // requires `derive` feature
#[command(name = "chunk-courier")]
#[command(about = "Split, upload and expire backup files in a watched directory", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to an optional Courier.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// What the watcher does with files it finds
    #[arg(short = 'l', long, global = true, value_enum)]
    pub mode: Option<Mode>,

    /// This instance's shard id, in [0, shard-count)
    #[arg(short = 'u', long, global = true)]
    pub shard_id: Option<u32>,

    /// Number of cooperating upload instances; 0 disables partitioning
    #[arg(short = 's', long, global = true)]
    pub shard_count: Option<u32>,

    /// Keep local and remote files instead of deleting them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Directory to watch
    #[arg(long, global = true)]
    pub watch_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Watch the directory and handle files according to the mode
    Watch,
    /// Split one file into chunks next to it
    Split {
        /// File to split
        path: PathBuf,
    },
    /// Join chunks back into the original file
    Join {
        /// Original file name, e.g. backup.tar
        name: String,
        /// Directory holding the chunks (defaults to the watched directory)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Output path (defaults to <dir>/<name>)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run one retention sweep over the remote folder
    Sweep,
    /// Print configuration values
    PrintConfig,
}
