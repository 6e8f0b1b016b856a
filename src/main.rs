mod cli;
mod console;
mod logging;

use anyhow::{bail, Context};
use chunk_courier::chunk;
use chunk_courier::config::{self, AppConfig, Overrides};
use chunk_courier::remote::{MirrorStore, RemoteStore};
use chunk_courier::retention::RetentionSweeper;
use chunk_courier::{DirectoryWatcher, Error};
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use console::ConsoleReporter;
use dotenv::dotenv;
use std::fs;
use std::process;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();
    let overrides = Overrides {
        mode: args.mode,
        shard_id: args.shard_id,
        shard_count: args.shard_count,
        dry_run: args.dry_run,
        watch_dir: args.watch_dir.clone(),
    };

    // Only watch and sweep reach the remote store.
    let local_only = !matches!(args.command, Some(Commands::Watch | Commands::Sweep));
    let loaded = if local_only {
        config::load_local_configuration(args.config.as_deref(), &overrides)
    } else {
        config::load_configuration(args.config.as_deref(), &overrides)
    };
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    match args.command {
        Some(Commands::Watch) => run_watch(config),
        Some(Commands::Split { path }) => run_split(&config, &path),
        Some(Commands::Join { name, dir, output }) => {
            let dir = dir.unwrap_or_else(|| config.watch_dir.clone());
            let output = output.unwrap_or_else(|| dir.join(&name));
            let joined = chunk::reassemble(&dir, &name, &output)
                .with_context(|| format!("joining chunks of {}", name))?;
            println!(
                "{} chunks, {} bytes, blake3 {}",
                joined.chunks,
                joined.bytes,
                joined.digest.to_hex()
            );
            Ok(())
        }
        Some(Commands::Sweep) => run_sweep(&config),
        Some(Commands::PrintConfig) => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    }
}

fn open_store(config: &AppConfig) -> anyhow::Result<MirrorStore> {
    MirrorStore::open(&config.mirror_root)
        .with_context(|| format!("opening remote store at {}", config.mirror_root.display()))
}

fn run_watch(config: AppConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let mut watcher = match DirectoryWatcher::new(config, store) {
        Ok(watcher) => watcher.with_reporter(Box::new(ConsoleReporter)),
        Err(Error::Auth(msg)) => {
            error!("Login failed, nothing can be uploaded: {}", msg);
            bail!("authentication failed: {}", msg);
        }
        Err(err) => return Err(err).context("starting watcher"),
    };
    watcher.run()?;
    Ok(())
}

fn run_split(config: &AppConfig, path: &std::path::Path) -> anyhow::Result<()> {
    let split = chunk::split(path, config.chunk_size)
        .with_context(|| format!("splitting {}", path.display()))?;
    if !split.renamed_in_place {
        if config.dry_run {
            info!("Dry run, keeping {}", path.display());
        } else {
            fs::remove_file(path).with_context(|| format!("removing {}", path.display()))?;
        }
    }
    for piece in &split.chunks {
        println!("{} {}", piece.path.display(), piece.size_bytes);
    }
    if let Some(digest) = split.digest {
        println!("blake3 {}", digest.to_hex());
    }
    Ok(())
}

fn run_sweep(config: &AppConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let session = store
        .authenticate(&config.account, &config.secret)
        .context("logging in")?;
    let report = RetentionSweeper::new(&store, &session, config.retention_days, config.dry_run)
        .sweep(&config.remote_folder_id)
        .context("sweeping remote folder")?;
    println!(
        "{} examined, {} expired, {} deleted, {} failed",
        report.examined, report.expired, report.deleted, report.failed
    );
    Ok(())
}
