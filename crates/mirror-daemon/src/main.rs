//! mirror-daemon: Keeps a project/file entity model in step with a watched directory.
//!
//! Raw notifications are filtered, debounced and coalesced by the core's
//! consolidator, then applied to a JSON-backed entity store.

use anyhow::Result;
use clap::Parser;
use mirror_core::{EventConsolidator, ModelHandler, rescan_events};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mirror_daemon::{Args, Config, FsWatcher, IgnoreRules, JsonStore, ensure_user};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,mirror_daemon=debug,mirror_core=debug"
    } else {
        "info,mirror_daemon=info,mirror_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_args(args)?;

    info!("Starting mirror-daemon");
    info!("Sync root: {:?}", config.root);
    info!("Data directory: {:?}", config.data_dir);
    info!("Debounce: {:?}", config.consolidator.delay);

    let store = Arc::new(JsonStore::open(&config.data_dir)?);
    let user = ensure_user(&*store, &config.user_name, &config.root)?;
    let rules = IgnoreRules::new(&config.root, &config.data_dir, &config.ignore)?;

    let handler = ModelHandler::new(Arc::clone(&store), user.id)
        .with_block_size(config.block_size)
        .with_ignore(rules.to_filter());
    let consolidator = EventConsolidator::new(handler, config.consolidator.clone())?;

    // Start watching before the rescan so nothing slips between the two
    let sink = consolidator.clone();
    let watcher = FsWatcher::start(rules.clone(), move |event| sink.submit(event))?;
    info!("File watcher started");

    if config.scan {
        let events = rescan_events(&*store, &user, &|path: &Path| rules.is_ignored(path))?;
        info!("Startup rescan queued {} event(s)", events.len());
        for event in events {
            consolidator.submit(event);
        }
    }

    info!("Daemon running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    drop(watcher);
    let report = tokio::task::spawn_blocking(move || consolidator.shutdown()).await?;
    info!(
        "Final flush: {} applied, {} unresolved, {} failed",
        report.dispatched, report.unresolved, report.failed
    );

    info!("Shutting down");
    Ok(())
}
