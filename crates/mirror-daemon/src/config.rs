//! Daemon configuration from command-line flags and environment.

use clap::Parser;
use mirror_core::{ConsolidatorConfig, DEFAULT_BLOCK_SIZE};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the state directory created inside the sync root by default.
pub const DEFAULT_DATA_DIR: &str = ".mirror";

#[derive(Parser, Debug, Clone)]
#[command(name = "mirror-daemon")]
#[command(about = "Mirror a watched directory tree into a project/file entity model")]
pub struct Args {
    /// Sync root to watch (supports ~ for home directory)
    #[arg(short, long, env = "MIRROR_ROOT")]
    pub root: Option<String>,

    /// Where the entity store is kept (defaults to <root>/.mirror)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Display name of the local user owning the sync root
    #[arg(long)]
    pub user: Option<String>,

    /// Quiet period before buffered events are applied, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub debounce_ms: u64,

    /// Read block size used when hashing files, in bytes
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Extra glob of paths to ignore (repeatable)
    #[arg(long = "ignore", value_name = "GLOB")]
    pub ignore: Vec<String>,

    /// Skip the startup rescan of the sync root
    #[arg(long)]
    pub no_scan: bool,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonical path of the sync root
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub user_name: String,
    pub consolidator: ConsolidatorConfig,
    pub block_size: usize,
    /// Ignore globs on top of the defaults
    pub ignore: Vec<String>,
    pub scan: bool,
    pub verbose: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let root_str = args.root.ok_or(ConfigError::MissingRoot)?;
        let root = expand_tilde(&root_str);

        // Canonicalize so watcher paths match: on macOS /var/folders/... is
        // really /private/var/folders/...
        let root = root
            .canonicalize()
            .map_err(|source| ConfigError::Root { path: root, source })?;
        if !root.is_dir() {
            return Err(ConfigError::RootNotADirectory(root));
        }

        if args.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }

        let data_dir = match args.data_dir {
            Some(dir) => expand_tilde(&dir),
            None => root.join(DEFAULT_DATA_DIR),
        };
        // Watcher paths are canonical, so the ignore check needs this one canonical too
        std::fs::create_dir_all(&data_dir).map_err(|source| ConfigError::DataDir {
            path: data_dir.clone(),
            source,
        })?;
        let data_dir = data_dir
            .canonicalize()
            .map_err(|source| ConfigError::DataDir { path: data_dir, source })?;

        let user_name = args.user.unwrap_or_else(default_user_name);

        Ok(Self {
            root,
            data_dir,
            user_name,
            consolidator: ConsolidatorConfig {
                delay: Duration::from_millis(args.debounce_ms),
            },
            block_size: args.block_size,
            ignore: args.ignore,
            scan: !args.no_scan,
            verbose: args.verbose,
        })
    }
}

fn default_user_name() -> String {
    dirs::home_dir()
        .and_then(|home| home.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "local".to_string())
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No sync root given: pass --root or set MIRROR_ROOT")]
    MissingRoot,

    #[error("Cannot open sync root {}: {source}", .path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot create data directory {}: {source}", .path.display())]
    DataDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Sync root {} is not a directory", .0.display())]
    RootNotADirectory(PathBuf),

    #[error("--block-size must be greater than zero")]
    ZeroBlockSize,
}
