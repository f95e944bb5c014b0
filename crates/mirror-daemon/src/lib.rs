//! mirror-daemon library: Exposes the daemon components for testing.
//!
//! This is a thin library layer over the binary, allowing integration
//! tests to drive the watcher and store directly.

pub mod config;
pub mod ignore;
pub mod persistence;
pub mod watcher;

// Re-export key types for convenience
pub use config::{Args, Config, ConfigError};
pub use ignore::{DEFAULT_PATTERNS, IgnoreError, IgnoreRules};
pub use persistence::{JsonStore, PersistenceError, STORE_FILE, ensure_user};
pub use watcher::{FsWatcher, apply_ignore, translate};
