//! Ignore rules applied to raw notifications before they reach the model.
//!
//! Globs are matched against every component of the path relative to the
//! sync root and against the relative path as a whole, so `*.tmp` drops
//! `a/b/c.tmp` and `build` drops everything inside any `build` directory.
//! The daemon's own data directory is always ignored.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use mirror_core::PathFilter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Editor swap files, office lock files and OS metadata.
pub const DEFAULT_PATTERNS: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "*.swp",
    "*.tmp",
    "~$*",
    ".~lock.*",
    ".#*",
];

#[derive(Debug, Error)]
pub enum IgnoreError {
    #[error("Invalid ignore pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

#[derive(Debug, Clone)]
pub struct IgnoreRules {
    root: PathBuf,
    data_dir: PathBuf,
    globs: GlobSet,
}

impl IgnoreRules {
    /// Defaults plus `extra` patterns.
    pub fn new(root: &Path, data_dir: &Path, extra: &[String]) -> Result<Self, IgnoreError> {
        let mut builder = GlobSetBuilder::new();
        let patterns = DEFAULT_PATTERNS.iter().copied().chain(extra.iter().map(String::as_str));
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| IgnoreError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            builder.add(glob);
        }
        let globs = builder.build().map_err(|source| IgnoreError::Pattern {
            pattern: "<set>".to_string(),
            source,
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
            globs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether events for `path` should be dropped. Paths outside the root
    /// are always dropped; the root itself never is.
    pub fn is_ignored(&self, path: &Path) -> bool {
        if path.starts_with(&self.data_dir) {
            return true;
        }
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        self.globs.is_match(relative)
            || relative
                .components()
                .any(|component| self.globs.is_match(component.as_os_str()))
    }

    /// Share the rules as a predicate for the core.
    pub fn to_filter(&self) -> PathFilter {
        let rules = self.clone();
        Arc::new(move |path: &Path| rules.is_ignored(path))
    }
}
