//! Rescan of a sync root, used at startup and after a directory appears with
//! contents the watcher never reported.

use crate::events::FsEvent;
use crate::model::User;
use crate::store::{EntityStore, StoreError};
use crate::tree::{self, TreeError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Predicate deciding whether a path is excluded from the model.
pub type PathFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// A filter that keeps every path.
pub fn keep_all() -> PathFilter {
    Arc::new(|_: &Path| false)
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to list {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn sorted_entries(dir: &Path) -> Result<Vec<(PathBuf, bool)>, ScanError> {
    let io_err = |source: io::Error| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let file_type = entry.file_type().map_err(io_err)?;
        // Symlinks are not followed
        if file_type.is_symlink() {
            continue;
        }
        entries.push((entry.path(), file_type.is_dir()));
    }
    entries.sort();
    Ok(entries)
}

/// `created` events for everything beneath `dir`, parents before children,
/// siblings sorted by name.
pub fn walk(dir: &Path, ignore: &dyn Fn(&Path) -> bool) -> Result<Vec<FsEvent>, ScanError> {
    let mut events = Vec::new();
    walk_into(dir, ignore, &mut events)?;
    Ok(events)
}

fn walk_into(
    dir: &Path,
    ignore: &dyn Fn(&Path) -> bool,
    out: &mut Vec<FsEvent>,
) -> Result<(), ScanError> {
    for (path, is_dir) in sorted_entries(dir)? {
        if ignore(&path) {
            continue;
        }
        out.push(FsEvent::created(&path, is_dir));
        if is_dir {
            walk_into(&path, ignore, out)?;
        }
    }
    Ok(())
}

/// Events that bring the model of `user` back in line with the disk.
///
/// Live entities whose derived path no longer exists yield `deleted`
/// events. Everything on disk yields a `created` event, which the model
/// handler treats as a refresh for entities it already tracks. Plain files
/// directly under the root are skipped since no container can hold them.
pub fn rescan_events<S: EntityStore + ?Sized>(
    store: &S,
    user: &User,
    ignore: &dyn Fn(&Path) -> bool,
) -> Result<Vec<FsEvent>, ScanError> {
    let mut events = Vec::new();

    for container in store.containers_of_user(user.id)? {
        if container.is_alive() {
            let path = tree::container_path(store, container.id)?;
            if !path.exists() {
                events.push(FsEvent::deleted(path, true));
            }
        }
        for leaf in store.leaves_of_container(container.id)? {
            if !leaf.is_alive() {
                continue;
            }
            let path = tree::leaf_path(store, leaf.id)?;
            if !path.exists() {
                events.push(FsEvent::deleted(path, leaf.is_folder()));
            }
        }
    }
    let missing = events.len();

    for event in walk(&user.root_path, ignore)? {
        if !event.is_directory && event.src_path.parent() == Some(user.root_path.as_path()) {
            debug!(path = %event.src_path.display(), "Skipping file at sync root");
            continue;
        }
        events.push(event);
    }

    debug!(
        missing,
        present = events.len() - missing,
        root = %user.root_path.display(),
        "Rescanned sync root"
    );
    Ok(events)
}
