//! `ModelHandler`: applies consolidated events to the entity model.
//!
//! Directories directly under the sync root become project containers,
//! everything below them becomes folder and file leaves. Deletions tombstone
//! the whole subtree, and a later creation at a tombstoned path revives the
//! entity so its identity survives for remote reconciliation.

use crate::events::{EventHandler, FsEvent, HandlerError, ResolutionError};
use crate::hash::{ContentHash, DEFAULT_BLOCK_SIZE, hash_file};
use crate::model::{Category, Container, Leaf, LeafKind, User, UserId};
use crate::scan::{self, PathFilter};
use crate::store::EntityStore;
use crate::tree::{self, LeafParent, Node, TreeError};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn file_name(path: &Path) -> Result<String, ResolutionError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| ResolutionError::new(path, "path has no file name"))
}

fn parent_dir(path: &Path) -> Result<&Path, ResolutionError> {
    path.parent()
        .ok_or_else(|| ResolutionError::new(path, "path has no parent"))
}

/// Event handler that keeps one user's entities in step with the disk.
pub struct ModelHandler<S: EntityStore> {
    store: S,
    user: UserId,
    block_size: usize,
    ignore: PathFilter,
}

impl<S: EntityStore> ModelHandler<S> {
    pub fn new(store: S, user: UserId) -> Self {
        Self {
            store,
            user,
            block_size: DEFAULT_BLOCK_SIZE,
            ignore: scan::keep_all(),
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Paths matching `ignore` are skipped when adopting directory contents.
    pub fn with_ignore(mut self, ignore: PathFilter) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn user_id(&self) -> UserId {
        self.user
    }

    fn user(&self) -> Result<User, HandlerError> {
        Ok(self.store.user(self.user)?)
    }

    /// Hash `path`, falling back to `previous` when the file cannot be read.
    fn hash_or(&self, path: &Path, previous: Option<ContentHash>) -> Option<ContentHash> {
        match hash_file(path, self.block_size) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!("Skipping hash update: {}", e);
                previous
            }
        }
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// Record `path` as a new entity under its parent directory's entity.
    fn create(&self, user: &User, path: &Path, is_directory: bool) -> Result<Node, HandlerError> {
        let name = file_name(path)?;
        let parent = tree::resolve(&self.store, user, parent_dir(path)?)?
            .ok_or_else(|| ResolutionError::new(path, "parent directory is not tracked"))?;
        let mtime = modified_time(path);

        let created = match parent {
            Node::Root => {
                if !is_directory {
                    return Err(ResolutionError::new(
                        path,
                        "files directly under the sync root are not tracked",
                    )
                    .into());
                }
                let mut container = Container::new(user.id, name, Category::Project, None);
                container.created = true;
                container.update_time(mtime);
                Node::Container(self.store.insert_container(container)?)
            }
            Node::Container(container) => {
                let leaf = Leaf::new(user.id, container.id, None, name, LeafKind::for_directory(is_directory));
                Node::Leaf(self.insert_leaf(leaf, path, mtime)?)
            }
            Node::Leaf(folder) if folder.is_folder() => {
                let leaf = Leaf::new(
                    user.id,
                    folder.container,
                    Some(folder.id),
                    name,
                    LeafKind::for_directory(is_directory),
                );
                Node::Leaf(self.insert_leaf(leaf, path, mtime)?)
            }
            Node::Leaf(file) => return Err(TreeError::NotAFolder(file.id).into()),
        };

        if let Some(entity) = created.entity() {
            info!("Tracking new {} at {}", entity, path.display());
        }
        Ok(created)
    }

    fn insert_leaf(
        &self,
        mut leaf: Leaf,
        path: &Path,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<Leaf, HandlerError> {
        if leaf.is_file() {
            leaf.hash = self.hash_or(path, None);
        }
        leaf.created = true;
        leaf.update_time(mtime);
        Ok(self.store.insert_leaf(leaf)?)
    }

    /// Bring a live entity's time (and hash, for files) up to date.
    fn refresh(&self, node: Node, path: &Path) -> Result<(), HandlerError> {
        let mtime = modified_time(path);
        match node {
            Node::Root => {}
            Node::Container(mut container) => {
                container.update_time(mtime);
                self.store.update_container(&container)?;
            }
            Node::Leaf(mut leaf) => {
                if leaf.is_file() {
                    leaf.hash = self.hash_or(path, leaf.hash.take());
                }
                leaf.update_time(mtime);
                self.store.update_leaf(&leaf)?;
                debug!("Refreshed {} at {}", leaf.id, path.display());
            }
        }
        Ok(())
    }

    /// Clear the tombstone of `node`, which must match the kind on disk.
    fn revive(&self, node: Node, path: &Path) -> Result<(), HandlerError> {
        let mtime = modified_time(path);
        match node {
            Node::Root => {}
            Node::Container(mut container) => {
                container.deleted = false;
                container.update_time(mtime);
                self.store.update_container(&container)?;
                info!("Revived {} at {}", container.id, path.display());
            }
            Node::Leaf(mut leaf) => {
                leaf.deleted = false;
                if leaf.is_file() {
                    leaf.hash = self.hash_or(path, leaf.hash.take());
                }
                leaf.update_time(mtime);
                self.store.update_leaf(&leaf)?;
                info!("Revived {} at {}", leaf.id, path.display());
            }
        }
        Ok(())
    }

    /// Apply one observation of `path` existing on disk. Returns whether a
    /// directory entity was newly created or revived.
    fn observe(&self, user: &User, path: &Path, is_directory: bool) -> Result<bool, HandlerError> {
        let existing = tree::resolve_with_tombstones(&self.store, user, path)?;
        let kind_matches = |node: &Node| match node {
            Node::Root => true,
            Node::Container(_) => is_directory,
            Node::Leaf(leaf) => leaf.kind == LeafKind::for_directory(is_directory),
        };

        match existing {
            Some(Node::Root) => Ok(false),
            Some(node) if kind_matches(&node) => {
                if node.is_alive() {
                    self.refresh(node, path)?;
                    Ok(false)
                } else {
                    self.revive(node, path)?;
                    Ok(is_directory)
                }
            }
            Some(node) => {
                // A file replaced a directory of the same name, or vice versa
                if let Some(entity) = node.entity().filter(|_| node.is_alive()) {
                    let count = tree::tombstone_subtree(&self.store, entity)?;
                    info!("Kind changed at {}, tombstoned {} entities", path.display(), count);
                }
                self.create(user, path, is_directory)?;
                Ok(is_directory)
            }
            None => {
                self.create(user, path, is_directory)?;
                Ok(is_directory)
            }
        }
    }

    /// Track whatever already sits inside a directory that just appeared,
    /// e.g. one moved in from outside the sync root.
    fn adopt_children(&self, user: &User, dir: &Path) {
        let children = match scan::walk(dir, &*self.ignore) {
            Ok(children) => children,
            Err(e) => {
                warn!("Failed to list new directory: {}", e);
                return;
            }
        };
        for child in children {
            if let Err(e) = self.observe(user, &child.src_path, child.is_directory) {
                warn!("Failed to adopt {}: {}", child.src_path.display(), e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Moves
    // ------------------------------------------------------------------------

    /// Let a move replace whatever lives at its destination. Returns true
    /// when the move was fully absorbed by overwriting an existing file.
    fn overwrite_destination(
        &self,
        user: &User,
        source: &Node,
        dest: &Path,
    ) -> Result<bool, HandlerError> {
        let Some(existing) = tree::resolve(&self.store, user, dest)? else {
            return Ok(false);
        };
        if existing.entity() == source.entity() {
            // Case-only rename on a case-insensitive filesystem
            return Ok(false);
        }

        match (source, existing) {
            (Node::Leaf(src), Node::Leaf(mut target)) if src.is_file() && target.is_file() => {
                // File saved over another: the destination keeps its identity
                target.hash = self.hash_or(dest, target.hash.take());
                target.update_time(modified_time(dest));
                self.store.update_leaf(&target)?;
                self.store.mark_leaf_deleted(src.id)?;
                info!("{} replaced {} at {}", src.id, target.id, dest.display());
                Ok(true)
            }
            (_, existing) => {
                if let Some(entity) = existing.entity() {
                    let count = tree::tombstone_subtree(&self.store, entity)?;
                    debug!("Move overwrote {}, tombstoned {} entities", entity, count);
                }
                Ok(false)
            }
        }
    }

    /// Tombstone `source` and track `dest` afresh. Used when the move
    /// changes what kind of entity the destination calls for.
    fn recreate(
        &self,
        user: &User,
        source: &Node,
        dest: &Path,
        is_directory: bool,
    ) -> Result<(), HandlerError> {
        if let Some(entity) = source.entity() {
            tree::tombstone_subtree(&self.store, entity)?;
        }
        if !is_directory && parent_dir(dest)? == user.root_path.as_path() {
            info!("{} moved directly under the sync root and is no longer tracked", dest.display());
            return Ok(());
        }
        self.create(user, dest, is_directory)?;
        if is_directory {
            self.adopt_children(user, dest);
        }
        Ok(())
    }
}

impl<S: EntityStore> EventHandler for ModelHandler<S> {
    fn on_created(&self, event: &FsEvent) -> Result<(), HandlerError> {
        let user = self.user()?;
        if self.observe(&user, &event.src_path, event.is_directory)? {
            self.adopt_children(&user, &event.src_path);
        }
        Ok(())
    }

    fn on_modified(&self, event: &FsEvent) -> Result<(), HandlerError> {
        let user = self.user()?;
        match tree::resolve(&self.store, &user, &event.src_path)? {
            Some(node) => self.refresh(node, &event.src_path),
            None => {
                // The creation may have been coalesced away within the window
                debug!("Modified path {} is new, tracking it", event.src_path.display());
                self.create(&user, &event.src_path, event.is_directory)?;
                Ok(())
            }
        }
    }

    fn on_deleted(&self, event: &FsEvent) -> Result<(), HandlerError> {
        let user = self.user()?;
        let node = tree::resolve_with_tombstones(&self.store, &user, &event.src_path)?
            .ok_or_else(|| ResolutionError::new(&event.src_path, "path is not tracked"))?;

        let Some(entity) = node.entity() else {
            return Err(HandlerError::unsupported(event, "the sync root itself was removed"));
        };
        if !node.is_alive() {
            debug!("{} is already tombstoned", entity);
            return Ok(());
        }

        let count = tree::tombstone_subtree(&self.store, entity)?;
        info!("Deleted {} at {} ({} entities tombstoned)", entity, event.src_path.display(), count);
        Ok(())
    }

    fn on_moved(&self, event: &FsEvent) -> Result<(), HandlerError> {
        let dest = event
            .dest_path()
            .ok_or_else(|| HandlerError::unsupported(event, "move without a destination"))?;
        let user = self.user()?;

        let source = match tree::resolve(&self.store, &user, &event.src_path)? {
            Some(Node::Root) => {
                return Err(HandlerError::unsupported(event, "the sync root itself was moved"));
            }
            Some(node) => node,
            None => {
                // Moved in from an untracked name: treat as a creation
                debug!("Move source {} is not tracked", event.src_path.display());
                if self.observe(&user, dest, event.is_directory)? {
                    self.adopt_children(&user, dest);
                }
                return Ok(());
            }
        };

        let new_name = file_name(dest)?;
        let dest_parent = tree::resolve(&self.store, &user, parent_dir(dest)?)?
            .ok_or_else(|| ResolutionError::new(dest, "destination directory is not tracked"))?;

        if self.overwrite_destination(&user, &source, dest)? {
            return Ok(());
        }

        let mtime = modified_time(dest);
        if event.src_path.parent() == dest.parent() {
            match source {
                Node::Root => {}
                Node::Container(mut container) => {
                    container.update_time(mtime);
                    tree::rename_container(&self.store, &mut container, &new_name)?;
                }
                Node::Leaf(mut leaf) => {
                    leaf.update_time(mtime);
                    tree::rename_leaf(&self.store, &mut leaf, &new_name)?;
                }
            }
            info!("Renamed {} to {}", event.src_path.display(), dest.display());
            return Ok(());
        }

        match (source, dest_parent) {
            (Node::Container(mut container), Node::Root) => {
                container.update_time(mtime);
                tree::move_container(&self.store, &mut container, None, &new_name)?;
            }
            (Node::Container(mut container), Node::Container(parent)) => {
                container.update_time(mtime);
                tree::move_container(&self.store, &mut container, Some(parent.id), &new_name)?;
            }
            (Node::Leaf(mut leaf), Node::Container(parent)) => {
                leaf.update_time(mtime);
                tree::move_leaf(&self.store, &mut leaf, LeafParent::Container(parent.id), &new_name)?;
            }
            (Node::Leaf(mut leaf), Node::Leaf(folder)) => {
                leaf.update_time(mtime);
                tree::move_leaf(&self.store, &mut leaf, LeafParent::Folder(folder.id), &new_name)?;
            }
            (source, _) => {
                // Container into a folder, or a leaf up to the root
                return self.recreate(&user, &source, dest, event.is_directory);
            }
        }

        info!("Moved {} to {}", event.src_path.display(), dest.display());
        Ok(())
    }

    fn commit(&self) -> Result<(), HandlerError> {
        Ok(self.store.commit()?)
    }
}
