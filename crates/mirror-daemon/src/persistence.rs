//! JSON-file persistence for the entity store.
//!
//! Mutations only mark the store dirty. The whole arena is written to
//! `<data_dir>/entities.json` on [`EntityStore::commit`], once per batch of
//! events, via a temp file and a rename so a crash never leaves a torn file
//! behind. A failed write leaves the store dirty and is retried by the next
//! commit.

use mirror_core::store::Result as StoreResult;
use mirror_core::{
    Container, ContainerId, EntityStore, InMemoryStore, Leaf, LeafId, Snapshot, StoreError, User,
    UserId,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, error, info};

/// File name of the store inside the data directory.
pub const STORE_FILE: &str = "entities.json";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupted store file: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// [`InMemoryStore`] mirrored to a JSON file.
pub struct JsonStore {
    inner: InMemoryStore,
    path: PathBuf,
    /// Set by every successful mutation, cleared by a successful commit
    dirty: AtomicBool,
    /// Serializes snapshot writes
    save_lock: Mutex<()>,
}

impl JsonStore {
    /// Load the store kept in `data_dir`, or start empty when there is none.
    pub fn open(data_dir: &Path) -> Result<Self, PersistenceError> {
        let path = data_dir.join(STORE_FILE);

        let inner = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(io_error(&path))?;
            let snapshot: Snapshot = serde_json::from_str(&contents)?;
            info!(
                "Loaded {} containers and {} leaves from {}",
                snapshot.containers.len(),
                snapshot.leaves.len(),
                path.display()
            );
            InMemoryStore::from_snapshot(snapshot)
        } else {
            info!("No store at {}, starting empty", path.display());
            InMemoryStore::new()
        };

        Ok(Self {
            inner,
            path,
            dirty: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current contents to disk.
    pub fn save(&self) -> Result<(), PersistenceError> {
        let _saving = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        let contents = serde_json::to_string_pretty(&self.inner.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(io_error(&self.path))?;

        debug!("Saved store to {}", self.path.display());
        Ok(())
    }

    /// Whether there are mutations not yet written to disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn touch<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        let value = result?;
        self.dirty.store(true, Ordering::SeqCst);
        Ok(value)
    }
}

impl Drop for JsonStore {
    fn drop(&mut self) {
        if self.is_dirty() {
            if let Err(e) = self.save() {
                error!("Failed to save store on close: {}", e);
            }
        }
    }
}

impl EntityStore for JsonStore {
    fn insert_user(&self, user: User) -> StoreResult<User> {
        self.touch(self.inner.insert_user(user))
    }

    fn user(&self, id: UserId) -> StoreResult<User> {
        self.inner.user(id)
    }

    fn find_user_by_root(&self, root: &Path) -> StoreResult<Option<User>> {
        self.inner.find_user_by_root(root)
    }

    fn insert_container(&self, container: Container) -> StoreResult<Container> {
        self.touch(self.inner.insert_container(container))
    }

    fn container(&self, id: ContainerId) -> StoreResult<Container> {
        self.inner.container(id)
    }

    fn update_container(&self, container: &Container) -> StoreResult<()> {
        self.touch(self.inner.update_container(container))
    }

    fn mark_container_deleted(&self, id: ContainerId) -> StoreResult<()> {
        self.touch(self.inner.mark_container_deleted(id))
    }

    fn child_containers(&self, owner: UserId, parent: Option<ContainerId>) -> StoreResult<Vec<Container>> {
        self.inner.child_containers(owner, parent)
    }

    fn containers_of_user(&self, owner: UserId) -> StoreResult<Vec<Container>> {
        self.inner.containers_of_user(owner)
    }

    fn insert_leaf(&self, leaf: Leaf) -> StoreResult<Leaf> {
        self.touch(self.inner.insert_leaf(leaf))
    }

    fn leaf(&self, id: LeafId) -> StoreResult<Leaf> {
        self.inner.leaf(id)
    }

    fn update_leaf(&self, leaf: &Leaf) -> StoreResult<()> {
        self.touch(self.inner.update_leaf(leaf))
    }

    fn mark_leaf_deleted(&self, id: LeafId) -> StoreResult<()> {
        self.touch(self.inner.mark_leaf_deleted(id))
    }

    fn child_leaves(&self, container: ContainerId, parent: Option<LeafId>) -> StoreResult<Vec<Leaf>> {
        self.inner.child_leaves(container, parent)
    }

    fn leaves_of_container(&self, container: ContainerId) -> StoreResult<Vec<Leaf>> {
        self.inner.leaves_of_container(container)
    }

    fn commit(&self) -> StoreResult<()> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.save().map_err(|e| {
            self.dirty.store(true, Ordering::SeqCst);
            StoreError::Backend(e.to_string())
        })
    }
}

/// The user owning `root`, registered on first use.
pub fn ensure_user<S: EntityStore + ?Sized>(store: &S, name: &str, root: &Path) -> StoreResult<User> {
    if let Some(user) = store.find_user_by_root(root)? {
        return Ok(user);
    }
    let user = store.insert_user(User::new(name, root))?;
    store.commit()?;
    info!("Registered {} ({}) for {}", user.display_name, user.id, root.display());
    Ok(user)
}
