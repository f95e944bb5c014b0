//! EntityStore trait abstraction over the persistence engine.
//!
//! The core only needs create/read/update/tombstone by id plus parent/child
//! traversal. Implementations:
//! - `InMemoryStore` - Arena addressed by id, with an explicit parent index
//! - `JsonStore` (in mirror-daemon) - `InMemoryStore` persisted to a JSON file
//!
//! Implementations must be `Send + Sync`: the store is called both from the
//! thread that receives raw notifications and from the debounce timer task.

use crate::model::{Container, ContainerId, Leaf, LeafId, User, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Container not found: {0}")]
    ContainerNotFound(ContainerId),

    #[error("Leaf not found: {0}")]
    LeafNotFound(LeafId),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence contract the entity model is maintained through.
///
/// Inserts ignore the id carried by the entity and assign a fresh one.
/// Child listings include tombstoned entities and are ordered by id.
pub trait EntityStore: Send + Sync {
    fn insert_user(&self, user: User) -> Result<User>;

    fn user(&self, id: UserId) -> Result<User>;

    fn find_user_by_root(&self, root: &Path) -> Result<Option<User>>;

    fn insert_container(&self, container: Container) -> Result<Container>;

    fn container(&self, id: ContainerId) -> Result<Container>;

    fn update_container(&self, container: &Container) -> Result<()>;

    /// Tombstone a container. Children are left untouched.
    fn mark_container_deleted(&self, id: ContainerId) -> Result<()>;

    /// Direct children of `parent`, or the top-level containers of `owner`.
    fn child_containers(&self, owner: UserId, parent: Option<ContainerId>) -> Result<Vec<Container>>;

    /// Every container owned by `owner`, at any depth.
    fn containers_of_user(&self, owner: UserId) -> Result<Vec<Container>>;

    fn insert_leaf(&self, leaf: Leaf) -> Result<Leaf>;

    fn leaf(&self, id: LeafId) -> Result<Leaf>;

    fn update_leaf(&self, leaf: &Leaf) -> Result<()>;

    /// Tombstone a leaf. Children are left untouched.
    fn mark_leaf_deleted(&self, id: LeafId) -> Result<()>;

    /// Direct children of folder `parent`, or the top-level leaves of `container`.
    fn child_leaves(&self, container: ContainerId, parent: Option<LeafId>) -> Result<Vec<Leaf>>;

    /// Every leaf owned by `container`, at any depth.
    fn leaves_of_container(&self, container: ContainerId) -> Result<Vec<Leaf>>;

    /// Make the mutations applied so far durable. Called once per batch of
    /// events; stores without a backing medium have nothing to do.
    fn commit(&self) -> Result<()> {
        Ok(())
    }
}

/// Serializable image of an [`InMemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub containers: Vec<Container>,
    pub leaves: Vec<Leaf>,
    pub next_id: u64,
}

#[derive(Default)]
struct Arena {
    users: BTreeMap<UserId, User>,
    containers: BTreeMap<ContainerId, Container>,
    leaves: BTreeMap<LeafId, Leaf>,
    /// (owner, parent) -> child containers
    container_index: HashMap<(UserId, Option<ContainerId>), BTreeSet<ContainerId>>,
    /// (container, parent) -> child leaves
    leaf_index: HashMap<(ContainerId, Option<LeafId>), BTreeSet<LeafId>>,
    next_id: u64,
}

impl Arena {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn index_container(&mut self, container: &Container) {
        self.container_index
            .entry((container.owner, container.parent))
            .or_default()
            .insert(container.id);
    }

    fn unindex_container(&mut self, container: &Container) {
        if let Some(children) = self
            .container_index
            .get_mut(&(container.owner, container.parent))
        {
            children.remove(&container.id);
        }
    }

    fn index_leaf(&mut self, leaf: &Leaf) {
        self.leaf_index
            .entry((leaf.container, leaf.parent))
            .or_default()
            .insert(leaf.id);
    }

    fn unindex_leaf(&mut self, leaf: &Leaf) {
        if let Some(children) = self.leaf_index.get_mut(&(leaf.container, leaf.parent)) {
            children.remove(&leaf.id);
        }
    }
}

/// In-memory entity store.
///
/// Thread-safe: one `RwLock` guards the whole arena, so every operation is
/// atomic with respect to the others.
#[derive(Default)]
pub struct InMemoryStore {
    arena: RwLock<Arena>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store (and its parent index) from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut arena = Arena {
            next_id: snapshot.next_id,
            ..Arena::default()
        };
        for user in snapshot.users {
            arena.next_id = arena.next_id.max(user.id.0);
            arena.users.insert(user.id, user);
        }
        for container in snapshot.containers {
            arena.next_id = arena.next_id.max(container.id.0);
            arena.index_container(&container);
            arena.containers.insert(container.id, container);
        }
        for leaf in snapshot.leaves {
            arena.next_id = arena.next_id.max(leaf.id.0);
            arena.index_leaf(&leaf);
            arena.leaves.insert(leaf.id, leaf);
        }
        Self {
            arena: RwLock::new(arena),
        }
    }

    /// Copy the current contents into a serializable snapshot.
    pub fn snapshot(&self) -> Snapshot {
        let arena = self.read();
        Snapshot {
            users: arena.users.values().cloned().collect(),
            containers: arena.containers.values().cloned().collect(),
            leaves: arena.leaves.values().cloned().collect(),
            next_id: arena.next_id,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl EntityStore for InMemoryStore {
    fn insert_user(&self, mut user: User) -> Result<User> {
        let mut arena = self.write();
        user.id = UserId(arena.allocate());
        arena.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn user(&self, id: UserId) -> Result<User> {
        self.read()
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::UserNotFound(id))
    }

    fn find_user_by_root(&self, root: &Path) -> Result<Option<User>> {
        Ok(self
            .read()
            .users
            .values()
            .find(|u| u.root_path == root)
            .cloned())
    }

    fn insert_container(&self, mut container: Container) -> Result<Container> {
        let mut arena = self.write();
        if !arena.users.contains_key(&container.owner) {
            return Err(StoreError::UserNotFound(container.owner));
        }
        if let Some(parent) = container.parent {
            if !arena.containers.contains_key(&parent) {
                return Err(StoreError::ContainerNotFound(parent));
            }
        }
        container.id = ContainerId(arena.allocate());
        arena.index_container(&container);
        arena.containers.insert(container.id, container.clone());
        Ok(container)
    }

    fn container(&self, id: ContainerId) -> Result<Container> {
        self.read()
            .containers
            .get(&id)
            .cloned()
            .ok_or(StoreError::ContainerNotFound(id))
    }

    fn update_container(&self, container: &Container) -> Result<()> {
        let mut arena = self.write();
        let previous = arena
            .containers
            .get(&container.id)
            .cloned()
            .ok_or(StoreError::ContainerNotFound(container.id))?;
        if let Some(parent) = container.parent {
            if !arena.containers.contains_key(&parent) {
                return Err(StoreError::ContainerNotFound(parent));
            }
        }
        arena.unindex_container(&previous);
        arena.index_container(container);
        arena.containers.insert(container.id, container.clone());
        Ok(())
    }

    fn mark_container_deleted(&self, id: ContainerId) -> Result<()> {
        let mut arena = self.write();
        let container = arena
            .containers
            .get_mut(&id)
            .ok_or(StoreError::ContainerNotFound(id))?;
        container.deleted = true;
        Ok(())
    }

    fn child_containers(&self, owner: UserId, parent: Option<ContainerId>) -> Result<Vec<Container>> {
        let arena = self.read();
        Ok(arena
            .container_index
            .get(&(owner, parent))
            .into_iter()
            .flatten()
            .filter_map(|id| arena.containers.get(id).cloned())
            .collect())
    }

    fn containers_of_user(&self, owner: UserId) -> Result<Vec<Container>> {
        Ok(self
            .read()
            .containers
            .values()
            .filter(|c| c.owner == owner)
            .cloned()
            .collect())
    }

    fn insert_leaf(&self, mut leaf: Leaf) -> Result<Leaf> {
        let mut arena = self.write();
        if !arena.containers.contains_key(&leaf.container) {
            return Err(StoreError::ContainerNotFound(leaf.container));
        }
        if let Some(parent) = leaf.parent {
            if !arena.leaves.contains_key(&parent) {
                return Err(StoreError::LeafNotFound(parent));
            }
        }
        leaf.id = LeafId(arena.allocate());
        arena.index_leaf(&leaf);
        arena.leaves.insert(leaf.id, leaf.clone());
        Ok(leaf)
    }

    fn leaf(&self, id: LeafId) -> Result<Leaf> {
        self.read()
            .leaves
            .get(&id)
            .cloned()
            .ok_or(StoreError::LeafNotFound(id))
    }

    fn update_leaf(&self, leaf: &Leaf) -> Result<()> {
        let mut arena = self.write();
        let previous = arena
            .leaves
            .get(&leaf.id)
            .cloned()
            .ok_or(StoreError::LeafNotFound(leaf.id))?;
        if !arena.containers.contains_key(&leaf.container) {
            return Err(StoreError::ContainerNotFound(leaf.container));
        }
        if let Some(parent) = leaf.parent {
            if !arena.leaves.contains_key(&parent) {
                return Err(StoreError::LeafNotFound(parent));
            }
        }
        arena.unindex_leaf(&previous);
        arena.index_leaf(leaf);
        arena.leaves.insert(leaf.id, leaf.clone());
        Ok(())
    }

    fn mark_leaf_deleted(&self, id: LeafId) -> Result<()> {
        let mut arena = self.write();
        let leaf = arena.leaves.get_mut(&id).ok_or(StoreError::LeafNotFound(id))?;
        leaf.deleted = true;
        Ok(())
    }

    fn child_leaves(&self, container: ContainerId, parent: Option<LeafId>) -> Result<Vec<Leaf>> {
        let arena = self.read();
        Ok(arena
            .leaf_index
            .get(&(container, parent))
            .into_iter()
            .flatten()
            .filter_map(|id| arena.leaves.get(id).cloned())
            .collect())
    }

    fn leaves_of_container(&self, container: ContainerId) -> Result<Vec<Leaf>> {
        Ok(self
            .read()
            .leaves
            .values()
            .filter(|l| l.container == container)
            .cloned()
            .collect())
    }
}

// Implement EntityStore for Arc<T> where T: EntityStore
// This allows sharing one store between the handler and the daemon
impl<T: EntityStore + ?Sized> EntityStore for std::sync::Arc<T> {
    fn insert_user(&self, user: User) -> Result<User> {
        (**self).insert_user(user)
    }

    fn user(&self, id: UserId) -> Result<User> {
        (**self).user(id)
    }

    fn find_user_by_root(&self, root: &Path) -> Result<Option<User>> {
        (**self).find_user_by_root(root)
    }

    fn insert_container(&self, container: Container) -> Result<Container> {
        (**self).insert_container(container)
    }

    fn container(&self, id: ContainerId) -> Result<Container> {
        (**self).container(id)
    }

    fn update_container(&self, container: &Container) -> Result<()> {
        (**self).update_container(container)
    }

    fn mark_container_deleted(&self, id: ContainerId) -> Result<()> {
        (**self).mark_container_deleted(id)
    }

    fn child_containers(&self, owner: UserId, parent: Option<ContainerId>) -> Result<Vec<Container>> {
        (**self).child_containers(owner, parent)
    }

    fn containers_of_user(&self, owner: UserId) -> Result<Vec<Container>> {
        (**self).containers_of_user(owner)
    }

    fn insert_leaf(&self, leaf: Leaf) -> Result<Leaf> {
        (**self).insert_leaf(leaf)
    }

    fn leaf(&self, id: LeafId) -> Result<Leaf> {
        (**self).leaf(id)
    }

    fn update_leaf(&self, leaf: &Leaf) -> Result<()> {
        (**self).update_leaf(leaf)
    }

    fn mark_leaf_deleted(&self, id: LeafId) -> Result<()> {
        (**self).mark_leaf_deleted(id)
    }

    fn child_leaves(&self, container: ContainerId, parent: Option<LeafId>) -> Result<Vec<Leaf>> {
        (**self).child_leaves(container, parent)
    }

    fn leaves_of_container(&self, container: ContainerId) -> Result<Vec<Leaf>> {
        (**self).leaves_of_container(container)
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, LeafKind};

    fn store_with_user() -> (InMemoryStore, User) {
        let store = InMemoryStore::new();
        let user = store.insert_user(User::new("Tester", "/sync")).unwrap();
        (store, user)
    }

    #[test]
    fn test_insert_assigns_ids() {
        let (store, user) = store_with_user();

        let a = store
            .insert_container(Container::new(user.id, "A", Category::Project, None))
            .unwrap();
        let b = store
            .insert_container(Container::new(user.id, "B", Category::Project, None))
            .unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(store.container(a.id).unwrap().title, "A");
    }

    #[test]
    fn test_child_listing_follows_parent_changes() {
        let (store, user) = store_with_user();
        let a = store
            .insert_container(Container::new(user.id, "A", Category::Project, None))
            .unwrap();
        let mut b = store
            .insert_container(Container::new(user.id, "B", Category::Project, None))
            .unwrap();

        b.parent = Some(a.id);
        b.category = Category::Component;
        store.update_container(&b).unwrap();

        let top: Vec<_> = store
            .child_containers(user.id, None)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(top, vec![a.id]);

        let under_a = store.child_containers(user.id, Some(a.id)).unwrap();
        assert_eq!(under_a.len(), 1);
        assert_eq!(under_a[0].id, b.id);
    }

    #[test]
    fn test_leaf_requires_existing_container() {
        let (store, user) = store_with_user();

        let result = store.insert_leaf(Leaf::new(user.id, ContainerId(99), None, "x", LeafKind::File));

        assert!(matches!(result, Err(StoreError::ContainerNotFound(ContainerId(99)))));
    }

    #[test]
    fn test_mark_deleted_keeps_record() {
        let (store, user) = store_with_user();
        let c = store
            .insert_container(Container::new(user.id, "A", Category::Project, None))
            .unwrap();
        let leaf = store
            .insert_leaf(Leaf::new(user.id, c.id, None, "a.txt", LeafKind::File))
            .unwrap();

        store.mark_leaf_deleted(leaf.id).unwrap();

        let stored = store.leaf(leaf.id).unwrap();
        assert!(stored.deleted);
        // Tombstones are still listed
        assert_eq!(store.child_leaves(c.id, None).unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_round_trip_rebuilds_index() {
        let (store, user) = store_with_user();
        let c = store
            .insert_container(Container::new(user.id, "A", Category::Project, None))
            .unwrap();
        let folder = store
            .insert_leaf(Leaf::new(user.id, c.id, None, "docs", LeafKind::Folder))
            .unwrap();
        store
            .insert_leaf(Leaf::new(user.id, c.id, Some(folder.id), "a.txt", LeafKind::File))
            .unwrap();

        let restored = InMemoryStore::from_snapshot(store.snapshot());

        assert_eq!(restored.snapshot(), store.snapshot());
        assert_eq!(restored.child_leaves(c.id, Some(folder.id)).unwrap().len(), 1);

        // New ids continue after the restored ones
        let next = restored
            .insert_container(Container::new(user.id, "B", Category::Project, None))
            .unwrap();
        assert!(next.id.0 > folder.id.0);
    }

    #[test]
    fn test_find_user_by_root() {
        let (store, user) = store_with_user();

        assert_eq!(store.find_user_by_root(Path::new("/sync")).unwrap(), Some(user));
        assert_eq!(store.find_user_by_root(Path::new("/other")).unwrap(), None);
    }
}
