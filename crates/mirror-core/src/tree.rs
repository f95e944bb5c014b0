//! Tree operations over an [`EntityStore`]: path derivation, path lookup,
//! rename/reparent and subtree tombstoning.
//!
//! Paths are recomputed on every call by walking the parent chain (O(depth))
//! and are never cached, so a rename or move of any ancestor is reflected
//! immediately in every descendant's path.

use crate::model::{Category, Container, ContainerId, EntityRef, Leaf, LeafId, User, UserId};
use crate::store::{EntityStore, StoreError};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Upper bound on ancestor chains. Deeper chains are treated as corrupted.
const MAX_DEPTH: usize = 4096;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Moving {entity} under {new_parent} would create a cycle")]
    Cycle { entity: EntityRef, new_parent: EntityRef },

    #[error("Ancestor chain of {0} is cyclic or too deep")]
    CorruptedChain(EntityRef),

    #[error("{0} is not a folder and cannot contain other entries")]
    NotAFolder(LeafId),

    #[error("Path is outside the sync root {}: {}", .root.display(), .path.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

pub type Result<T> = std::result::Result<T, TreeError>;

/// A resolved location in the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// The user's sync root itself
    Root,
    Container(Container),
    Leaf(Leaf),
}

impl Node {
    pub fn entity(&self) -> Option<EntityRef> {
        match self {
            Node::Root => None,
            Node::Container(c) => Some(c.id.into()),
            Node::Leaf(l) => Some(l.id.into()),
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            Node::Root => true,
            Node::Container(c) => c.is_alive(),
            Node::Leaf(l) => l.is_alive(),
        }
    }
}

/// Where a leaf hangs: directly under a container, or inside a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafParent {
    Container(ContainerId),
    Folder(LeafId),
}

// ============================================================================
// Path derivation
// ============================================================================

/// Absolute path of a container: its parent's path joined with its title,
/// or the owner's root path joined with its title.
pub fn container_path<S: EntityStore + ?Sized>(store: &S, id: ContainerId) -> Result<PathBuf> {
    let mut titles = Vec::new();
    let mut current = store.container(id)?;
    loop {
        if titles.len() >= MAX_DEPTH {
            return Err(TreeError::CorruptedChain(id.into()));
        }
        titles.push(current.title.clone());
        match current.parent {
            Some(parent) => current = store.container(parent)?,
            None => break,
        }
    }

    let mut path = store.user(current.owner)?.root_path;
    path.extend(titles.iter().rev());
    Ok(path)
}

/// Absolute path of a leaf: its parent leaf's path joined with its name,
/// or its container's path joined with its name.
pub fn leaf_path<S: EntityStore + ?Sized>(store: &S, id: LeafId) -> Result<PathBuf> {
    let mut names = Vec::new();
    let mut current = store.leaf(id)?;
    loop {
        if names.len() >= MAX_DEPTH {
            return Err(TreeError::CorruptedChain(id.into()));
        }
        names.push(current.name.clone());
        match current.parent {
            Some(parent) => current = store.leaf(parent)?,
            None => break,
        }
    }

    let mut path = container_path(store, current.container)?;
    path.extend(names.iter().rev());
    Ok(path)
}

// ============================================================================
// Path lookup
// ============================================================================

/// Pick the candidate matching `is_named`, preferring a live one.
fn pick<T>(
    candidates: Vec<T>,
    is_named: impl Fn(&T) -> bool,
    alive: impl Fn(&T) -> bool,
    include_tombstones: bool,
) -> Option<T> {
    let mut tombstone = None;
    for candidate in candidates.into_iter().filter(|c| is_named(c)) {
        if alive(&candidate) {
            return Some(candidate);
        }
        // Keep the most recent tombstone (children are ordered by id)
        tombstone = Some(candidate);
    }
    if include_tombstones { tombstone } else { None }
}

/// Find the direct child of `parent` called `name`.
///
/// Inside a container, child containers shadow top-level leaves of the same
/// name. Files have no children.
pub fn find_child<S: EntityStore + ?Sized>(
    store: &S,
    owner: UserId,
    parent: &Node,
    name: &str,
    include_tombstones: bool,
) -> Result<Option<Node>> {
    let found = match parent {
        Node::Root => pick(
            store.child_containers(owner, None)?,
            |c: &Container| c.title == name,
            Container::is_alive,
            include_tombstones,
        )
        .map(Node::Container),
        Node::Container(container) => {
            let component = pick(
                store.child_containers(owner, Some(container.id))?,
                |c: &Container| c.title == name,
                Container::is_alive,
                include_tombstones,
            );
            match component {
                Some(c) if c.is_alive() => Some(Node::Container(c)),
                tombstoned => {
                    let leaf = pick(
                        store.child_leaves(container.id, None)?,
                        |l: &Leaf| l.name == name,
                        Leaf::is_alive,
                        include_tombstones,
                    );
                    match leaf {
                        Some(l) if l.is_alive() => Some(Node::Leaf(l)),
                        leaf => tombstoned.map(Node::Container).or(leaf.map(Node::Leaf)),
                    }
                }
            }
        }
        Node::Leaf(folder) if folder.is_folder() => pick(
            store.child_leaves(folder.container, Some(folder.id))?,
            |l: &Leaf| l.name == name,
            Leaf::is_alive,
            include_tombstones,
        )
        .map(Node::Leaf),
        Node::Leaf(_) => None,
    };
    Ok(found)
}

/// Components of `path` relative to the user's root.
fn relative_components(user: &User, path: &Path) -> Result<Vec<String>> {
    let relative = path
        .strip_prefix(&user.root_path)
        .map_err(|_| TreeError::OutsideRoot {
            path: path.to_path_buf(),
            root: user.root_path.clone(),
        })?;

    Ok(relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect())
}

fn resolve_inner<S: EntityStore + ?Sized>(
    store: &S,
    user: &User,
    path: &Path,
    include_tombstones: bool,
) -> Result<Option<Node>> {
    let mut current = Node::Root;
    for name in relative_components(user, path)? {
        match find_child(store, user.id, &current, &name, include_tombstones)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Map an absolute filesystem path to the live entity at that location.
///
/// Returns `Node::Root` for the sync root itself and `None` when any
/// component is not tracked.
pub fn resolve<S: EntityStore + ?Sized>(store: &S, user: &User, path: &Path) -> Result<Option<Node>> {
    resolve_inner(store, user, path, false)
}

/// Like [`resolve`], but falls back to tombstoned entities along the way.
pub fn resolve_with_tombstones<S: EntityStore + ?Sized>(
    store: &S,
    user: &User,
    path: &Path,
) -> Result<Option<Node>> {
    resolve_inner(store, user, path, true)
}

/// Live top-level project containers of a user.
pub fn projects<S: EntityStore + ?Sized>(store: &S, owner: UserId) -> Result<Vec<Container>> {
    Ok(store
        .child_containers(owner, None)?
        .into_iter()
        .filter(|c| c.is_alive() && c.category == Category::Project)
        .collect())
}

// ============================================================================
// Rename / reparent
// ============================================================================

/// True when `ancestor` is `start` or appears on `start`'s parent chain.
fn container_chain_contains<S: EntityStore + ?Sized>(
    store: &S,
    start: ContainerId,
    ancestor: ContainerId,
) -> Result<bool> {
    let mut current = Some(start);
    let mut seen = HashSet::new();
    while let Some(id) = current {
        if id == ancestor {
            return Ok(true);
        }
        if !seen.insert(id) || seen.len() > MAX_DEPTH {
            return Err(TreeError::CorruptedChain(start.into()));
        }
        current = store.container(id)?.parent;
    }
    Ok(false)
}

fn leaf_chain_contains<S: EntityStore + ?Sized>(
    store: &S,
    start: LeafId,
    ancestor: LeafId,
) -> Result<bool> {
    let mut current = Some(start);
    let mut seen = HashSet::new();
    while let Some(id) = current {
        if id == ancestor {
            return Ok(true);
        }
        if !seen.insert(id) || seen.len() > MAX_DEPTH {
            return Err(TreeError::CorruptedChain(start.into()));
        }
        current = store.leaf(id)?.parent;
    }
    Ok(false)
}

/// Move `container` under `new_parent` (or to the top level) and rename it.
///
/// Rejected with [`TreeError::Cycle`] when `new_parent` is the container
/// itself or one of its descendants. Persists the container on success.
pub fn move_container<S: EntityStore + ?Sized>(
    store: &S,
    container: &mut Container,
    new_parent: Option<ContainerId>,
    new_title: &str,
) -> Result<()> {
    if let Some(parent) = new_parent {
        if container_chain_contains(store, parent, container.id)? {
            return Err(TreeError::Cycle {
                entity: container.id.into(),
                new_parent: parent.into(),
            });
        }
    }

    container.parent = new_parent;
    container.title = new_title.to_string();
    store.update_container(container)?;
    Ok(())
}

/// Rename a container in place.
pub fn rename_container<S: EntityStore + ?Sized>(
    store: &S,
    container: &mut Container,
    new_title: &str,
) -> Result<()> {
    let parent = container.parent;
    move_container(store, container, parent, new_title)
}

/// Move `leaf` under `dest` and rename it.
///
/// A folder destination must be a folder and must not be the leaf itself or
/// one of its descendants. When the move crosses containers, the whole
/// subtree is re-homed to the new container. Persists on success.
pub fn move_leaf<S: EntityStore + ?Sized>(
    store: &S,
    leaf: &mut Leaf,
    dest: LeafParent,
    new_name: &str,
) -> Result<()> {
    let (container, parent) = match dest {
        LeafParent::Container(container) => (container, None),
        LeafParent::Folder(folder_id) => {
            let folder = store.leaf(folder_id)?;
            if !folder.is_folder() {
                return Err(TreeError::NotAFolder(folder_id));
            }
            if leaf_chain_contains(store, folder_id, leaf.id)? {
                return Err(TreeError::Cycle {
                    entity: leaf.id.into(),
                    new_parent: folder_id.into(),
                });
            }
            (folder.container, Some(folder_id))
        }
    };

    let previous_container = leaf.container;
    leaf.container = container;
    leaf.parent = parent;
    leaf.name = new_name.to_string();
    store.update_leaf(leaf)?;

    if previous_container != container {
        rehome_descendants(store, previous_container, leaf.id, container)?;
    }
    Ok(())
}

/// Rename a leaf in place.
pub fn rename_leaf<S: EntityStore + ?Sized>(store: &S, leaf: &mut Leaf, new_name: &str) -> Result<()> {
    let dest = match leaf.parent {
        Some(parent) => LeafParent::Folder(parent),
        None => LeafParent::Container(leaf.container),
    };
    move_leaf(store, leaf, dest, new_name)
}

/// Point every descendant of `root` at `container`.
fn rehome_descendants<S: EntityStore + ?Sized>(
    store: &S,
    from: ContainerId,
    root: LeafId,
    container: ContainerId,
) -> Result<()> {
    let mut stack = vec![root];
    while let Some(parent) = stack.pop() {
        for mut child in store.child_leaves(from, Some(parent))? {
            child.container = container;
            store.update_leaf(&child)?;
            stack.push(child.id);
        }
    }
    Ok(())
}

// ============================================================================
// Tombstones
// ============================================================================

/// Tombstone `entity` and everything beneath it.
///
/// Entities already tombstoned are skipped. Returns how many entities were
/// newly tombstoned.
pub fn tombstone_subtree<S: EntityStore + ?Sized>(store: &S, entity: EntityRef) -> Result<usize> {
    let mut count = 0;
    match entity {
        EntityRef::Container(root) => {
            let owner = store.container(root)?.owner;
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                let container = store.container(id)?;
                if container.is_alive() {
                    store.mark_container_deleted(id)?;
                    count += 1;
                }
                for leaf in store.leaves_of_container(id)? {
                    if leaf.is_alive() {
                        store.mark_leaf_deleted(leaf.id)?;
                        count += 1;
                    }
                }
                stack.extend(store.child_containers(owner, Some(id))?.iter().map(|c| c.id));
            }
        }
        EntityRef::Leaf(root) => {
            let container = store.leaf(root)?.container;
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                if store.leaf(id)?.is_alive() {
                    store.mark_leaf_deleted(id)?;
                    count += 1;
                }
                stack.extend(store.child_leaves(container, Some(id))?.iter().map(|l| l.id));
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use crate::model::LeafKind;
    use crate::store::InMemoryStore;

    struct Fixture {
        store: InMemoryStore,
        user: User,
    }

    impl Fixture {
        fn new() -> Self {
            let store = InMemoryStore::new();
            let user = store.insert_user(User::new("Tester", "/sync")).unwrap();
            Self { store, user }
        }

        fn project(&self, title: &str) -> Container {
            self.store
                .insert_container(Container::new(self.user.id, title, Category::Project, None))
                .unwrap()
        }

        fn component(&self, parent: &Container, title: &str) -> Container {
            self.store
                .insert_container(Container::new(
                    self.user.id,
                    title,
                    Category::Component,
                    Some(parent.id),
                ))
                .unwrap()
        }

        fn leaf(&self, container: &Container, parent: Option<&Leaf>, name: &str, kind: LeafKind) -> Leaf {
            self.store
                .insert_leaf(Leaf::new(
                    self.user.id,
                    container.id,
                    parent.map(|p| p.id),
                    name,
                    kind,
                ))
                .unwrap()
        }
    }

    #[test]
    fn test_paths_follow_ancestor_rename() {
        let fx = Fixture::new();
        let mut proj = fx.project("Proj");
        let mut file = Leaf::new(fx.user.id, proj.id, None, "a.txt", LeafKind::File);
        file.hash = Some(ContentHash::from_bytes(b"content"));
        let file = fx.store.insert_leaf(file).unwrap();

        assert_eq!(container_path(&fx.store, proj.id).unwrap(), PathBuf::from("/sync/Proj"));
        assert_eq!(leaf_path(&fx.store, file.id).unwrap(), PathBuf::from("/sync/Proj/a.txt"));

        rename_container(&fx.store, &mut proj, "Proj2").unwrap();

        assert_eq!(leaf_path(&fx.store, file.id).unwrap(), PathBuf::from("/sync/Proj2/a.txt"));
        // The descendant record itself is untouched
        assert_eq!(fx.store.leaf(file.id).unwrap(), file);
    }

    #[test]
    fn test_nested_paths() {
        let fx = Fixture::new();
        let proj = fx.project("Proj");
        let comp = fx.component(&proj, "Comp");
        let docs = fx.leaf(&comp, None, "docs", LeafKind::Folder);
        let notes = fx.leaf(&comp, Some(&docs), "notes.md", LeafKind::File);

        assert_eq!(
            leaf_path(&fx.store, notes.id).unwrap(),
            PathBuf::from("/sync/Proj/Comp/docs/notes.md")
        );
    }

    #[test]
    fn test_resolve_walks_containers_then_leaves() {
        let fx = Fixture::new();
        let proj = fx.project("Proj");
        let comp = fx.component(&proj, "Comp");
        let docs = fx.leaf(&proj, None, "docs", LeafKind::Folder);
        let notes = fx.leaf(&proj, Some(&docs), "notes.md", LeafKind::File);

        let user = &fx.user;
        assert_eq!(resolve(&fx.store, user, Path::new("/sync")).unwrap(), Some(Node::Root));
        assert_eq!(
            resolve(&fx.store, user, Path::new("/sync/Proj/Comp")).unwrap(),
            Some(Node::Container(comp))
        );
        assert_eq!(
            resolve(&fx.store, user, Path::new("/sync/Proj/docs/notes.md")).unwrap(),
            Some(Node::Leaf(notes))
        );
        assert_eq!(resolve(&fx.store, user, Path::new("/sync/Proj/missing")).unwrap(), None);
        assert!(matches!(
            resolve(&fx.store, user, Path::new("/elsewhere/x")),
            Err(TreeError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn test_resolve_skips_tombstones_unless_asked() {
        let fx = Fixture::new();
        let proj = fx.project("Proj");
        let file = fx.leaf(&proj, None, "a.txt", LeafKind::File);
        fx.store.mark_leaf_deleted(file.id).unwrap();

        let path = Path::new("/sync/Proj/a.txt");
        assert_eq!(resolve(&fx.store, &fx.user, path).unwrap(), None);

        let found = resolve_with_tombstones(&fx.store, &fx.user, path).unwrap();
        assert!(matches!(found, Some(Node::Leaf(l)) if l.id == file.id));
    }

    #[test]
    fn test_alive_entry_preferred_over_tombstone() {
        let fx = Fixture::new();
        let proj = fx.project("Proj");
        let old = fx.leaf(&proj, None, "a.txt", LeafKind::File);
        fx.store.mark_leaf_deleted(old.id).unwrap();
        let new = fx.leaf(&proj, None, "a.txt", LeafKind::File);

        let found = resolve_with_tombstones(&fx.store, &fx.user, Path::new("/sync/Proj/a.txt")).unwrap();
        assert!(matches!(found, Some(Node::Leaf(l)) if l.id == new.id));
    }

    #[test]
    fn test_container_reparent_cycle_rejected() {
        let fx = Fixture::new();
        let mut a = fx.project("A");
        let b = fx.component(&a, "B");
        let c = fx.component(&b, "C");

        let result = move_container(&fx.store, &mut a, Some(c.id), "A");
        assert!(matches!(result, Err(TreeError::Cycle { .. })));

        let mut again = fx.store.container(a.id).unwrap();
        let result = move_container(&fx.store, &mut again, Some(a.id), "A");
        assert!(matches!(result, Err(TreeError::Cycle { .. })));

        // Nothing was written
        assert_eq!(fx.store.container(a.id).unwrap().parent, None);
    }

    #[test]
    fn test_leaf_reparent_cycle_rejected() {
        let fx = Fixture::new();
        let proj = fx.project("Proj");
        let mut outer = fx.leaf(&proj, None, "outer", LeafKind::Folder);
        let inner = fx.leaf(&proj, Some(&outer), "inner", LeafKind::Folder);

        let result = move_leaf(&fx.store, &mut outer, LeafParent::Folder(inner.id), "outer");

        assert!(matches!(result, Err(TreeError::Cycle { .. })));
    }

    #[test]
    fn test_leaf_parent_must_be_folder() {
        let fx = Fixture::new();
        let proj = fx.project("Proj");
        let file = fx.leaf(&proj, None, "a.txt", LeafKind::File);
        let mut other = fx.leaf(&proj, None, "b.txt", LeafKind::File);

        let result = move_leaf(&fx.store, &mut other, LeafParent::Folder(file.id), "b.txt");

        assert!(matches!(result, Err(TreeError::NotAFolder(id)) if id == file.id));
    }

    #[test]
    fn test_move_leaf_across_containers_rehomes_subtree() {
        let fx = Fixture::new();
        let a = fx.project("A");
        let b = fx.project("B");
        let mut docs = fx.leaf(&a, None, "docs", LeafKind::Folder);
        let sub = fx.leaf(&a, Some(&docs), "sub", LeafKind::Folder);
        let deep = fx.leaf(&a, Some(&sub), "deep.txt", LeafKind::File);

        move_leaf(&fx.store, &mut docs, LeafParent::Container(b.id), "docs2").unwrap();

        assert_eq!(fx.store.leaf(sub.id).unwrap().container, b.id);
        assert_eq!(fx.store.leaf(deep.id).unwrap().container, b.id);
        assert_eq!(
            leaf_path(&fx.store, deep.id).unwrap(),
            PathBuf::from("/sync/B/docs2/sub/deep.txt")
        );
    }

    #[test]
    fn test_tombstone_subtree() {
        let fx = Fixture::new();
        let proj = fx.project("Proj");
        let comp = fx.component(&proj, "Comp");
        let docs = fx.leaf(&proj, None, "docs", LeafKind::Folder);
        let a = fx.leaf(&proj, Some(&docs), "a.txt", LeafKind::File);
        let b = fx.leaf(&comp, None, "b.txt", LeafKind::File);

        let count = tombstone_subtree(&fx.store, proj.id.into()).unwrap();

        assert_eq!(count, 5);
        assert!(fx.store.container(comp.id).unwrap().deleted);
        assert!(fx.store.leaf(a.id).unwrap().deleted);
        assert!(fx.store.leaf(b.id).unwrap().deleted);

        // Second pass finds nothing new
        assert_eq!(tombstone_subtree(&fx.store, proj.id.into()).unwrap(), 0);
    }

    #[test]
    fn test_projects_lists_live_top_level() {
        let fx = Fixture::new();
        let a = fx.project("A");
        let b = fx.project("B");
        fx.component(&a, "Comp");
        fx.store.mark_container_deleted(b.id).unwrap();

        let projects = projects(&fx.store, fx.user.id).unwrap();

        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id, a.id);
    }
}
