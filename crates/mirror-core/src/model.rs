//! Entity model: users, containers (projects/components) and leaves (files/folders).
//!
//! Entities never store their absolute path. Paths are derived on demand from
//! the parent chain by [`crate::tree`], so renaming or moving an ancestor
//! implicitly relocates every descendant.

use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a [`User`].
    UserId,
    "user"
);
entity_id!(
    /// Identifier of a [`Container`].
    ContainerId,
    "container"
);
entity_id!(
    /// Identifier of a [`Leaf`].
    LeafId,
    "leaf"
);

/// The local account that owns a sync root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    /// Absolute directory every top-level container is joined onto
    pub root_path: PathBuf,
    /// Remote login, kept opaque (authentication happens elsewhere)
    pub login: Option<String>,
    /// Remote access token, kept opaque
    pub remote_token: Option<String>,
    /// Correlation id on the remote service
    pub external_id: Option<String>,
}

impl User {
    /// Create an unsaved user. The store assigns the id on insert.
    pub fn new(display_name: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        Self {
            id: UserId(0),
            display_name: display_name.into(),
            root_path: root_path.into(),
            login: None,
            remote_token: None,
            external_id: None,
        }
    }
}

/// Category of a container node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Project,
    Component,
}

/// Kind of a leaf node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafKind {
    Folder,
    File,
}

impl LeafKind {
    pub fn for_directory(is_directory: bool) -> Self {
        if is_directory {
            LeafKind::Folder
        } else {
            LeafKind::File
        }
    }
}

/// A project or component. Forms a forest rooted at containers without a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub title: String,
    pub category: Category,
    /// Containers are hash-less; kept for remote records that carry one
    pub hash: Option<ContentHash>,
    pub modified_at: DateTime<Utc>,
    pub external_id: Option<String>,
    pub created: bool,
    pub deleted: bool,
    pub owner: UserId,
    pub parent: Option<ContainerId>,
}

impl Container {
    /// Create an unsaved container. The store assigns the id on insert.
    pub fn new(
        owner: UserId,
        title: impl Into<String>,
        category: Category,
        parent: Option<ContainerId>,
    ) -> Self {
        Self {
            id: ContainerId(0),
            title: title.into(),
            category,
            hash: None,
            modified_at: Utc::now(),
            external_id: None,
            created: false,
            deleted: false,
            owner,
            parent,
        }
    }

    /// Set the modification time to `dt`, or to now.
    pub fn update_time(&mut self, dt: Option<DateTime<Utc>>) {
        self.modified_at = dt.unwrap_or_else(Utc::now);
    }

    pub fn is_alive(&self) -> bool {
        !self.deleted
    }
}

/// A file or folder, nested under a container or a folder of the same container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    pub id: LeafId,
    pub name: String,
    pub kind: LeafKind,
    /// Only meaningful for `LeafKind::File`
    pub hash: Option<ContentHash>,
    pub modified_at: DateTime<Utc>,
    pub external_id: Option<String>,
    pub created: bool,
    pub deleted: bool,
    pub owner: UserId,
    pub container: ContainerId,
    pub parent: Option<LeafId>,
}

impl Leaf {
    /// Create an unsaved leaf. The store assigns the id on insert.
    pub fn new(
        owner: UserId,
        container: ContainerId,
        parent: Option<LeafId>,
        name: impl Into<String>,
        kind: LeafKind,
    ) -> Self {
        Self {
            id: LeafId(0),
            name: name.into(),
            kind,
            hash: None,
            modified_at: Utc::now(),
            external_id: None,
            created: false,
            deleted: false,
            owner,
            container,
            parent,
        }
    }

    /// Set the modification time to `dt`, or to now.
    pub fn update_time(&mut self, dt: Option<DateTime<Utc>>) {
        self.modified_at = dt.unwrap_or_else(Utc::now);
    }

    pub fn is_file(&self) -> bool {
        self.kind == LeafKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == LeafKind::Folder
    }

    pub fn is_alive(&self) -> bool {
        !self.deleted
    }
}

/// Reference to either kind of entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Container(ContainerId),
    Leaf(LeafId),
}

impl From<ContainerId> for EntityRef {
    fn from(id: ContainerId) -> Self {
        EntityRef::Container(id)
    }
}

impl From<LeafId> for EntityRef {
    fn from(id: LeafId) -> Self {
        EntityRef::Leaf(id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Container(id) => id.fmt(f),
            EntityRef::Leaf(id) => id.fmt(f),
        }
    }
}
