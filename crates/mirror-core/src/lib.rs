//! mirror-core: Keeps a hierarchical entity model in step with a watched directory tree.
//!
//! This crate provides the core functionality for:
//! - Coalescing bursts of filesystem notifications into one event per path
//! - Modelling projects/components (containers) and files/folders (leaves)
//! - Deriving absolute paths from the parent chain instead of storing them
//! - Streaming content hashes of files
//! - The `EntityStore` abstraction the model is persisted through

pub mod consolidator;
pub mod events;
pub mod hash;
pub mod model;
pub mod reconcile;
pub mod scan;
pub mod store;
pub mod timer;
pub mod tree;

pub use consolidator::{ConsolidatorConfig, ConsolidatorError, EventCache, EventConsolidator, FlushReport};
pub use events::{EventHandler, FsEvent, FsEventKind, HandlerError, ResolutionError, dispatch};
pub use hash::{ContentHash, DEFAULT_BLOCK_SIZE, HashError, hash_file};
pub use model::{Category, Container, ContainerId, EntityRef, Leaf, LeafId, LeafKind, User, UserId};
pub use reconcile::ModelHandler;
pub use scan::{PathFilter, ScanError, rescan_events};
pub use store::{EntityStore, InMemoryStore, Snapshot, StoreError};
pub use timer::DebounceTimer;
pub use tree::{LeafParent, Node, TreeError};
