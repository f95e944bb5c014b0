//! Raw filesystem notifications and the handler contract they are dispatched to.

use crate::store::StoreError;
use crate::tree::TreeError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// What happened to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Modified,
    Deleted,
    /// The source path was renamed or moved to `dest_path`
    Moved { dest_path: PathBuf },
}

/// A raw notification from the filesystem watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub is_directory: bool,
    pub src_path: PathBuf,
}

impl FsEvent {
    pub fn created(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind: FsEventKind::Created,
            is_directory,
            src_path: path.into(),
        }
    }

    pub fn modified(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind: FsEventKind::Modified,
            is_directory,
            src_path: path.into(),
        }
    }

    pub fn deleted(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind: FsEventKind::Deleted,
            is_directory,
            src_path: path.into(),
        }
    }

    pub fn moved(src: impl Into<PathBuf>, dest: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind: FsEventKind::Moved {
                dest_path: dest.into(),
            },
            is_directory,
            src_path: src.into(),
        }
    }

    /// Destination of a move, `None` for every other kind.
    pub fn dest_path(&self) -> Option<&Path> {
        match &self.kind {
            FsEventKind::Moved { dest_path } => Some(dest_path.as_path()),
            _ => None,
        }
    }

    /// The path this event leaves behind: the destination of a move, the
    /// source otherwise.
    pub fn effective_path(&self) -> &Path {
        self.dest_path().unwrap_or(&self.src_path)
    }

    /// Short lowercase label for logs.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FsEventKind::Created => "created",
            FsEventKind::Modified => "modified",
            FsEventKind::Deleted => "deleted",
            FsEventKind::Moved { .. } => "moved",
        }
    }
}

/// The event targets a path the model cannot locate yet, e.g. because an
/// ancestor's creation has not been reconciled. Recoverable: later events or a
/// rescan restore consistency.
#[derive(Debug, Error)]
#[error("Cannot resolve {}: {reason}", .path.display())]
pub struct ResolutionError {
    pub path: PathBuf,
    pub reason: String,
}

impl ResolutionError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Unsupported {kind} event for {}: {reason}", .path.display())]
    Unsupported {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },
}

impl HandlerError {
    pub fn unsupported(event: &FsEvent, reason: impl Into<String>) -> Self {
        HandlerError::Unsupported {
            kind: event.kind_name(),
            path: event.src_path.clone(),
            reason: reason.into(),
        }
    }

    pub fn is_resolution(&self) -> bool {
        matches!(self, HandlerError::Resolution(_))
    }
}

/// Receives consolidated events, one callback per kind.
///
/// Callbacks run synchronously on the flushing thread and should return
/// quickly. They may submit new events, but must not flush.
pub trait EventHandler: Send + Sync {
    fn on_created(&self, _event: &FsEvent) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_modified(&self, _event: &FsEvent) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_deleted(&self, _event: &FsEvent) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_moved(&self, _event: &FsEvent) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called once after every event of a batch has been dispatched.
    fn commit(&self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    fn on_created(&self, event: &FsEvent) -> Result<(), HandlerError> {
        (**self).on_created(event)
    }

    fn on_modified(&self, event: &FsEvent) -> Result<(), HandlerError> {
        (**self).on_modified(event)
    }

    fn on_deleted(&self, event: &FsEvent) -> Result<(), HandlerError> {
        (**self).on_deleted(event)
    }

    fn on_moved(&self, event: &FsEvent) -> Result<(), HandlerError> {
        (**self).on_moved(event)
    }

    fn commit(&self) -> Result<(), HandlerError> {
        (**self).commit()
    }
}

/// Route `event` to the callback matching its kind.
pub fn dispatch<H: EventHandler + ?Sized>(handler: &H, event: &FsEvent) -> Result<(), HandlerError> {
    match event.kind {
        FsEventKind::Created => handler.on_created(event),
        FsEventKind::Modified => handler.on_modified(event),
        FsEventKind::Deleted => handler.on_deleted(event),
        FsEventKind::Moved { .. } => handler.on_moved(event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct KindRecorder {
        seen: Mutex<Vec<&'static str>>,
    }

    impl EventHandler for KindRecorder {
        fn on_created(&self, _event: &FsEvent) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push("on_created");
            Ok(())
        }

        fn on_moved(&self, _event: &FsEvent) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push("on_moved");
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        let handler = KindRecorder::default();

        dispatch(&handler, &FsEvent::created("/x/a", false)).unwrap();
        dispatch(&handler, &FsEvent::moved("/x/a", "/x/b", false)).unwrap();
        // Default callbacks accept silently
        dispatch(&handler, &FsEvent::deleted("/x/b", false)).unwrap();

        assert_eq!(*handler.seen.lock().unwrap(), vec!["on_created", "on_moved"]);
    }

    #[test]
    fn test_effective_path() {
        let moved = FsEvent::moved("/x/a", "/y/b", false);
        assert_eq!(moved.effective_path(), Path::new("/y/b"));
        assert_eq!(moved.dest_path(), Some(Path::new("/y/b")));

        let deleted = FsEvent::deleted("/x/a", true);
        assert_eq!(deleted.effective_path(), Path::new("/x/a"));
        assert_eq!(deleted.dest_path(), None);
    }

    #[test]
    fn test_error_messages() {
        let err: HandlerError = ResolutionError::new("/x/a", "parent is not tracked").into();
        assert!(err.is_resolution());
        assert_eq!(err.to_string(), "Cannot resolve /x/a: parent is not tracked");

        let err = HandlerError::unsupported(&FsEvent::moved("/x/a", "/b", false), "no container");
        assert!(!err.is_resolution());
        assert!(err.to_string().starts_with("Unsupported moved event for /x/a"));
    }
}
