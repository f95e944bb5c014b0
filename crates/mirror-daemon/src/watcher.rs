//! Filesystem watcher feeding raw notifications to the consolidator.
//!
//! Uses notify's recommended backend without its debouncer: the
//! consolidator does the debouncing and needs to see every event kind.

use crate::ignore::IgnoreRules;
use mirror_core::FsEvent;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Watches the sync root recursively until dropped.
pub struct FsWatcher {
    root: PathBuf,
    /// Watcher handle (must keep alive)
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    /// Start watching `rules.root()`, handing every translated, unignored
    /// event to `sink` on the watcher's thread.
    pub fn start<F>(rules: IgnoreRules, sink: F) -> notify::Result<Self>
    where
        F: Fn(FsEvent) + Send + 'static,
    {
        let root = rules.root().to_path_buf();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                for fs_event in apply_ignore(&rules, translate(&event)) {
                    sink(fs_event);
                }
            }
            Err(e) => {
                error!("File watcher error: {}", e);
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("Watching {}", root.display());

        Ok(Self {
            root,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn by_existence(path: &Path) -> FsEvent {
    if path.exists() {
        FsEvent::created(path, path.is_dir())
    } else {
        FsEvent::deleted(path, false)
    }
}

/// Map one notify event onto raw `FsEvent`s.
///
/// The two halves of a rename are reported as a deletion of the source and
/// a creation of the destination; when the backend pairs them the final
/// move supersedes both inside the consolidator. Halves that never pair
/// (a move across the root boundary) stay a plain deletion or creation.
pub fn translate(event: &Event) -> Vec<FsEvent> {
    let paths = event.paths.iter();
    let translated: Vec<FsEvent> = match &event.kind {
        EventKind::Create(kind) => paths
            .map(|p| {
                let is_dir = match kind {
                    CreateKind::Folder => true,
                    CreateKind::File => false,
                    _ => p.is_dir(),
                };
                FsEvent::created(p, is_dir)
            })
            .collect(),

        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both => match event.paths.as_slice() {
                [from, to] => vec![FsEvent::moved(from, to, to.is_dir())],
                _ => Vec::new(),
            },
            RenameMode::From => paths.map(|p| FsEvent::deleted(p, false)).collect(),
            RenameMode::To => paths.map(|p| FsEvent::created(p, p.is_dir())).collect(),
            _ => paths.map(|p| by_existence(p)).collect(),
        },

        EventKind::Modify(_) => paths.map(|p| FsEvent::modified(p, p.is_dir())).collect(),

        EventKind::Remove(kind) => {
            let is_dir = matches!(kind, RemoveKind::Folder);
            paths.map(|p| FsEvent::deleted(p, is_dir)).collect()
        }

        EventKind::Any => paths.map(|p| by_existence(p)).collect(),

        EventKind::Access(_) | EventKind::Other => Vec::new(),
    };

    for fs_event in &translated {
        debug!("Raw event: {} {}", fs_event.kind_name(), fs_event.src_path.display());
    }
    translated
}

/// Drop ignored events. A move with only one ignored end degrades to a
/// creation or deletion of the other end.
pub fn apply_ignore(rules: &IgnoreRules, events: Vec<FsEvent>) -> Vec<FsEvent> {
    events
        .into_iter()
        .filter_map(|event| {
            let Some(dest) = event.dest_path().map(Path::to_path_buf) else {
                return (!rules.is_ignored(&event.src_path)).then_some(event);
            };
            match (rules.is_ignored(&event.src_path), rules.is_ignored(&dest)) {
                (false, false) => Some(event),
                (true, false) => Some(FsEvent::created(dest, event.is_directory)),
                (false, true) => Some(FsEvent::deleted(event.src_path, event.is_directory)),
                (true, true) => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::FsEventKind;
    use notify::event::{AccessKind, DataChange};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    fn rules() -> IgnoreRules {
        IgnoreRules::new(Path::new("/sync"), Path::new("/sync/.mirror"), &[]).unwrap()
    }

    #[test]
    fn test_translate_create_modify_remove() {
        assert_eq!(
            translate(&event(EventKind::Create(CreateKind::Folder), &["/sync/Proj"])),
            vec![FsEvent::created("/sync/Proj", true)]
        );
        assert_eq!(
            translate(&event(EventKind::Create(CreateKind::File), &["/sync/Proj/a"])),
            vec![FsEvent::created("/sync/Proj/a", false)]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/sync/Proj/a"]
            )),
            vec![FsEvent::modified("/sync/Proj/a", false)]
        );
        assert_eq!(
            translate(&event(EventKind::Remove(RemoveKind::Folder), &["/sync/Proj"])),
            vec![FsEvent::deleted("/sync/Proj", true)]
        );
    }

    #[test]
    fn test_translate_rename_halves() {
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/sync/Proj/a", "/sync/Proj/b"],
        )
        .set_tracker(7);
        assert_eq!(
            translate(&both),
            vec![FsEvent::moved("/sync/Proj/a", "/sync/Proj/b", false)]
        );

        let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/sync/Proj/a"]);
        assert_eq!(translate(&from), vec![FsEvent::deleted("/sync/Proj/a", false)]);

        let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/sync/Proj/missing"]);
        assert_eq!(translate(&to)[0].kind, FsEventKind::Created);
    }

    #[test]
    fn test_translate_ignores_access() {
        let access = event(EventKind::Access(AccessKind::Any), &["/sync/Proj/a"]);
        assert!(translate(&access).is_empty());
    }

    #[test]
    fn test_unpaired_rename_by_existence() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let present = temp_dir.path().join("present");
        std::fs::create_dir(&present).unwrap();
        let gone = temp_dir.path().join("gone");

        let any = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            &[present.to_str().unwrap(), gone.to_str().unwrap()],
        );

        assert_eq!(
            translate(&any),
            vec![FsEvent::created(&present, true), FsEvent::deleted(&gone, false)]
        );
    }

    #[test]
    fn test_apply_ignore() {
        let rules = rules();
        let events = vec![
            FsEvent::created("/sync/Proj/.DS_Store", false),
            FsEvent::modified("/sync/.mirror/entities.json", false),
            FsEvent::created("/sync/Proj/a.txt", false),
            // Editor save: temp file renamed over the real one
            FsEvent::moved("/sync/Proj/a.txt.tmp", "/sync/Proj/a.txt", false),
            FsEvent::moved("/sync/Proj/b.txt", "/sync/Proj/b.txt.swp", false),
            FsEvent::moved("/sync/Proj/x.tmp", "/sync/Proj/y.tmp", false),
            FsEvent::moved("/sync/Proj/c", "/sync/Proj/d", false),
        ];

        assert_eq!(
            apply_ignore(&rules, events),
            vec![
                FsEvent::created("/sync/Proj/a.txt", false),
                FsEvent::created("/sync/Proj/a.txt", false),
                FsEvent::deleted("/sync/Proj/b.txt", false),
                FsEvent::moved("/sync/Proj/c", "/sync/Proj/d", false),
            ]
        );
    }
}
