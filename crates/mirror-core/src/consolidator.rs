//! Event Consolidator: debounces bursts of raw notifications and collapses
//! them into at most one event per path.
//!
//! Events are buffered in a trie keyed by the components of their effective
//! path (the destination of a move, the source otherwise). Inserting at a
//! node that already holds an event replaces it, so the last observation of
//! a path wins, while events buffered for descendants are kept. Every
//! submission pushes the flush `delay` further out; once the stream goes
//! quiet the trie is swapped out and dispatched depth-first, each node's own
//! event before its children, siblings in insertion order.

use crate::events::{EventHandler, FsEvent, FsEventKind, dispatch};
use crate::timer::DebounceTimer;
use indexmap::IndexMap;
use std::ffi::OsString;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tracing::{debug, error, info, warn};

/// Quiet period after the last submission before a flush (2 s).
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ConsolidatorConfig {
    pub delay: Duration,
}

impl Default for ConsolidatorConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsolidatorError {
    #[error("No Tokio runtime to schedule flushes on: {0}")]
    NoRuntime(#[from] TryCurrentError),
}

// ============================================================================
// Event cache
// ============================================================================

#[derive(Debug, Default)]
struct CacheNode {
    event: Option<FsEvent>,
    children: IndexMap<OsString, CacheNode>,
}

impl CacheNode {
    fn collect(self, out: &mut Vec<FsEvent>) {
        if let Some(event) = self.event {
            out.push(event);
        }
        for (_, child) in self.children {
            child.collect(out);
        }
    }
}

/// Buffered events keyed by the components of their effective path.
#[derive(Debug, Default)]
pub struct EventCache {
    root: CacheNode,
    len: usize,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `event`, returning the event it replaced at the same path.
    ///
    /// A move also supersedes a buffered deletion of its source, which is
    /// how watchers report the first half of a rename. When a move is in
    /// turn replaced by an event that does not carry the same source, the
    /// source is gone from disk all the same, so its deletion is restored.
    pub fn insert(&mut self, event: FsEvent) -> Option<FsEvent> {
        if event.dest_path().is_some() {
            self.discard_deletion(&event.src_path);
        }

        let new_source = event.dest_path().map(|_| event.src_path.clone());
        let previous = self.node_mut(event.effective_path()).event.replace(event);
        match &previous {
            None => self.len += 1,
            Some(moved) if moved.dest_path().is_some() && new_source.as_ref() != Some(&moved.src_path) => {
                self.restore_deletion(&moved.src_path, moved.is_directory);
            }
            Some(_) => {}
        }
        previous
    }

    fn node_mut(&mut self, path: &Path) -> &mut CacheNode {
        let mut node = &mut self.root;
        for component in path.components() {
            node = node
                .children
                .entry(component.as_os_str().to_os_string())
                .or_default();
        }
        node
    }

    fn restore_deletion(&mut self, path: &Path, is_directory: bool) {
        let node = self.node_mut(path);
        if node.event.is_none() {
            node.event = Some(FsEvent::deleted(path, is_directory));
            self.len += 1;
        }
    }

    fn discard_deletion(&mut self, path: &Path) {
        let mut node = &mut self.root;
        for component in path.components() {
            match node.children.get_mut(component.as_os_str()) {
                Some(child) => node = child,
                None => return,
            }
        }
        if matches!(node.event, Some(FsEvent { kind: FsEventKind::Deleted, .. })) {
            node.event = None;
            self.len -= 1;
        }
    }

    /// The event buffered for `path`, if any.
    pub fn get(&self, path: &Path) -> Option<&FsEvent> {
        let mut node = &self.root;
        for component in path.components() {
            node = node.children.get(component.as_os_str())?;
        }
        node.event.as_ref()
    }

    /// Number of buffered events (not trie nodes).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Flatten into dispatch order.
    pub fn into_events(self) -> Vec<FsEvent> {
        let mut events = Vec::with_capacity(self.len);
        self.root.collect(&mut events);
        events
    }
}

// ============================================================================
// Consolidator
// ============================================================================

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Events the handler accepted
    pub dispatched: usize,
    /// Events rejected with a resolution error
    pub unresolved: usize,
    /// Events rejected with any other error
    pub failed: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.dispatched + self.unresolved + self.failed
    }
}

struct State {
    cache: EventCache,
    timer: DebounceTimer,
}

struct Shared<H> {
    state: Mutex<State>,
    /// Held for the whole dispatch of a batch so batches never interleave
    dispatch_lock: Mutex<()>,
    handler: H,
}

impl<H: EventHandler> Shared<H> {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn flush(&self) -> FlushReport {
        let _dispatching = self.dispatch_lock.lock().unwrap_or_else(|e| e.into_inner());

        let cache = {
            let mut state = self.lock_state();
            state.timer.cancel();
            std::mem::take(&mut state.cache)
        };

        let mut report = FlushReport::default();
        if cache.is_empty() {
            return report;
        }

        // The state lock is released: handlers may submit follow-up events
        for event in cache.into_events() {
            debug!(
                kind = event.kind_name(),
                path = %event.src_path.display(),
                "Dispatching event"
            );
            match dispatch(&self.handler, &event) {
                Ok(()) => report.dispatched += 1,
                Err(e) if e.is_resolution() => {
                    report.unresolved += 1;
                    warn!("Unresolved {} event: {}", event.kind_name(), e);
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "Failed to handle {} event for {}: {}",
                        event.kind_name(),
                        event.src_path.display(),
                        e
                    );
                }
            }
        }

        if let Err(e) = self.handler.commit() {
            error!("Failed to commit event batch: {}", e);
        }

        info!(
            dispatched = report.dispatched,
            unresolved = report.unresolved,
            failed = report.failed,
            "Flushed event batch"
        );
        report
    }
}

/// Debounces raw events and hands the consolidated batch to `H`.
///
/// Cloning is cheap and every clone feeds the same buffer. `submit` may be
/// called from any thread, including from inside handler callbacks. Handlers
/// must not call [`EventConsolidator::flush`] themselves.
pub struct EventConsolidator<H: EventHandler + 'static> {
    shared: Arc<Shared<H>>,
}

impl<H: EventHandler + 'static> Clone for EventConsolidator<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<H: EventHandler + 'static> EventConsolidator<H> {
    /// Create a consolidator whose flush timer runs on the current Tokio runtime.
    pub fn new(handler: H, config: ConsolidatorConfig) -> Result<Self, ConsolidatorError> {
        let runtime = Handle::try_current()?;
        Ok(Self::with_runtime(handler, config, runtime))
    }

    /// Create a consolidator whose flush timer runs on `runtime`.
    pub fn with_runtime(handler: H, config: ConsolidatorConfig, runtime: Handle) -> Self {
        let state = State {
            cache: EventCache::new(),
            timer: DebounceTimer::new(runtime, config.delay),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                dispatch_lock: Mutex::new(()),
                handler,
            }),
        }
    }

    /// Buffer a raw event and restart the debounce window.
    ///
    /// Directory-level `modified` events carry no information the model uses
    /// and are discarded.
    pub fn submit(&self, event: FsEvent) {
        if event.is_directory && event.kind == FsEventKind::Modified {
            debug!(path = %event.src_path.display(), "Ignoring directory modification");
            return;
        }

        debug!(
            kind = event.kind_name(),
            path = %event.src_path.display(),
            "Buffering event"
        );

        let weak: Weak<Shared<H>> = Arc::downgrade(&self.shared);
        let mut state = self.shared.lock_state();
        if let Some(previous) = state.cache.insert(event) {
            debug!(replaced = previous.kind_name(), "Coalesced event");
        }
        state.timer.reschedule(move || {
            if let Some(shared) = weak.upgrade() {
                shared.flush();
            }
        });
    }

    /// Dispatch everything buffered so far, without waiting for the timer.
    pub fn flush(&self) -> FlushReport {
        self.shared.flush()
    }

    /// Number of events currently buffered.
    pub fn pending(&self) -> usize {
        self.shared.lock_state().cache.len()
    }

    /// Stop the timer and dispatch whatever is still buffered.
    pub fn shutdown(&self) -> FlushReport {
        self.shared.lock_state().timer.cancel();
        self.flush()
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }
}
