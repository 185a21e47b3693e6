// THEORY:
// The engine never owns cell content. A host (the notebook frontend) owns every
// cell and exposes it through the `NotebookCell` trait: a stable identity, a
// snapshot of the current state, and a feed of content-change notifications.
//
// A scan always works from a `CellSnapshot` taken at the moment the scan starts,
// so a host edit that lands mid-scan can never tear the content a scan sees; it
// simply triggers another, newer scan.
//
// `MemoryCell` is the reference host adapter: an in-memory cell whose edits bump a
// `watch` revision counter. Hosts that mirror their document model into the engine
// can use it directly.

use crate::core_modules::pixel::pixel::Rgb;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Stable, host-assigned identity of a cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(Arc<str>);

impl CellId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CellId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// What a cell's source text represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Markdown source, possibly with embedded raw HTML.
    Text,
    /// Rendered output markup of a code cell.
    CodeOutput,
}

/// The state of a cell at the instant a scan begins.
#[derive(Debug, Clone, PartialEq)]
pub struct CellSnapshot {
    pub id: CellId,
    pub kind: CellKind,
    /// Markdown source for `Text`, rendered HTML for `CodeOutput`.
    pub source: String,
    /// Computed background the cell's images are drawn against.
    pub background: Rgb,
}

/// Content-change feed of a single cell. Every change bumps the revision;
/// the feed closes when the host drops the cell.
pub type ContentChanges = watch::Receiver<u64>;

/// A host-owned cell the engine can observe.
pub trait NotebookCell: Send + Sync {
    fn id(&self) -> CellId;

    fn snapshot(&self) -> CellSnapshot;

    /// Opens a new subscription to this cell's content changes.
    fn subscribe(&self) -> ContentChanges;
}

/// Document-level lifecycle events delivered by the host.
pub enum NotebookEvent {
    Created(Arc<dyn NotebookCell>),
    Removed(CellId),
}

impl fmt::Debug for NotebookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created(cell) => f.debug_tuple("Created").field(&cell.id()).finish(),
            Self::Removed(id) => f.debug_tuple("Removed").field(id).finish(),
        }
    }
}

struct MemoryCellState {
    source: String,
    background: Rgb,
}

/// An in-memory `NotebookCell`.
pub struct MemoryCell {
    id: CellId,
    kind: CellKind,
    state: Mutex<MemoryCellState>,
    revision: watch::Sender<u64>,
}

impl MemoryCell {
    pub fn new(id: impl Into<CellId>, kind: CellKind, source: impl Into<String>, background: Rgb) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            id: id.into(),
            kind,
            state: Mutex::new(MemoryCellState {
                source: source.into(),
                background,
            }),
            revision,
        }
    }

    /// Replaces the source and notifies subscribers.
    pub fn edit(&self, source: impl Into<String>) {
        self.lock().source = source.into();
        self.bump();
    }

    /// Changes the rendered background (e.g. after a theme switch) and notifies subscribers.
    pub fn set_background(&self, background: Rgb) {
        self.lock().background = background;
        self.bump();
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.revision.receiver_count()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryCellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotebookCell for MemoryCell {
    fn id(&self) -> CellId {
        self.id.clone()
    }

    fn snapshot(&self) -> CellSnapshot {
        let state = self.lock();
        CellSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            source: state.source.clone(),
            background: state.background,
        }
    }

    fn subscribe(&self) -> ContentChanges {
        self.revision.subscribe()
    }
}
