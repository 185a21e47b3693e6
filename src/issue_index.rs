// THEORY:
// The `IssueIndex` is the live mapping from a cell to the issues currently shown for
// it. It is the only mutable state the engine shares between scans.
//
// Key architectural principles:
// 1.  **Whole-cell replacement**: a cell's entries are always replaced as a unit with
//     the result of its latest scan. They are never patched, so the index can never
//     hold a union of old and new findings.
// 2.  **One entry per message**: entries are keyed by `(cell, message)`. Repeating a
//     message within one scan (two images without alt text) collapses to one entry.
// 3.  **UI-agnostic storage**: the index stores plain `IssueEntry` values. Every
//     update returns the `IndexChange`s it implies instead of calling the host, so
//     the owner decides when they reach a `Presenter` (the orchestrator applies
//     them after releasing its lock). Rows are diffed against the previous state,
//     so rescanning unchanged content produces no changes at all.
// 4.  **Indicator idempotence**: each cell has at most one indicator, addressed by a
//     deterministic id. It is attached when a cell gains its first entry and detached
//     when the cell's entries become empty.

use crate::cell::CellId;
use crate::core_modules::finding::Finding;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const INDICATOR_PREFIX: &str = "accessibility-indicator-";
pub const PANEL_TITLE: &str = "Cells with Accessibility Issues";

/// One row of the issue panel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueEntry {
    pub cell_id: CellId,
    pub message: String,
}

impl IssueEntry {
    /// Deterministic identifier for the panel row.
    pub fn row_id(&self) -> String {
        format!("cell-{}_{}", self.cell_id, self.message)
    }
}

/// Deterministic identifier of a cell's indicator.
pub fn indicator_id(cell_id: &CellId) -> String {
    format!("{INDICATOR_PREFIX}{cell_id}")
}

/// Host-side rendering of index changes.
///
/// Callbacks never run under the orchestrator's state lock, so an implementation
/// may query the orchestrator (`entries`, `issue_count`) from inside one.
pub trait Presenter: Send + Sync {
    fn attach_indicator(&self, cell_id: &CellId, indicator_id: &str);

    fn detach_indicator(&self, cell_id: &CellId, indicator_id: &str);

    fn add_row(&self, entry: &IssueEntry);

    fn remove_row(&self, entry: &IssueEntry);

    /// Scrolls the cell into view; `false` if the host no longer shows it.
    fn scroll_to(&self, cell_id: &CellId) -> bool;

    fn set_highlight(&self, cell_id: &CellId, highlighted: bool);

    fn set_panel_visible(&self, _visible: bool) {}
}

/// One presentation step implied by an index update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexChange {
    AttachIndicator(CellId),
    DetachIndicator(CellId),
    AddRow(IssueEntry),
    RemoveRow(IssueEntry),
}

impl IndexChange {
    pub fn present(&self, presenter: &dyn Presenter) {
        match self {
            Self::AttachIndicator(cell_id) => presenter.attach_indicator(cell_id, &indicator_id(cell_id)),
            Self::DetachIndicator(cell_id) => presenter.detach_indicator(cell_id, &indicator_id(cell_id)),
            Self::AddRow(entry) => presenter.add_row(entry),
            Self::RemoveRow(entry) => presenter.remove_row(entry),
        }
    }
}

pub struct IssueIndex {
    entries: BTreeMap<CellId, Vec<IssueEntry>>,
    indicators: BTreeSet<CellId>,
    presenter: Arc<dyn Presenter>,
    highlight_duration: Duration,
}

impl IssueIndex {
    pub fn new(presenter: Arc<dyn Presenter>, highlight_duration: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            indicators: BTreeSet::new(),
            presenter,
            highlight_duration,
        }
    }

    /// Replaces everything recorded for `cell_id` with `findings` and returns the
    /// presentation changes, in the order they must be applied.
    #[must_use]
    pub fn replace(&mut self, cell_id: &CellId, findings: &[Finding]) -> Vec<IndexChange> {
        let mut next: Vec<IssueEntry> = Vec::with_capacity(findings.len());
        for finding in findings {
            let entry = IssueEntry {
                cell_id: cell_id.clone(),
                message: finding.message(),
            };
            if !next.contains(&entry) {
                next.push(entry);
            }
        }

        let previous = self.entries.remove(cell_id).unwrap_or_default();
        let mut changes: Vec<IndexChange> = previous
            .iter()
            .filter(|entry| !next.contains(entry))
            .cloned()
            .map(IndexChange::RemoveRow)
            .collect();
        changes.extend(
            next.iter()
                .filter(|entry| !previous.contains(entry))
                .cloned()
                .map(IndexChange::AddRow),
        );

        if next.is_empty() {
            changes.extend(self.detach(cell_id));
        } else {
            self.entries.insert(cell_id.clone(), next);
            changes.extend(self.attach(cell_id));
        }
        changes
    }

    /// Drops every entry and the indicator for `cell_id`. No changes for unknown cells.
    #[must_use]
    pub fn remove(&mut self, cell_id: &CellId) -> Vec<IndexChange> {
        let mut changes: Vec<IndexChange> = self
            .entries
            .remove(cell_id)
            .unwrap_or_default()
            .into_iter()
            .map(IndexChange::RemoveRow)
            .collect();
        changes.extend(self.detach(cell_id));
        changes
    }

    /// Applies `changes` to this index's presenter.
    pub fn present(&self, changes: &[IndexChange]) {
        for change in changes {
            change.present(self.presenter.as_ref());
        }
    }

    pub fn entries(&self, cell_id: &CellId) -> &[IssueEntry] {
        self.entries.get(cell_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_indicator(&self, cell_id: &CellId) -> bool {
        self.indicators.contains(cell_id)
    }

    /// Cells that currently have at least one entry.
    pub fn cells(&self) -> impl Iterator<Item = &CellId> {
        self.entries.keys()
    }

    /// Total number of entries across all cells.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scrolls to `cell_id` and flashes a highlight. The returned future owns
    /// everything it needs, so it can be spawned without holding the index.
    pub fn navigate_to(&self, cell_id: &CellId) -> impl Future<Output = bool> + Send + 'static {
        let presenter = Arc::clone(&self.presenter);
        let cell_id = cell_id.clone();
        let duration = self.highlight_duration;
        async move {
            if !presenter.scroll_to(&cell_id) {
                return false;
            }
            presenter.set_highlight(&cell_id, true);
            tokio::time::sleep(duration).await;
            presenter.set_highlight(&cell_id, false);
            true
        }
    }

    fn attach(&mut self, cell_id: &CellId) -> Option<IndexChange> {
        self.indicators
            .insert(cell_id.clone())
            .then(|| IndexChange::AttachIndicator(cell_id.clone()))
    }

    fn detach(&mut self, cell_id: &CellId) -> Option<IndexChange> {
        self.indicators
            .remove(cell_id)
            .then(|| IndexChange::DetachIndicator(cell_id.clone()))
    }
}
