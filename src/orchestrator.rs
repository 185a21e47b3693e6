// THEORY:
// The `ScanOrchestrator` keeps the issue index in step with a live notebook. It
// reacts to content changes, runs the `CellScanner`, and reconciles the results
// into the `IssueIndex`.
//
// Key architectural principles:
// 1.  **Explicit subscriptions**: watching a cell spawns one listener task on that
//     cell's content feed. The listener only holds a weak reference back to the
//     orchestrator and is aborted when the cell is unwatched, so listeners never
//     outlive the cells or the orchestrator they serve.
// 2.  **Latest scan wins**: scans of one cell may overlap (a slow image from an older
//     edit, a fast one from a newer edit). Every scan takes a per-cell generation
//     number before it snapshots the cell and commits only if that generation is
//     still the newest when it finishes. Generation check and index update happen
//     under one lock, so a stale scan can never overwrite a newer one.
// 3.  **One gate**: the enable switch belongs to the orchestrator. Flipping it runs a
//     full pass immediately: disabling clears every indicator, enabling rescans every
//     tracked cell. While disabled, content changes clear instead of scanning.
// 4.  **No lock across await**: the state lock is taken to start and to commit a
//     scan, never while the scanner is waiting on images or the scoring service.
// 5.  **Presentation outside the lock**: a commit queues the index's changes while
//     still holding the lock, so the queue order is the commit order, and a single
//     presenter task applies them with no lock held. A presenter may therefore call
//     back into the orchestrator. `rescan` and `set_enabled` wait until their
//     changes have been presented before returning.

use crate::cell::{CellId, NotebookCell, NotebookEvent};
use crate::core_modules::finding::Finding;
use crate::error::ScanResult;
use crate::issue_index::{IndexChange, IssueEntry, IssueIndex, Presenter};
use crate::scanner::{CellScanner, ScanConfig};
use futures::future::join_all;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// What happened to the result of one `rescan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The scan's findings replaced the cell's entries.
    Applied { findings: usize },
    /// The gate was off; the cell's entries were cleared.
    Cleared,
    /// A newer scan of the same cell started first, or the cell was unwatched.
    Discarded,
    /// The cell is not watched.
    Untracked,
}

struct TrackedCell {
    cell: Arc<dyn NotebookCell>,
    subscription: JoinHandle<()>,
    generation: u64,
}

struct State {
    index: IssueIndex,
    tracked: HashMap<CellId, TrackedCell>,
}

enum Presentation {
    Changes(Vec<IndexChange>),
    PanelVisible(bool),
    /// Acknowledged once everything queued before it has been presented.
    Flush(oneshot::Sender<()>),
}

struct Shared {
    scanner: CellScanner,
    enabled: AtomicBool,
    state: Mutex<State>,
    presentation: mpsc::UnboundedSender<Presentation>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for tracked in state.tracked.values() {
            tracked.subscription.abort();
        }
    }
}

/// Reacts to notebook edits and keeps the issue index current.
#[derive(Clone)]
pub struct ScanOrchestrator {
    shared: Arc<Shared>,
}

impl ScanOrchestrator {
    /// Creates an orchestrator with the gate enabled. Must be called inside a tokio
    /// runtime: the presenter task starts here and lives as long as the orchestrator.
    pub fn new(scanner: CellScanner, presenter: Arc<dyn Presenter>, config: &ScanConfig) -> Self {
        let (presentation, queue) = mpsc::unbounded_channel();
        Self::spawn_presenter(Arc::clone(&presenter), queue);
        Self {
            shared: Arc::new(Shared {
                scanner,
                enabled: AtomicBool::new(true),
                state: Mutex::new(State {
                    index: IssueIndex::new(presenter, config.highlight_duration),
                    tracked: HashMap::new(),
                }),
                presentation,
            }),
        }
    }

    pub fn from_config(config: &ScanConfig, presenter: Arc<dyn Presenter>) -> ScanResult<Self> {
        Ok(Self::new(CellScanner::from_config(config)?, presenter, config))
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    /// The single gate entry point. Re-evaluates every tracked cell before returning.
    pub async fn set_enabled(&self, enabled: bool) -> Vec<ScanOutcome> {
        self.shared.enabled.store(enabled, Ordering::SeqCst);
        info!("accessibility checks {}", if enabled { "enabled" } else { "disabled" });
        self.queue(Presentation::PanelVisible(enabled));
        let outcomes = self.rescan_all().await;
        self.presented().await;
        outcomes
    }

    /// Flips the gate and returns the new state.
    pub async fn toggle(&self) -> bool {
        let enabled = !self.is_enabled();
        self.set_enabled(enabled).await;
        enabled
    }

    /// Starts listening to `cell`'s content changes. Returns `false` if the cell
    /// was already watched; a cell is only ever subscribed once.
    pub fn watch(&self, cell: Arc<dyn NotebookCell>) -> bool {
        let cell_id = cell.id();
        let mut state = self.lock();
        if state.tracked.contains_key(&cell_id) {
            return false;
        }
        let subscription = self.spawn_listener(cell_id.clone(), cell.as_ref());
        state.tracked.insert(
            cell_id.clone(),
            TrackedCell {
                cell,
                subscription,
                generation: 0,
            },
        );
        debug!("{cell_id}: watching");
        true
    }

    /// Watches `cell` and gives it its initial scan.
    pub async fn discover(&self, cell: Arc<dyn NotebookCell>) -> ScanOutcome {
        let cell_id = cell.id();
        self.watch(cell);
        self.rescan(&cell_id).await
    }

    /// Tears down the cell's subscription and clears its entries. Scans still in
    /// flight for it are discarded when they finish.
    pub fn unwatch(&self, cell_id: &CellId) -> bool {
        let mut state = self.lock();
        let Some(tracked) = state.tracked.remove(cell_id) else {
            return false;
        };
        tracked.subscription.abort();
        let changes = state.index.remove(cell_id);
        self.queue(Presentation::Changes(changes));
        debug!("{cell_id}: unwatched");
        true
    }

    pub fn is_watched(&self, cell_id: &CellId) -> bool {
        self.lock().tracked.contains_key(cell_id)
    }

    pub fn watched(&self) -> Vec<CellId> {
        let mut cells: Vec<CellId> = self.lock().tracked.keys().cloned().collect();
        cells.sort();
        cells
    }

    /// Re-evaluates one cell: scan and replace when enabled, clear when disabled.
    pub async fn rescan(&self, cell_id: &CellId) -> ScanOutcome {
        let Some((cell, generation)) = self.begin(cell_id) else {
            return ScanOutcome::Untracked;
        };
        let outcome = if self.is_enabled() {
            let snapshot = cell.snapshot();
            let findings = self.shared.scanner.scan(&snapshot).await;
            self.commit(cell_id, generation, Some(&findings))
        } else {
            self.commit(cell_id, generation, None)
        };
        if outcome != ScanOutcome::Discarded {
            self.presented().await;
        }
        outcome
    }

    /// Re-evaluates every tracked cell concurrently.
    pub async fn rescan_all(&self) -> Vec<ScanOutcome> {
        let cells = self.watched();
        join_all(cells.iter().map(|cell_id| self.rescan(cell_id))).await
    }

    /// Consumes the host's creation/removal feed until it closes.
    pub fn spawn_event_feed(&self, mut events: mpsc::UnboundedReceiver<NotebookEvent>) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(orchestrator) = Self::upgrade(&shared) else {
                    break;
                };
                match event {
                    NotebookEvent::Created(cell) => {
                        let cell_id = cell.id();
                        info!("{cell_id}: discovered");
                        orchestrator.watch(cell);
                        tokio::spawn(async move {
                            orchestrator.rescan(&cell_id).await;
                        });
                    }
                    NotebookEvent::Removed(cell_id) => {
                        orchestrator.unwatch(&cell_id);
                    }
                }
            }
        })
    }

    /// Scrolls the host to `cell_id` and flashes it.
    pub fn navigate_to(&self, cell_id: &CellId) -> JoinHandle<bool> {
        let navigation = self.lock().index.navigate_to(cell_id);
        tokio::spawn(navigation)
    }

    pub fn entries(&self, cell_id: &CellId) -> Vec<IssueEntry> {
        self.lock().index.entries(cell_id).to_vec()
    }

    pub fn has_indicator(&self, cell_id: &CellId) -> bool {
        self.lock().index.has_indicator(cell_id)
    }

    /// Total number of issues across all cells.
    pub fn issue_count(&self) -> usize {
        self.lock().index.len()
    }

    /// Unwatches every cell.
    pub fn shutdown(&self) {
        for cell_id in self.watched() {
            self.unwatch(&cell_id);
        }
    }

    fn begin(&self, cell_id: &CellId) -> Option<(Arc<dyn NotebookCell>, u64)> {
        let mut state = self.lock();
        let tracked = state.tracked.get_mut(cell_id)?;
        tracked.generation += 1;
        Some((Arc::clone(&tracked.cell), tracked.generation))
    }

    fn commit(&self, cell_id: &CellId, generation: u64, findings: Option<&[Finding]>) -> ScanOutcome {
        let mut state = self.lock();
        let latest = state.tracked.get(cell_id).map(|tracked| tracked.generation);
        if latest != Some(generation) {
            debug!("{cell_id}: discarding stale scan {generation} (latest {latest:?})");
            return ScanOutcome::Discarded;
        }
        let (changes, outcome) = match findings {
            Some(findings) => (
                state.index.replace(cell_id, findings),
                ScanOutcome::Applied {
                    findings: findings.len(),
                },
            ),
            None => (state.index.remove(cell_id), ScanOutcome::Cleared),
        };
        // Queued before the lock drops so presentation follows commit order.
        self.queue(Presentation::Changes(changes));
        outcome
    }

    fn queue(&self, presentation: Presentation) {
        if matches!(&presentation, Presentation::Changes(changes) if changes.is_empty()) {
            return;
        }
        // Only fails once the presenter task is gone with the runtime.
        let _ = self.shared.presentation.send(presentation);
    }

    /// Waits until everything queued so far has reached the presenter.
    async fn presented(&self) {
        let (done, acknowledged) = oneshot::channel();
        if self.shared.presentation.send(Presentation::Flush(done)).is_ok() {
            let _ = acknowledged.await;
        }
    }

    fn spawn_presenter(presenter: Arc<dyn Presenter>, mut queue: mpsc::UnboundedReceiver<Presentation>) {
        tokio::spawn(async move {
            while let Some(presentation) = queue.recv().await {
                match presentation {
                    Presentation::Changes(changes) => {
                        for change in &changes {
                            change.present(presenter.as_ref());
                        }
                    }
                    Presentation::PanelVisible(visible) => presenter.set_panel_visible(visible),
                    Presentation::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
    }

    fn spawn_listener(&self, cell_id: CellId, cell: &dyn NotebookCell) -> JoinHandle<()> {
        let mut changes = cell.subscribe();
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let Some(orchestrator) = Self::upgrade(&shared) else {
                    break;
                };
                let cell_id = cell_id.clone();
                tokio::spawn(async move {
                    orchestrator.rescan(&cell_id).await;
                });
            }
            debug!("{cell_id}: content feed closed");
        })
    }

    fn upgrade(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
