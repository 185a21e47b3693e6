mod support;

use notebook_a11y::{
    CellId, CellKind, IssueEntry, MemoryCell, NotebookEvent, Presenter, Rgb, ScanConfig, ScanOrchestrator, ScanOutcome,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex, OnceLock};
use support::{
    FakeLoader, RecordingPresenter, ScriptedScorer, init_logging, orchestrator, scanner, solid, wait_until, within,
};
use tokio::sync::mpsc;

fn messages(orchestrator: &ScanOrchestrator, cell_id: &CellId) -> Vec<String> {
    orchestrator.entries(cell_id).into_iter().map(|entry| entry.message).collect()
}

fn text_cell(id: &str, source: &str) -> Arc<MemoryCell> {
    Arc::new(MemoryCell::new(id, CellKind::Text, source, Rgb::BLACK))
}

fn loader() -> Arc<FakeLoader> {
    let loader = FakeLoader::new();
    loader.insert("dark.png", solid(Rgb::BLACK));
    loader.insert("light.png", solid(Rgb::WHITE));
    loader
}

#[tokio::test]
async fn latest_scan_wins_over_a_slower_older_one() {
    init_logging();
    let loader = loader();
    let gate = loader.gate("slow.png");
    loader.insert("slow.png", solid(Rgb::BLACK));
    let presenter = RecordingPresenter::new();
    let orchestrator = orchestrator(loader, presenter.clone());
    let cell = text_cell("c1", "![slow](slow.png)");
    let cell_id = CellId::new("c1");
    orchestrator.watch(cell.clone());

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let cell_id = cell_id.clone();
        async move { orchestrator.rescan(&cell_id).await }
    });
    within(gate.started.notified()).await;

    cell.edit("![](light.png)");
    assert!(wait_until(|| messages(&orchestrator, &cell_id) == vec!["Missing Alt Tag".to_string()]).await);

    gate.open();
    assert_eq!(within(first).await.unwrap(), ScanOutcome::Discarded);
    assert_eq!(messages(&orchestrator, &cell_id), vec!["Missing Alt Tag".to_string()]);
    assert!(wait_until(|| presenter.rows() == vec!["cell-c1_Missing Alt Tag".to_string()]).await);
}

#[tokio::test]
async fn edits_trigger_a_rescan() {
    init_logging();
    let presenter = RecordingPresenter::new();
    let orchestrator = orchestrator(loader(), presenter.clone());
    let cell = text_cell("c1", "nothing to see");
    let cell_id = CellId::new("c1");
    assert_eq!(orchestrator.discover(cell.clone()).await, ScanOutcome::Applied { findings: 0 });
    assert!(!orchestrator.has_indicator(&cell_id));

    cell.edit("![](dark.png)");

    assert!(wait_until(|| presenter.indicators() == vec!["accessibility-indicator-c1".to_string()]).await);
    assert!(orchestrator.has_indicator(&cell_id));
    assert_eq!(
        messages(&orchestrator, &cell_id),
        vec!["Missing Alt Tag".to_string(), "Low Image Contrast: #000000".to_string()]
    );

    cell.edit("![fixed](light.png)");

    assert!(wait_until(|| presenter.indicators().is_empty() && presenter.rows().is_empty()).await);
    assert!(!orchestrator.has_indicator(&cell_id));
}

#[tokio::test]
async fn background_change_is_a_content_change() {
    init_logging();
    let orchestrator = orchestrator(loader(), RecordingPresenter::new());
    let cell = text_cell("c1", "![light](light.png)");
    let cell_id = CellId::new("c1");
    orchestrator.discover(cell.clone()).await;
    assert_eq!(orchestrator.issue_count(), 0);

    cell.set_background(Rgb::WHITE);

    assert!(wait_until(|| orchestrator.has_indicator(&cell_id)).await);
    assert_eq!(messages(&orchestrator, &cell_id), vec!["Low Image Contrast: #FFFFFF".to_string()]);
}

#[tokio::test]
async fn rescanning_unchanged_content_touches_nothing() {
    init_logging();
    let presenter = RecordingPresenter::new();
    let orchestrator = orchestrator(loader(), presenter.clone());
    let cell_id = CellId::new("c1");
    orchestrator.watch(text_cell("c1", "![](dark.png)"));

    assert_eq!(orchestrator.rescan(&cell_id).await, ScanOutcome::Applied { findings: 2 });
    let calls = presenter.calls();
    let before = orchestrator.entries(&cell_id);

    assert_eq!(orchestrator.rescan(&cell_id).await, ScanOutcome::Applied { findings: 2 });

    assert_eq!(presenter.calls(), calls);
    assert_eq!(orchestrator.entries(&cell_id), before);
}

#[tokio::test]
async fn gate_clears_and_restores_every_cell() {
    init_logging();
    let presenter = RecordingPresenter::new();
    let orchestrator = orchestrator(loader(), presenter.clone());
    let dirty = CellId::new("c1");
    let clean = CellId::new("c2");
    orchestrator.discover(text_cell("c1", "![](dark.png)")).await;
    orchestrator.discover(text_cell("c2", "![fine](light.png)")).await;
    assert!(orchestrator.is_enabled());
    assert!(orchestrator.has_indicator(&dirty));

    let outcomes = orchestrator.set_enabled(false).await;

    assert_eq!(outcomes, vec![ScanOutcome::Cleared, ScanOutcome::Cleared]);
    assert!(!orchestrator.has_indicator(&dirty));
    assert_eq!(orchestrator.issue_count(), 0);
    assert!(presenter.indicators().is_empty());
    assert!(presenter.rows().is_empty());
    assert_eq!(presenter.panel_visible(), Some(false));
    assert_eq!(orchestrator.rescan(&clean).await, ScanOutcome::Cleared);

    assert!(orchestrator.toggle().await);

    assert!(orchestrator.is_enabled());
    assert_eq!(presenter.indicators(), vec!["accessibility-indicator-c1".to_string()]);
    assert_eq!(orchestrator.issue_count(), 2);
    assert!(!orchestrator.has_indicator(&clean));
    assert_eq!(presenter.panel_visible(), Some(true));
}

#[tokio::test]
async fn edits_while_disabled_leave_the_index_empty() {
    init_logging();
    let orchestrator = orchestrator(loader(), RecordingPresenter::new());
    let cell = text_cell("c1", "plain");
    let cell_id = CellId::new("c1");
    orchestrator.discover(cell.clone()).await;
    orchestrator.set_enabled(false).await;

    cell.edit("![](dark.png)");

    assert_eq!(orchestrator.rescan(&cell_id).await, ScanOutcome::Cleared);
    assert!(orchestrator.entries(&cell_id).is_empty());
    assert!(!orchestrator.has_indicator(&cell_id));
}

#[tokio::test]
async fn unwatching_discards_the_in_flight_scan() {
    init_logging();
    let loader = loader();
    let gate = loader.gate("slow.png");
    loader.insert("slow.png", solid(Rgb::BLACK));
    let presenter = RecordingPresenter::new();
    let orchestrator = orchestrator(loader, presenter.clone());
    let cell = text_cell("c1", "![](slow.png)");
    let cell_id = CellId::new("c1");
    orchestrator.watch(cell.clone());

    let scan = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let cell_id = cell_id.clone();
        async move { orchestrator.rescan(&cell_id).await }
    });
    within(gate.started.notified()).await;
    assert!(orchestrator.unwatch(&cell_id));
    gate.open();

    assert_eq!(within(scan).await.unwrap(), ScanOutcome::Discarded);
    assert!(!orchestrator.has_indicator(&cell_id));
    assert!(presenter.rows().is_empty());
    assert!(wait_until(|| cell.subscriber_count() == 0).await);
    assert_eq!(orchestrator.rescan(&cell_id).await, ScanOutcome::Untracked);
}

#[tokio::test]
async fn cells_are_subscribed_once() {
    init_logging();
    let orchestrator = orchestrator(loader(), RecordingPresenter::new());
    let cell = text_cell("c1", "plain");

    assert!(orchestrator.watch(cell.clone()));
    assert!(!orchestrator.watch(cell.clone()));

    assert_eq!(cell.subscriber_count(), 1);
    assert_eq!(orchestrator.watched(), vec![CellId::new("c1")]);
    assert!(!orchestrator.unwatch(&CellId::new("other")));
}

#[tokio::test]
async fn event_feed_follows_cell_lifecycle() {
    init_logging();
    let presenter = RecordingPresenter::new();
    let orchestrator = orchestrator(loader(), presenter.clone());
    let (events, feed) = mpsc::unbounded_channel();
    let task = orchestrator.spawn_event_feed(feed);
    let cell = text_cell("c1", "![](dark.png)");
    let cell_id = CellId::new("c1");

    events.send(NotebookEvent::Created(cell.clone())).unwrap();

    assert!(wait_until(|| presenter.indicators().len() == 1).await);
    assert!(orchestrator.is_watched(&cell_id));
    assert_eq!(cell.subscriber_count(), 1);

    events.send(NotebookEvent::Removed(cell_id.clone())).unwrap();

    assert!(wait_until(|| !orchestrator.is_watched(&cell_id) && cell.subscriber_count() == 0).await);
    assert!(wait_until(|| presenter.indicators().is_empty() && presenter.rows().is_empty()).await);

    drop(events);
    within(task).await.unwrap();
}

#[tokio::test]
async fn dropping_the_orchestrator_releases_subscriptions() {
    init_logging();
    let orchestrator = orchestrator(loader(), RecordingPresenter::new());
    let first = text_cell("c1", "plain");
    let second = text_cell("c2", "plain");
    orchestrator.watch(first.clone());
    orchestrator.watch(second.clone());
    assert_eq!(first.subscriber_count() + second.subscriber_count(), 2);

    drop(orchestrator);

    assert!(wait_until(|| first.subscriber_count() == 0 && second.subscriber_count() == 0).await);
}

#[tokio::test]
async fn shutdown_unwatches_everything() {
    init_logging();
    let presenter = RecordingPresenter::new();
    let orchestrator = orchestrator(loader(), presenter.clone());
    orchestrator.discover(text_cell("c1", "![](dark.png)")).await;
    orchestrator.discover(text_cell("c2", "![](light.png)")).await;
    assert_eq!(presenter.indicators().len(), 2);

    orchestrator.shutdown();

    assert!(orchestrator.watched().is_empty());
    assert_eq!(orchestrator.issue_count(), 0);
    assert!(wait_until(|| presenter.indicators().is_empty()).await);
}

/// Refreshes an issue badge from inside row callbacks, the way a host panel would.
#[derive(Default)]
struct BadgePresenter {
    orchestrator: OnceLock<ScanOrchestrator>,
    badges: Mutex<Vec<usize>>,
}

impl BadgePresenter {
    fn refresh(&self) {
        if let Some(orchestrator) = self.orchestrator.get() {
            self.badges.lock().unwrap().push(orchestrator.issue_count());
        }
    }
}

impl Presenter for BadgePresenter {
    fn attach_indicator(&self, _: &CellId, _: &str) {}

    fn detach_indicator(&self, _: &CellId, _: &str) {}

    fn add_row(&self, _: &IssueEntry) {
        self.refresh();
    }

    fn remove_row(&self, _: &IssueEntry) {
        self.refresh();
    }

    fn scroll_to(&self, _: &CellId) -> bool {
        true
    }

    fn set_highlight(&self, _: &CellId, _: bool) {}
}

#[tokio::test]
async fn presenter_can_query_the_orchestrator() {
    init_logging();
    let config = ScanConfig::default();
    let presenter = Arc::new(BadgePresenter::default());
    let orchestrator = ScanOrchestrator::new(
        scanner(loader(), ScriptedScorer::default(), &config),
        presenter.clone(),
        &config,
    );
    assert!(presenter.orchestrator.set(orchestrator.clone()).is_ok());

    let outcome = within(orchestrator.discover(text_cell("c1", "![](dark.png)"))).await;
    assert_eq!(outcome, ScanOutcome::Applied { findings: 2 });
    assert_eq!(*presenter.badges.lock().unwrap(), vec![2, 2]);

    within(orchestrator.set_enabled(false)).await;
    assert_eq!(*presenter.badges.lock().unwrap(), vec![2, 2, 0, 0]);
}
