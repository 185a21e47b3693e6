#![allow(dead_code)]

use futures::future::BoxFuture;
use image::{DynamicImage, Rgba, RgbaImage};
use notebook_a11y::{
    CellId, CellScanner, ContrastScorer, ImageLoader, IssueEntry, Presenter, Rgb, ScanConfig, ScanError,
    ScanOrchestrator, ScanResult, WcagContrast,
};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use url::Url;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn solid(color: Rgb) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([color.red, color.green, color.blue, 255])))
}

/// A 10x10 image: the first `majority` pixels in `main`, the rest in `other`.
pub fn mixed(main: Rgb, other: Rgb, majority: u32) -> DynamicImage {
    let mut image = RgbaImage::new(10, 10);
    for (index, pixel) in image.pixels_mut().enumerate() {
        let color = if (index as u32) < majority { main } else { other };
        *pixel = Rgba([color.red, color.green, color.blue, 255]);
    }
    DynamicImage::ImageRgba8(image)
}

/// Holds a load open until the test releases it.
pub struct Gate {
    pub started: Notify,
    pub release: Semaphore,
}

impl Gate {
    pub fn open(&self) {
        self.release.add_permits(1);
    }
}

/// Serves images by file name, optionally holding individual loads behind a gate.
#[derive(Default)]
pub struct FakeLoader {
    images: Mutex<HashMap<String, DynamicImage>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
}

impl FakeLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, name: &str, image: DynamicImage) {
        self.images.lock().unwrap().insert(name.to_string(), image);
    }

    pub fn gate(&self, name: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            started: Notify::new(),
            release: Semaphore::new(0),
        });
        self.gates.lock().unwrap().insert(name.to_string(), gate.clone());
        gate
    }

    fn name(url: &Url) -> String {
        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string()
    }
}

impl ImageLoader for FakeLoader {
    fn load<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, ScanResult<DynamicImage>> {
        Box::pin(async move {
            let name = Self::name(url);
            let gate = self.gates.lock().unwrap().get(&name).cloned();
            if let Some(gate) = gate {
                gate.started.notify_one();
                gate.release
                    .acquire()
                    .await
                    .map_err(|e| ScanError::image_load(url, e))?
                    .forget();
            }
            self.images
                .lock()
                .unwrap()
                .get(&name)
                .cloned()
                .ok_or_else(|| ScanError::image_load(url, "not found"))
        })
    }
}

/// Returns scripted scores per foreground color, WCAG for anything else.
#[derive(Default)]
pub struct ScriptedScorer {
    scores: HashMap<Rgb, Option<f64>>,
}

impl ScriptedScorer {
    pub fn with(mut self, color: Rgb, score: f64) -> Self {
        self.scores.insert(color, Some(score));
        self
    }

    pub fn failing(mut self, color: Rgb) -> Self {
        self.scores.insert(color, None);
        self
    }
}

impl ContrastScorer for ScriptedScorer {
    fn score<'a>(&'a self, foreground: Rgb, background: Rgb) -> BoxFuture<'a, ScanResult<f64>> {
        Box::pin(async move {
            match self.scores.get(&foreground) {
                Some(Some(score)) => Ok(*score),
                Some(None) => Err(ScanError::ScoringService("service unavailable".into())),
                None => Ok(WcagContrast::ratio(foreground, background)),
            }
        })
    }
}

#[derive(Default)]
struct PresenterState {
    indicators: BTreeSet<String>,
    rows: BTreeSet<String>,
    panel_visible: Option<bool>,
    calls: usize,
}

/// Mirrors what a host would show.
#[derive(Default)]
pub struct RecordingPresenter {
    state: Mutex<PresenterState>,
}

impl RecordingPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn indicators(&self) -> Vec<String> {
        self.state.lock().unwrap().indicators.iter().cloned().collect()
    }

    pub fn rows(&self) -> Vec<String> {
        self.state.lock().unwrap().rows.iter().cloned().collect()
    }

    pub fn panel_visible(&self) -> Option<bool> {
        self.state.lock().unwrap().panel_visible
    }

    /// Number of presentation changes so far.
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

impl Presenter for RecordingPresenter {
    fn attach_indicator(&self, _: &CellId, indicator_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        assert!(state.indicators.insert(indicator_id.to_string()), "indicator attached twice");
    }

    fn detach_indicator(&self, _: &CellId, indicator_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        assert!(state.indicators.remove(indicator_id), "detached a missing indicator");
    }

    fn add_row(&self, entry: &IssueEntry) {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        assert!(state.rows.insert(entry.row_id()), "row added twice");
    }

    fn remove_row(&self, entry: &IssueEntry) {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        assert!(state.rows.remove(&entry.row_id()), "removed a missing row");
    }

    fn scroll_to(&self, _: &CellId) -> bool {
        true
    }

    fn set_highlight(&self, _: &CellId, _: bool) {}

    fn set_panel_visible(&self, visible: bool) {
        self.state.lock().unwrap().panel_visible = Some(visible);
    }
}

pub fn scanner(loader: Arc<FakeLoader>, scorer: ScriptedScorer, config: &ScanConfig) -> CellScanner {
    CellScanner::new(config, loader, Arc::new(scorer))
}

pub fn orchestrator(loader: Arc<FakeLoader>, presenter: Arc<RecordingPresenter>) -> ScanOrchestrator {
    let config = ScanConfig::default();
    ScanOrchestrator::new(scanner(loader, ScriptedScorer::default(), &config), presenter, &config)
}

/// Polls `condition` until it holds or a generous deadline passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Awaits `future` with a deadline so a broken test fails instead of hanging.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("future did not complete in time")
}
